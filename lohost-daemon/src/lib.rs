//! lohost daemon: host-based router, in-memory service registry, and the
//! JSON control API, all served from one loopback HTTP listener.

mod body;
mod control;
mod error;
pub mod log_rotation;
pub mod paths;
pub mod protocol;
mod router;
mod runtime;

pub use body::ProxyBody;
pub use error::DaemonError;
pub use protocol::{
    ConfigReport, ControlClient, HealthReport, ServiceEntry, CONTROL_PREFIX,
};
pub use runtime::{init_tracing, run, start_blocking, Daemon, ShutdownHandle};
