//! Client side of lohost: expose a wrapped process through a Unix socket,
//! make sure a daemon is running, and keep the process registered for as
//! long as it lives.
//!
//! - [`bridge`]: [`SocketBridge`]: Unix socket ↔ loopback TCP relay
//! - [`lifecycle`]: [`ensure_daemon`]: health check, detached spawn, readiness polling
//! - [`session`]: [`Session`]: register, run the child, deregister, tear down

pub mod bridge;
mod error;
pub mod lifecycle;
pub mod session;

pub use bridge::{allocate_port, BridgeHandle, SocketBridge};
pub use error::BridgeError;
pub use lifecycle::{
    ensure_daemon, DaemonLauncher, DetachedLauncher, LifecycleState, ReadinessPolicy,
};
pub use session::{dns_shim_from_env, ExitOutcome, Registration, Session, ENV_DNS_LIB};
