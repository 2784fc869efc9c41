//! lohost core library: domain types, the in-memory service registry,
//! host routing, and the stream splicing shared by daemon and bridge.
//!
//! - [`types`]: newtypes, [`Service`], registration payloads
//! - [`config`]: [`DaemonConfig`] and its environment rendering
//! - [`registry`]: [`ServiceRegistry`] with longest-suffix resolution
//! - [`routing`]: `Host` header → routing key
//! - [`tunnel`]: [`TunnelSet`], the live set of spliced stream pairs
//! - [`error`]: [`RouteError`], [`RegistrationError`], [`ConfigError`]

pub mod config;
pub mod error;
pub mod registry;
pub mod routing;
pub mod tunnel;
pub mod types;

pub use config::DaemonConfig;
pub use error::{ConfigError, RegistrationError, RouteError};
pub use registry::ServiceRegistry;
pub use tunnel::TunnelSet;
pub use types::{RegisterRequest, Service, ServiceName};

/// Version reported by `/_lohost/health` and `/_lohost/config`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
