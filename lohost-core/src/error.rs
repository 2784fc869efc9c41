//! Error types for lohost-core.

use thiserror::Error;

/// Failures turning an inbound `Host` header into a registered service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    /// The request carried no usable `Host` header.
    #[error("missing Host header")]
    MissingHost,

    /// The `Host` header holds bytes no hostname can contain.
    #[error("malformed Host header '{host}'")]
    MalformedHost { host: String },

    /// The host (minus port) is not a subdomain of the route domain.
    #[error("host '{host}' is not under .{domain}")]
    OutsideDomain { host: String, domain: String },

    /// No registered name is a trailing-segment match of the routing key.
    #[error("no service registered for '{key}'")]
    NoService { key: String },
}

/// Rejections of a `register` request body. The registry is never touched
/// when one of these is returned.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("invalid JSON body: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("name, socketPath, and port are required")]
    MissingFields,

    #[error("port {0} is out of range")]
    PortOutOfRange(u64),
}

/// Invalid daemon configuration values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{var} must be a TCP port number, got '{value}'")]
    InvalidPort { var: &'static str, value: String },

    #[error("route domain must not be empty")]
    EmptyDomain,
}
