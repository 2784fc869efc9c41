//! Domain types shared by the daemon and the client bridge.
//!
//! JSON field names follow the control API (`camelCase`); filesystem paths
//! are always `PathBuf`.

use std::borrow::Borrow;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RegistrationError;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A dot-delimited routing name, e.g. `myapp` or `c.myapp`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceName(pub String);

impl ServiceName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ServiceName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ServiceName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl Borrow<str> for ServiceName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Registry entries
// ---------------------------------------------------------------------------

/// One registered backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub name: ServiceName,
    /// Unix socket the backend's bridge listens on. Routing dials this.
    pub socket_path: PathBuf,
    /// TCP port of the wrapped process. Reported only, never dialed.
    pub port: u16,
    pub registered_at: DateTime<Utc>,
}

/// A validated `POST /_lohost/register` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub name: ServiceName,
    pub socket_path: PathBuf,
    pub port: u16,
}

impl RegisterRequest {
    pub fn new(name: impl Into<ServiceName>, socket_path: impl Into<PathBuf>, port: u16) -> Self {
        Self {
            name: name.into(),
            socket_path: socket_path.into(),
            port,
        }
    }

    /// Parse and validate a raw request body.
    ///
    /// Unparsable JSON is [`RegistrationError::InvalidJson`]; a body that
    /// parses but lacks a non-empty `name`, a non-empty `socketPath`, or a
    /// non-zero `port` is [`RegistrationError::MissingFields`].
    pub fn parse(body: &[u8]) -> Result<Self, RegistrationError> {
        let value: Value = serde_json::from_slice(body)?;

        let name = non_empty_str(&value, "name");
        let socket_path = non_empty_str(&value, "socketPath");
        let port = value.get("port").and_then(Value::as_u64).filter(|p| *p != 0);

        let (Some(name), Some(socket_path), Some(port)) = (name, socket_path, port) else {
            return Err(RegistrationError::MissingFields);
        };
        let port = u16::try_from(port).map_err(|_| RegistrationError::PortOutOfRange(port))?;

        Ok(Self::new(name, socket_path, port))
    }
}

fn non_empty_str<'a>(value: &'a Value, field: &str) -> Option<&'a str> {
    value
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
