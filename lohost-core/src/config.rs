//! Daemon configuration.
//!
//! Built once (CLI flag > environment > default) and never mutated after the
//! daemon starts. The only environment reads go through [`DaemonConfig::from_lookup`];
//! the router and bridge receive the struct explicitly.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::ServiceName;

pub const ENV_PORT: &str = "LOHOST_PORT";
pub const ENV_DOMAIN: &str = "LOHOST_DOMAIN";
pub const ENV_SOCKET_DIR: &str = "LOHOST_SOCKET_DIR";

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_ROUTE_DOMAIN: &str = "localhost";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonConfig {
    pub port: u16,
    pub route_domain: String,
    pub socket_dir: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            route_domain: DEFAULT_ROUTE_DOMAIN.to_string(),
            socket_dir: default_socket_dir(),
        }
    }
}

impl DaemonConfig {
    /// Read `LOHOST_*` variables from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; blank values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(raw) = get(ENV_PORT) {
            config.port = raw.trim().parse().map_err(|_| ConfigError::InvalidPort {
                var: ENV_PORT,
                value: raw.clone(),
            })?;
        }
        if let Some(domain) = get(ENV_DOMAIN) {
            config.route_domain = normalize_domain(&domain)?;
        }
        if let Some(dir) = get(ENV_SOCKET_DIR) {
            config.socket_dir = PathBuf::from(dir);
        }
        Ok(config)
    }

    /// Apply command-line overrides on top of the environment.
    pub fn with_overrides(
        mut self,
        port: Option<u16>,
        route_domain: Option<&str>,
        socket_dir: Option<&Path>,
    ) -> Result<Self, ConfigError> {
        if let Some(port) = port {
            self.port = port;
        }
        if let Some(domain) = route_domain {
            self.route_domain = normalize_domain(domain)?;
        }
        if let Some(dir) = socket_dir {
            self.socket_dir = dir.to_path_buf();
        }
        Ok(self)
    }

    /// Environment handed to a spawned daemon so it inherits this config.
    pub fn to_env(&self) -> Vec<(&'static str, String)> {
        vec![
            (ENV_PORT, self.port.to_string()),
            (ENV_DOMAIN, self.route_domain.clone()),
            (ENV_SOCKET_DIR, self.socket_dir.display().to_string()),
        ]
    }

    /// Loopback address of the daemon's listener and control API.
    pub fn control_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, self.port))
    }

    /// `{socketDir}/{name}.sock`: stable across invocations for one name.
    pub fn socket_path_for(&self, name: &ServiceName) -> PathBuf {
        self.socket_dir.join(format!("{name}.sock"))
    }

    /// Externally visible URL of a registered name.
    pub fn service_url(&self, name: &ServiceName) -> String {
        format!("http://{name}.{}:{}", self.route_domain, self.port)
    }
}

fn normalize_domain(raw: &str) -> Result<String, ConfigError> {
    let domain = raw.trim().trim_matches('.').to_ascii_lowercase();
    if domain.is_empty() {
        return Err(ConfigError::EmptyDomain);
    }
    Ok(domain)
}

fn default_socket_dir() -> PathBuf {
    std::env::temp_dir().join("lohost")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_environment_is_empty() {
        let config = DaemonConfig::from_lookup(lookup(&[])).expect("config");
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.route_domain, "localhost");
        assert!(config.socket_dir.ends_with("lohost"));
    }

    #[test]
    fn environment_values_are_read_and_normalized() {
        let config = DaemonConfig::from_lookup(lookup(&[
            (ENV_PORT, "9090"),
            (ENV_DOMAIN, ".Test."),
            (ENV_SOCKET_DIR, "/run/lohost"),
        ]))
        .expect("config");
        assert_eq!(config.port, 9090);
        assert_eq!(config.route_domain, "test");
        assert_eq!(config.socket_dir, PathBuf::from("/run/lohost"));
    }

    #[test]
    fn invalid_port_is_rejected() {
        let err = DaemonConfig::from_lookup(lookup(&[(ENV_PORT, "eighty")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidPort {
                var: ENV_PORT,
                value: "eighty".to_string()
            }
        );
    }

    #[test]
    fn to_env_round_trips_through_lookup() {
        let original = DaemonConfig {
            port: 4321,
            route_domain: "dev".to_string(),
            socket_dir: PathBuf::from("/tmp/socks"),
        };
        let env: HashMap<String, String> = original
            .to_env()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let rebuilt = DaemonConfig::from_lookup(|key| env.get(key).cloned()).expect("config");
        assert_eq!(rebuilt, original);
    }

    #[test]
    fn derived_paths_and_urls() {
        let config = DaemonConfig {
            port: 8080,
            route_domain: "localhost".to_string(),
            socket_dir: PathBuf::from("/tmp/lohost"),
        };
        let name = ServiceName::from("api");
        assert_eq!(config.socket_path_for(&name), PathBuf::from("/tmp/lohost/api.sock"));
        assert_eq!(config.service_url(&name), "http://api.localhost:8080");
        assert_eq!(config.control_addr().to_string(), "127.0.0.1:8080");
    }
}
