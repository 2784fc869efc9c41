//! Control-API payloads and the client used by the bridge and the CLI.
//!
//! Every control route lives under [`CONTROL_PREFIX`] so it can never collide
//! with a routed name. Requests are plain HTTP/1.1 over loopback TCP with
//! JSON bodies.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::header::{CONTENT_TYPE, HOST};
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;

use lohost_core::{DaemonConfig, RegisterRequest, Service};

use crate::error::{io_err, DaemonError};

pub const CONTROL_PREFIX: &str = "/_lohost";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// `GET /_lohost/health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub version: String,
    /// Whole seconds since the daemon started listening.
    pub uptime: u64,
    /// Number of registered services.
    pub services: usize,
}

/// `GET /_lohost/config`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigReport {
    pub version: String,
    pub port: u16,
    pub route_domain: String,
    pub socket_dir: PathBuf,
}

impl ConfigReport {
    pub fn from_config(config: &DaemonConfig) -> Self {
        Self {
            version: lohost_core::VERSION.to_string(),
            port: config.port,
            route_domain: config.route_domain.clone(),
            socket_dir: config.socket_dir.clone(),
        }
    }
}

/// One element of `GET /_lohost/services`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceEntry {
    pub name: String,
    pub port: u16,
    pub socket_path: PathBuf,
    pub url: String,
    pub registered_at: DateTime<Utc>,
}

impl ServiceEntry {
    pub fn from_service(service: &Service, config: &DaemonConfig) -> Self {
        Self {
            name: service.name.to_string(),
            port: service.port,
            socket_path: service.socket_path.clone(),
            url: config.service_url(&service.name),
            registered_at: service.registered_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    url: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Talks to a daemon's control API on loopback.
#[derive(Debug, Clone)]
pub struct ControlClient {
    addr: SocketAddr,
    timeout: Duration,
}

impl ControlClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn for_config(config: &DaemonConfig) -> Self {
        Self::new(config.control_addr())
    }

    /// Upper bound for one whole request, connect included.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn health(&self) -> Result<HealthReport, DaemonError> {
        let value = self.call(Method::GET, "/health", None).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn config(&self) -> Result<ConfigReport, DaemonError> {
        let value = self.call(Method::GET, "/config", None).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn services(&self) -> Result<Vec<ServiceEntry>, DaemonError> {
        let value = self.call(Method::GET, "/services", None).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// `None` when the name is not registered.
    pub async fn service(&self, name: &str) -> Result<Option<ServiceEntry>, DaemonError> {
        match self.call(Method::GET, &format!("/services/{name}"), None).await {
            Ok(value) => Ok(Some(serde_json::from_value(value)?)),
            Err(DaemonError::Api { status: 404, .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Register (or replace) a service; returns its external URL.
    pub async fn register(&self, request: &RegisterRequest) -> Result<String, DaemonError> {
        let body = serde_json::to_vec(request)?;
        let value = self.call(Method::POST, "/register", Some(body)).await?;
        let response: RegisterResponse = serde_json::from_value(value)?;
        Ok(response.url)
    }

    /// Returns `false` when the name was not registered.
    pub async fn deregister(&self, name: &str) -> Result<bool, DaemonError> {
        match self
            .call(Method::DELETE, &format!("/register/{name}"), None)
            .await
        {
            Ok(_) => Ok(true),
            Err(DaemonError::Api { status: 404, .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    pub async fn stop(&self) -> Result<(), DaemonError> {
        self.call(Method::POST, "/stop", None).await.map(|_| ())
    }

    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<Value, DaemonError> {
        let (status, value) = tokio::time::timeout(self.timeout, self.send(method, path, body))
            .await
            .map_err(|_| DaemonError::Timeout {
                addr: self.addr,
                timeout: self.timeout,
            })??;

        if status.is_success() {
            return Ok(value);
        }
        let message = value
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown daemon error")
            .to_string();
        Err(DaemonError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<(StatusCode, Value), DaemonError> {
        let stream = TcpStream::connect(self.addr).await.map_err(|err| {
            if matches!(
                err.kind(),
                std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::ConnectionReset
            ) {
                DaemonError::DaemonNotRunning { addr: self.addr }
            } else {
                io_err(format!("connect {}", self.addr), err)
            }
        })?;

        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
        tokio::spawn(async move {
            if let Err(err) = conn.await {
                tracing::debug!(error = %err, "control connection closed with error");
            }
        });

        let mut builder = Request::builder()
            .method(method)
            .uri(format!("{CONTROL_PREFIX}{path}"))
            .header(HOST, self.addr.to_string());
        if body.is_some() {
            builder = builder.header(CONTENT_TYPE, "application/json");
        }
        let request = builder.body(Full::new(Bytes::from(body.unwrap_or_default())))?;

        let response = sender.send_request(request).await?;
        let status = response.status();
        let bytes = response.into_body().collect().await?.to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };
        Ok((status, value))
    }
}
