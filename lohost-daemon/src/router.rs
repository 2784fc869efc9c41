//! Host-based forwarding to registered backends.
//!
//! Requests are relayed verbatim (method, path, every header including
//! `Host`) over a fresh HTTP/1.1 connection on the backend's Unix socket.
//! Upgrade requests get the backend's handshake response relayed back, after
//! which both raw streams are spliced until either side closes.

use http::header::{HeaderMap, HeaderValue, CONNECTION, HOST, UPGRADE};
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Empty};
use hyper::body::{Bytes, Incoming};
use hyper_util::rt::TokioIo;
use serde_json::json;
use tokio::net::UnixStream;

use lohost_core::{RouteError, Service, TunnelSet};

use crate::body::{json_response, ProxyBody};
use crate::runtime::DaemonState;

pub(crate) async fn forward(req: Request<Incoming>, state: &DaemonState) -> Response<ProxyBody> {
    let host = request_host(&req);
    let routed = {
        let registry = state.registry.read().await;
        registry
            .route(host.as_deref(), &state.config.route_domain)
            .cloned()
    };
    let service = match routed {
        Ok(service) => service,
        Err(err) => return route_error_response(&err, host.as_deref()),
    };

    tracing::debug!(
        name = %service.name,
        method = %req.method(),
        path = %req.uri().path(),
        "routing request",
    );

    let result = if is_upgrade_request(req.headers()) {
        forward_upgrade(req, &service, &state.tunnels).await
    } else {
        forward_http(req, &service).await
    };
    result.unwrap_or_else(|err| bad_gateway(&service, &err))
}

async fn forward_http(
    req: Request<Incoming>,
    service: &Service,
) -> Result<Response<ProxyBody>, BackendError> {
    let stream = UnixStream::connect(&service.socket_path)
        .await
        .map_err(BackendError::Connect)?;
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;

    let name = service.name.clone();
    tokio::spawn(async move {
        // Errors here happen mid-stream, after the response head went out.
        if let Err(err) = conn.await {
            tracing::warn!(name = %name, error = %err, "backend connection dropped");
        }
    });

    let response = sender.send_request(req).await?;
    Ok(response.map(|body| body.boxed()))
}

async fn forward_upgrade(
    mut req: Request<Incoming>,
    service: &Service,
    tunnels: &TunnelSet,
) -> Result<Response<ProxyBody>, BackendError> {
    let client_upgrade = hyper::upgrade::on(&mut req);
    let (mut parts, _body) = req.into_parts();
    parts.headers = without_empty_values(&parts.headers);
    let upstream = Request::from_parts(parts, Empty::<Bytes>::new());

    let stream = UnixStream::connect(&service.socket_path)
        .await
        .map_err(BackendError::Connect)?;
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;

    let name = service.name.clone();
    tokio::spawn(async move {
        if let Err(err) = conn.with_upgrades().await {
            tracing::warn!(name = %name, error = %err, "backend upgrade connection failed");
        }
    });

    let mut response = sender.send_request(upstream).await?;
    if response.status() != StatusCode::SWITCHING_PROTOCOLS {
        // Backend declined the upgrade; relay its answer as a normal response.
        return Ok(response.map(|body| body.boxed()));
    }

    let backend_upgrade = hyper::upgrade::on(&mut response);
    let tunnels = tunnels.clone();
    let name = service.name.clone();
    tokio::spawn(async move {
        match tokio::try_join!(client_upgrade, backend_upgrade) {
            Ok((client, backend)) => {
                tracing::debug!(name = %name, "upgrade established");
                tunnels.splice(
                    TokioIo::new(client),
                    TokioIo::new(backend),
                    format!("upgrade:{name}"),
                );
            }
            Err(err) => {
                tracing::warn!(name = %name, error = %err, "upgrade handshake failed");
            }
        }
    });

    let (parts, _body) = response.into_parts();
    Ok(Response::from_parts(parts, crate::body::empty()))
}

#[derive(Debug, thiserror::Error)]
enum BackendError {
    #[error("connect failed: {0}")]
    Connect(#[source] std::io::Error),

    #[error("{0}")]
    Http(#[from] hyper::Error),
}

/// Raw `Host` value; non-UTF-8 bytes are kept (lossily) so routing can
/// report the header as malformed rather than missing.
fn request_host(req: &Request<Incoming>) -> Option<String> {
    req.headers()
        .get(HOST)
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
        .or_else(|| req.uri().authority().map(|a| a.as_str().to_owned()))
}

/// `Connection: upgrade` (token match) together with an `Upgrade` header.
pub(crate) fn is_upgrade_request(headers: &HeaderMap) -> bool {
    let connection_upgrade = headers.get_all(CONNECTION).iter().any(|value| {
        value
            .to_str()
            .map(|v| v.split(',').any(|token| token.trim().eq_ignore_ascii_case("upgrade")))
            .unwrap_or(false)
    });
    connection_upgrade && headers.contains_key(UPGRADE)
}

pub(crate) fn without_empty_values(headers: &HeaderMap) -> HeaderMap {
    let mut kept = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !value.as_bytes().iter().all(u8::is_ascii_whitespace) {
            kept.append(name.clone(), value.clone());
        }
    }
    kept
}

fn route_error_response(err: &RouteError, host: Option<&str>) -> Response<ProxyBody> {
    match err {
        RouteError::MissingHost
        | RouteError::MalformedHost { .. }
        | RouteError::OutsideDomain { .. } => json_response(
            StatusCode::BAD_REQUEST,
            &json!({ "error": err.to_string(), "host": host }),
        ),
        RouteError::NoService { key } => json_response(
            StatusCode::NOT_FOUND,
            &json!({ "error": err.to_string(), "name": key }),
        ),
    }
}

fn bad_gateway(service: &Service, err: &BackendError) -> Response<ProxyBody> {
    tracing::warn!(
        name = %service.name,
        socket = %service.socket_path.display(),
        error = %err,
        "backend unavailable",
    );
    let mut response = json_response(
        StatusCode::BAD_GATEWAY,
        &json!({
            "error": "backend unavailable",
            "name": service.name.as_str(),
            "detail": err.to_string(),
        }),
    );
    response
        .headers_mut()
        .insert(CONNECTION, HeaderValue::from_static("close"));
    response
}
