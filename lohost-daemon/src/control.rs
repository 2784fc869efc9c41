//! Control API handlers under `/_lohost`.

use std::time::Duration;

use bytes::Bytes;
use http::header::{
    HeaderMap, HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_MAX_AGE,
};
use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Limited};
use hyper::body::Body;
use serde_json::json;

use lohost_core::{RegisterRequest, RegistrationError};

use crate::body::{empty_response, json_response, ProxyBody};
use crate::protocol::{ConfigReport, HealthReport, ServiceEntry, CONTROL_PREFIX};
use crate::runtime::DaemonState;

const MAX_REGISTER_BODY: usize = 64 * 1024;
const STOP_GRACE: Duration = Duration::from_millis(100);

pub(crate) fn is_control_path(path: &str) -> bool {
    path.strip_prefix(CONTROL_PREFIX)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

pub(crate) async fn handle<B>(req: Request<B>, state: &DaemonState) -> Response<ProxyBody>
where
    B: Body<Data = Bytes>,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    let path = req
        .uri()
        .path()
        .strip_prefix(CONTROL_PREFIX)
        .unwrap_or_default()
        .to_string();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let method = req.method().clone();

    let mut response = if method == Method::OPTIONS {
        empty_response(StatusCode::NO_CONTENT)
    } else {
        match (&method, segments.as_slice()) {
            (&Method::GET, ["health"]) => health(state).await,
            (&Method::GET, ["config"]) => {
                json_response(StatusCode::OK, &json!(ConfigReport::from_config(&state.config)))
            }
            (&Method::GET, ["services"]) => list_services(state).await,
            (&Method::GET, ["services", name]) => get_service(state, name).await,
            (&Method::POST, ["register"]) => register(req, state).await,
            (&Method::DELETE, ["register", name]) => deregister(state, name).await,
            (&Method::POST, ["stop"]) => stop(state),
            (_, ["health" | "config" | "services" | "register" | "stop"])
            | (_, ["services" | "register", _]) => json_response(
                StatusCode::METHOD_NOT_ALLOWED,
                &json!({ "error": format!("method {method} not allowed on {CONTROL_PREFIX}{path}") }),
            ),
            _ => json_response(
                StatusCode::NOT_FOUND,
                &json!({ "error": format!("unknown control path {CONTROL_PREFIX}{path}") }),
            ),
        }
    };

    apply_cors(response.headers_mut());
    response
}

async fn health(state: &DaemonState) -> Response<ProxyBody> {
    let services = state.registry.read().await.len();
    let report = HealthReport {
        status: "ok".to_string(),
        version: lohost_core::VERSION.to_string(),
        uptime: state.started_at.elapsed().as_secs(),
        services,
    };
    json_response(StatusCode::OK, &json!(report))
}

async fn list_services(state: &DaemonState) -> Response<ProxyBody> {
    let snapshot = state.registry.read().await.snapshot();
    let entries: Vec<ServiceEntry> = snapshot
        .iter()
        .map(|service| ServiceEntry::from_service(service, &state.config))
        .collect();
    json_response(StatusCode::OK, &json!(entries))
}

async fn get_service(state: &DaemonState, name: &str) -> Response<ProxyBody> {
    let registry = state.registry.read().await;
    match registry.get(name) {
        Some(service) => json_response(
            StatusCode::OK,
            &json!(ServiceEntry::from_service(service, &state.config)),
        ),
        None => json_response(
            StatusCode::NOT_FOUND,
            &json!({ "error": "service not found", "name": name }),
        ),
    }
}

async fn register<B>(req: Request<B>, state: &DaemonState) -> Response<ProxyBody>
where
    B: Body<Data = Bytes>,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    let bytes = match Limited::new(req.into_body(), MAX_REGISTER_BODY).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            tracing::warn!(error = %err, "failed to read register body");
            return json_response(
                StatusCode::BAD_REQUEST,
                &json!({ "error": "invalid JSON body" }),
            );
        }
    };

    let request = match RegisterRequest::parse(&bytes) {
        Ok(request) => request,
        Err(RegistrationError::InvalidJson(err)) => {
            tracing::debug!(error = %err, "unparsable register body");
            return json_response(
                StatusCode::BAD_REQUEST,
                &json!({ "error": "invalid JSON body" }),
            );
        }
        Err(err) => {
            return json_response(StatusCode::BAD_REQUEST, &json!({ "error": err.to_string() }));
        }
    };

    let url = state.config.service_url(&request.name);
    let mut registry = state.registry.write().await;
    let service = registry.register(request);
    tracing::info!(
        name = %service.name,
        socket = %service.socket_path.display(),
        port = service.port,
        "service registered",
    );
    json_response(StatusCode::OK, &json!({ "url": url }))
}

async fn deregister(state: &DaemonState, name: &str) -> Response<ProxyBody> {
    let removed = state.registry.write().await.deregister(name);
    match removed {
        Some(service) => {
            tracing::info!(name = %service.name, "service deregistered");
            json_response(StatusCode::OK, &json!({ "removed": name }))
        }
        None => json_response(
            StatusCode::NOT_FOUND,
            &json!({ "error": format!("service '{name}' is not registered") }),
        ),
    }
}

fn stop(state: &DaemonState) -> Response<ProxyBody> {
    tracing::info!("stop requested over control API");
    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        // Let the response reach the caller before the listener goes away.
        tokio::time::sleep(STOP_GRACE).await;
        let _ = shutdown.send(());
    });
    json_response(StatusCode::OK, &json!({ "stopping": true }))
}

fn apply_cors(headers: &mut HeaderMap) {
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, DELETE, OPTIONS"),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    headers.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("86400"));
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use http_body_util::Full;
    use lohost_core::DaemonConfig;
    use serde_json::Value;

    use super::*;

    fn state() -> Arc<DaemonState> {
        DaemonState::new(DaemonConfig {
            port: 8080,
            route_domain: "localhost".to_string(),
            socket_dir: "/tmp/lohost".into(),
        })
    }

    fn request(method: Method, path: &str, body: &str) -> Request<Full<Bytes>> {
        Request::builder()
            .method(method)
            .uri(path)
            .body(Full::new(Bytes::from(body.to_string())))
            .expect("request")
    }

    async fn call(state: &DaemonState, method: Method, path: &str, body: &str) -> (StatusCode, Value) {
        let response = handle(request(method, path, body), state).await;
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, value)
    }

    #[test]
    fn control_prefix_matching() {
        assert!(is_control_path("/_lohost"));
        assert!(is_control_path("/_lohost/health"));
        assert!(!is_control_path("/_lohostile"));
        assert!(!is_control_path("/health"));
    }

    #[tokio::test]
    async fn register_then_get_returns_same_triple() {
        let state = state();
        let (status, body) = call(
            &state,
            Method::POST,
            "/_lohost/register",
            r#"{"name":"api","socketPath":"/tmp/api.sock","port":9001}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["url"], "http://api.localhost:8080");

        let (status, entry) = call(&state, Method::GET, "/_lohost/services/api", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(entry["name"], "api");
        assert_eq!(entry["socketPath"], "/tmp/api.sock");
        assert_eq!(entry["port"], 9001);
    }

    #[tokio::test]
    async fn register_missing_port_leaves_registry_untouched() {
        let state = state();
        let (status, body) = call(
            &state,
            Method::POST,
            "/_lohost/register",
            r#"{"name":"api","socketPath":"/tmp/api.sock"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().is_some());

        let (_, services) = call(&state, Method::GET, "/_lohost/services", "").await;
        assert_eq!(services, serde_json::json!([]));
    }

    #[tokio::test]
    async fn register_with_garbage_body_is_generic_parse_error() {
        let state = state();
        let (status, body) = call(&state, Method::POST, "/_lohost/register", "{oops").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid JSON body");
    }

    #[tokio::test]
    async fn deregister_unknown_name_is_404() {
        let state = state();
        let (status, body) = call(&state, Method::DELETE, "/_lohost/register/ghost", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().is_some());
    }

    #[tokio::test]
    async fn unknown_service_lookup_names_the_key() {
        let state = state();
        let (status, body) = call(&state, Method::GET, "/_lohost/services/ghost", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["name"], "ghost");
    }

    #[tokio::test]
    async fn preflight_is_empty_204_with_cors() {
        let state = state();
        let response = handle(request(Method::OPTIONS, "/_lohost/register", ""), &state).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            response.headers().get(ACCESS_CONTROL_ALLOW_ORIGIN),
            Some(&HeaderValue::from_static("*"))
        );
    }

    #[tokio::test]
    async fn cors_headers_on_success_and_error_responses() {
        let state = state();
        for (method, path, status) in [
            (Method::GET, "/_lohost/health", StatusCode::OK),
            (Method::GET, "/_lohost/services/ghost", StatusCode::NOT_FOUND),
            (Method::DELETE, "/_lohost/health", StatusCode::METHOD_NOT_ALLOWED),
            (Method::POST, "/_lohost/register", StatusCode::BAD_REQUEST),
        ] {
            let response = handle(request(method.clone(), path, "{oops"), &state).await;
            assert_eq!(response.status(), status, "{method} {path}");
            let headers = response.headers();
            assert_eq!(
                headers.get(ACCESS_CONTROL_ALLOW_ORIGIN),
                Some(&HeaderValue::from_static("*")),
                "{method} {path}"
            );
            assert!(headers.contains_key(ACCESS_CONTROL_ALLOW_METHODS), "{method} {path}");
            assert!(headers.contains_key(ACCESS_CONTROL_ALLOW_HEADERS), "{method} {path}");
        }
    }

    #[tokio::test]
    async fn wrong_method_and_unknown_path() {
        let state = state();
        let (status, _) = call(&state, Method::DELETE, "/_lohost/health", "").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        let (status, _) = call(&state, Method::GET, "/_lohost/nope", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn stop_replies_then_signals_shutdown() {
        let state = state();
        let mut shutdown_rx = state.shutdown.subscribe();
        let (status, body) = call(&state, Method::POST, "/_lohost/stop", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["stopping"], true);

        tokio::time::timeout(Duration::from_secs(2), shutdown_rx.recv())
            .await
            .expect("shutdown within grace")
            .expect("shutdown signal");
    }
}
