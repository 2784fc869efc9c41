//! Registry routing behaviour through the public API.

use chrono::{TimeZone, Utc};
use lohost_core::{RegisterRequest, RouteError, ServiceRegistry};
use rstest::rstest;

fn registry(names: &[&str]) -> ServiceRegistry {
    let mut registry = ServiceRegistry::new();
    for name in names {
        registry.register(RegisterRequest::new(*name, format!("/tmp/lohost/{name}.sock"), 9001));
    }
    registry
}

// ---------------------------------------------------------------------------
// 1. Longest-suffix routing
// ---------------------------------------------------------------------------

#[rstest]
#[case("api.localhost:8080", "api")]
#[case("v2.api.localhost:8080", "api")]
#[case("a.b.c.api.localhost", "api")]
#[case("x.c.myapp.localhost:8080", "c.myapp")]
#[case("c.myapp.localhost:8080", "c.myapp")]
#[case("y.myapp.localhost:8080", "myapp")]
#[case("API.localhost:8080", "api")]
#[case("Api.LOCALHOST", "api")]
#[case("User1.MyApp.localhost", "myapp")]
#[case("X.C.MYAPP.localhost", "c.myapp")]
fn routes_to_most_specific_name(#[case] host: &str, #[case] expected: &str) {
    let registry = registry(&["api", "myapp", "c.myapp"]);
    let service = registry.route(Some(host), "localhost").expect("route");
    assert_eq!(service.name.as_str(), expected);
}

#[test]
fn route_errors_distinguish_bad_host_from_unknown_name() {
    let registry = registry(&["api"]);

    let bad = registry.route(Some("api.example.com"), "localhost").unwrap_err();
    assert!(matches!(bad, RouteError::OutsideDomain { .. }));

    let unknown = registry.route(Some("web.localhost"), "localhost").unwrap_err();
    assert_eq!(unknown.to_string(), "no service registered for 'web'");

    let shouting = registry.route(Some("WEB.localhost"), "localhost").unwrap_err();
    assert_eq!(
        shouting,
        RouteError::NoService {
            key: "web".to_string()
        }
    );

    let garbled = registry.route(Some("\u{e4}pi.localhost"), "localhost").unwrap_err();
    assert!(matches!(garbled, RouteError::MalformedHost { .. }));
}

#[test]
fn custom_route_domain_is_honoured() {
    let registry = registry(&["api"]);
    assert!(registry.route(Some("api.test:80"), "test").is_ok());
    assert!(registry.route(Some("api.localhost:80"), "test").is_err());
}

// ---------------------------------------------------------------------------
// 2. Overlapping names
// ---------------------------------------------------------------------------

#[test]
fn dotted_name_only_shadows_its_own_subtree() {
    let registry = registry(&["b", "a.b"]);
    assert_eq!(registry.resolve("a.b").expect("a.b").name.as_str(), "a.b");
    assert_eq!(registry.resolve("z.a.b").expect("z.a.b").name.as_str(), "a.b");
    assert_eq!(registry.resolve("z.b").expect("z.b").name.as_str(), "b");
}

#[test]
fn last_registration_wins_per_exact_name() {
    let mut registry = ServiceRegistry::new();
    let first = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().expect("ts");
    let second = Utc.with_ymd_and_hms(2026, 1, 1, 0, 5, 0).single().expect("ts");

    registry.register_at(RegisterRequest::new("api", "/tmp/one.sock", 9001), first);
    registry.register_at(RegisterRequest::new("api", "/tmp/two.sock", 9002), second);

    let entries = registry.snapshot();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].socket_path.to_str(), Some("/tmp/two.sock"));
    assert_eq!(entries[0].port, 9002);
    assert_eq!(entries[0].registered_at, second);
}
