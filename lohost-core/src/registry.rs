//! In-memory service registry.
//!
//! One entry per name; re-registration replaces the entry wholesale. The
//! registry is owned by a single daemon instance and empty on every start.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::error::RouteError;
use crate::routing::{routing_key, suffix_candidates};
use crate::types::{RegisterRequest, Service, ServiceName};

#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: HashMap<ServiceName, Service>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Insert or fully replace the entry for `request.name`.
    pub fn register(&mut self, request: RegisterRequest) -> &Service {
        self.register_at(request, Utc::now())
    }

    pub fn register_at(&mut self, request: RegisterRequest, now: DateTime<Utc>) -> &Service {
        let service = Service {
            name: request.name.clone(),
            socket_path: request.socket_path,
            port: request.port,
            registered_at: now,
        };
        self.services.insert(request.name.clone(), service);
        &self.services[request.name.as_str()]
    }

    pub fn deregister(&mut self, name: &str) -> Option<Service> {
        self.services.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&Service> {
        self.services.get(name)
    }

    /// All entries, sorted by name.
    pub fn snapshot(&self) -> Vec<Service> {
        let mut services: Vec<Service> = self.services.values().cloned().collect();
        services.sort_by(|a, b| a.name.cmp(&b.name));
        services
    }

    /// Longest-suffix match of a routing key against registered names.
    pub fn resolve(&self, key: &str) -> Option<&Service> {
        suffix_candidates(key).find_map(|candidate| self.services.get(candidate))
    }

    /// `Host` header → registered service, or the routing error to report.
    ///
    /// Host names are case-insensitive; the key is lower-cased before lookup,
    /// matching the lower-case names `lohost run` registers.
    pub fn route(&self, host: Option<&str>, route_domain: &str) -> Result<&Service, RouteError> {
        let key = routing_key(host, route_domain)?.to_ascii_lowercase();
        self.resolve(&key).ok_or(RouteError::NoService { key })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(names: &[&str]) -> ServiceRegistry {
        let mut registry = ServiceRegistry::new();
        for (idx, name) in names.iter().enumerate() {
            registry.register(RegisterRequest::new(
                *name,
                format!("/tmp/{name}.sock"),
                9000 + idx as u16,
            ));
        }
        registry
    }

    #[test]
    fn nested_subdomain_resolves_to_parent_name() {
        let registry = registry_with(&["myapp"]);
        let service = registry
            .route(Some("user1.myapp.localhost:8080"), "localhost")
            .expect("route");
        assert_eq!(service.name.as_str(), "myapp");
    }

    #[test]
    fn unknown_name_reports_attempted_key() {
        let registry = registry_with(&["myapp"]);
        let err = registry
            .route(Some("other.localhost:8080"), "localhost")
            .unwrap_err();
        assert_eq!(
            err,
            RouteError::NoService {
                key: "other".to_string()
            }
        );
    }

    #[test]
    fn most_specific_registration_wins() {
        let registry = registry_with(&["myapp", "c.myapp"]);
        let deep = registry.route(Some("x.c.myapp.localhost:8080"), "localhost");
        assert_eq!(deep.expect("route").name.as_str(), "c.myapp");
        let shallow = registry.route(Some("y.myapp.localhost:8080"), "localhost");
        assert_eq!(shallow.expect("route").name.as_str(), "myapp");
    }

    #[test]
    fn reregistration_replaces_entry() {
        let mut registry = registry_with(&["api"]);
        registry.register(RegisterRequest::new("api", "/tmp/other.sock", 9100));

        assert_eq!(registry.len(), 1);
        let service = registry.get("api").expect("entry");
        assert_eq!(service.socket_path.to_str(), Some("/tmp/other.sock"));
        assert_eq!(service.port, 9100);
    }

    #[test]
    fn deregister_removes_entry_from_lookups_and_snapshot() {
        let mut registry = registry_with(&["api", "web"]);
        let removed = registry.deregister("api").expect("removed");
        assert_eq!(removed.name.as_str(), "api");
        assert!(registry.get("api").is_none());
        assert!(registry.resolve("api").is_none());
        assert!(registry.deregister("api").is_none());

        let names: Vec<String> = registry.snapshot().into_iter().map(|s| s.name.0).collect();
        assert_eq!(names, vec!["web"]);
    }

    #[test]
    fn snapshot_is_sorted_by_name() {
        let registry = registry_with(&["zeta", "alpha", "c.myapp", "myapp"]);
        let names: Vec<String> = registry.snapshot().into_iter().map(|s| s.name.0).collect();
        assert_eq!(names, vec!["alpha", "c.myapp", "myapp", "zeta"]);
    }
}
