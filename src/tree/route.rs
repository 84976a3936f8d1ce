//! Route definitions.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::Named;

/// Route mapping a match rule to a target service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Route {
    /// Unique route name.
    pub name: String,

    /// Match rule, e.g. ``Host(`api.example.com`) && PathPrefix(`/v1`)``.
    pub rule: String,

    /// Name of the service requests are forwarded to.
    pub service: String,

    /// Listener names this route is attached to (empty = all).
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub entry_points: BTreeSet<String>,

    /// Ordered middleware chain.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub middlewares: Vec<String>,

    /// Route priority (higher = checked first).
    #[serde(default)]
    pub priority: i64,

    /// Terminate TLS for this route.
    #[serde(default)]
    pub tls: bool,

    /// Certificate resolver used when `tls` is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_resolver: Option<String>,
}

impl Route {
    pub fn new(name: impl Into<String>, rule: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rule: rule.into(),
            service: service.into(),
            entry_points: BTreeSet::new(),
            middlewares: Vec::new(),
            priority: 0,
            tls: false,
            cert_resolver: None,
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_middleware(mut self, middleware: impl Into<String>) -> Self {
        self.middlewares.push(middleware.into());
        self
    }

    pub fn with_entry_point(mut self, entry_point: impl Into<String>) -> Self {
        self.entry_points.insert(entry_point.into());
        self
    }

    /// True when both routes can receive traffic from a common listener.
    pub fn shares_entry_point(&self, other: &Route) -> bool {
        self.entry_points.is_empty()
            || other.entry_points.is_empty()
            || !self.entry_points.is_disjoint(&other.entry_points)
    }
}

impl Named for Route {
    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toml_shape() {
        let route = Route::new("api", "Host(`api.example.com`)", "api-backend")
            .with_priority(10)
            .with_entry_point("websecure");
        let text = toml::to_string(&route).unwrap();
        assert!(text.contains("name = \"api\""));
        assert!(text.contains("entry_points = [\"websecure\"]"));
        assert!(!text.contains("cert_resolver"));

        let back: Route = toml::from_str(&text).unwrap();
        assert_eq!(back, route);
    }

    #[test]
    fn test_shares_entry_point() {
        let all = Route::new("a", "Path(`/`)", "s");
        let web = Route::new("b", "Path(`/`)", "s").with_entry_point("web");
        let secure = Route::new("c", "Path(`/`)", "s").with_entry_point("websecure");

        assert!(all.shares_entry_point(&web));
        assert!(web.shares_entry_point(&web.clone()));
        assert!(!web.shares_entry_point(&secure));
    }
}
