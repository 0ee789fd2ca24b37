//! Protected route rules.
//!
//! Only requests that hit one of the listed paths with one of the listed methods
//! consume quota. Everything else passes through the admission layer untouched.

use serde::{Deserialize, Serialize};

/// The set of routes guarded by the admission layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedRoutes {
    /// Exact request paths to guard
    #[serde(default = "default_paths")]
    pub paths: Vec<String>,
    /// Methods that consume quota on a guarded path
    #[serde(default = "default_methods")]
    pub methods: Vec<String>,
}

fn default_paths() -> Vec<String> {
    vec!["/api/auth/refresh".to_string(), "/api/refresh".to_string()]
}

fn default_methods() -> Vec<String> {
    ["POST", "PUT", "PATCH", "DELETE"]
        .iter()
        .map(|m| m.to_string())
        .collect()
}

impl Default for ProtectedRoutes {
    fn default() -> Self {
        Self {
            paths: default_paths(),
            methods: default_methods(),
        }
    }
}

impl ProtectedRoutes {
    /// Create rules for an explicit set of paths with the default methods.
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
            methods: default_methods(),
        }
    }

    /// Whether the path is guarded at all.
    pub fn guards_path(&self, path: &str) -> bool {
        self.paths.iter().any(|p| p == path)
    }

    /// Whether the method consumes quota.
    pub fn counts_method(&self, method: &str) -> bool {
        self.methods.iter().any(|m| m.eq_ignore_ascii_case(method))
    }

    /// Whether a request with this method and path must be admitted.
    pub fn applies_to(&self, method: &str, path: &str) -> bool {
        self.counts_method(method) && self.guards_path(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_routes() {
        let rules = ProtectedRoutes::default();
        assert!(rules.applies_to("POST", "/api/refresh"));
        assert!(rules.applies_to("POST", "/api/auth/refresh"));
        assert!(rules.applies_to("DELETE", "/api/refresh"));
    }

    #[test]
    fn test_safe_methods_pass_through() {
        let rules = ProtectedRoutes::default();
        assert!(!rules.applies_to("GET", "/api/refresh"));
        assert!(!rules.applies_to("HEAD", "/api/refresh"));
        assert!(!rules.applies_to("OPTIONS", "/api/refresh"));
    }

    #[test]
    fn test_unlisted_paths_pass_through() {
        let rules = ProtectedRoutes::default();
        assert!(!rules.applies_to("POST", "/api/login"));
        assert!(!rules.applies_to("POST", "/api/refresh/"));
        assert!(!rules.applies_to("POST", "/api/refresh/extra"));
    }

    #[test]
    fn test_method_match_ignores_case() {
        let rules = ProtectedRoutes::default();
        assert!(rules.counts_method("post"));
    }
}
