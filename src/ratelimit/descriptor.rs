//! Rate key generation.

/// Namespace applied to keys in the shared store.
pub const REMOTE_NAMESPACE: &str = "refresh-rate-limit";

/// The identity under which quota is tracked: one client on one route.
///
/// Normalized client addresses never contain `/` and route paths always start
/// with one, so the first `/` in a rendered key separates the two parts and
/// distinct pairs always render to distinct strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateKey {
    /// Normalized client address, or `unknown`
    pub client: String,
    /// Request path
    pub route: String,
}

impl RateKey {
    /// Create a new rate key from a client address and a route path.
    pub fn new(client: impl Into<String>, route: impl Into<String>) -> Self {
        Self {
            client: client.into(),
            route: route.into(),
        }
    }

    /// Key used in the in-process table.
    pub fn local_key(&self) -> String {
        format!("{}:{}", self.client, self.route)
    }

    /// Key used in the shared store, namespaced to avoid colliding with other
    /// users of the same backend.
    pub fn remote_key(&self) -> String {
        format!("{}:{}:{}", REMOTE_NAMESPACE, self.client, self.route)
    }
}

impl std::fmt::Display for RateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.local_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_key() {
        let key = RateKey::new("203.0.113.7", "/api/refresh");
        assert_eq!(key.local_key(), "203.0.113.7:/api/refresh");
        assert_eq!(key.to_string(), key.local_key());
    }

    #[test]
    fn test_remote_key_is_namespaced() {
        let key = RateKey::new("2001:db8::1", "/api/auth/refresh");
        assert_eq!(
            key.remote_key(),
            "refresh-rate-limit:2001:db8::1:/api/auth/refresh"
        );
        assert_ne!(key.remote_key(), key.local_key());
    }

    #[test]
    fn test_distinct_pairs_never_collide() {
        let a = RateKey::new("ab:cd::1", "/x");
        let b = RateKey::new("ab", "/x:cd::1");
        let c = RateKey::new("ab:cd::1", "/y");

        assert_ne!(a.local_key(), b.local_key());
        assert_ne!(a.remote_key(), b.remote_key());
        assert_ne!(a.local_key(), c.local_key());
    }

    #[test]
    fn test_key_is_stable() {
        let a = RateKey::new("unknown", "/api/refresh");
        let b = RateKey::new("unknown".to_string(), "/api/refresh".to_string());
        assert_eq!(a, b);
        assert_eq!(a.remote_key(), b.remote_key());
    }
}
