//! Process-wide tunnel registry.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::tunnel::Tunnel;

/// Maps tunnel name to its live entry.
///
/// Lookups dominate (every relayed request does one), so the map sits behind
/// a reader/writer lock. Callers must release the lock before any channel
/// send/receive or I/O; every method here returns owned `Arc`s for that
/// reason.
#[derive(Clone, Default)]
pub struct TunnelRegistry {
    tunnels: Arc<RwLock<HashMap<String, Arc<Tunnel>>>>,
}

impl TunnelRegistry {
    pub fn new() -> Self {
        Self {
            tunnels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Insert an entry. The caller has already ensured the name is unused
    /// via the minting loop.
    pub fn insert(&self, tunnel: Arc<Tunnel>) {
        let mut tunnels = self.tunnels.write().unwrap();
        tunnels.insert(tunnel.name().to_string(), tunnel);
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<Tunnel>> {
        let tunnels = self.tunnels.read().unwrap();
        tunnels.get(name).cloned()
    }

    /// Remove an entry. Idempotent.
    pub fn remove(&self, name: &str) -> Option<Arc<Tunnel>> {
        let mut tunnels = self.tunnels.write().unwrap();
        tunnels.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        let tunnels = self.tunnels.read().unwrap();
        tunnels.contains_key(name)
    }

    pub fn count(&self) -> usize {
        let tunnels = self.tunnels.read().unwrap();
        tunnels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;

    fn test_tunnel(name: &str) -> Arc<Tunnel> {
        let (tunnel, _stop_rx) = Tunnel::new(name.to_string(), &RelayConfig::default());
        tunnel
    }

    #[tokio::test]
    async fn insert_lookup_remove() {
        let registry = TunnelRegistry::new();
        registry.insert(test_tunnel("svc-abc"));

        assert!(registry.contains("svc-abc"));
        assert_eq!(registry.count(), 1);
        assert_eq!(registry.lookup("svc-abc").unwrap().name(), "svc-abc");

        assert!(registry.remove("svc-abc").is_some());
        assert!(registry.lookup("svc-abc").is_none());
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let registry = TunnelRegistry::new();
        registry.insert(test_tunnel("svc-abc"));

        assert!(registry.remove("svc-abc").is_some());
        assert!(registry.remove("svc-abc").is_none());
    }

    #[tokio::test]
    async fn lookup_missing() {
        let registry = TunnelRegistry::new();
        assert!(registry.lookup("nope-123").is_none());
    }
}
