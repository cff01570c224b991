//! Relay configuration snapshot, read once at startup.

use std::time::Duration;

/// Value snapshot of the relay's tunable knobs.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Tunnel is torn down after this long without a qualifying operation
    /// (agent poll or external request).
    pub inactivity_ttl: Duration,
    /// Tunnel is torn down this long after creation regardless of activity.
    pub max_ttl: Duration,
    /// Per-phase cap on the external request rendezvous (enqueue and
    /// response wait each get a fresh window).
    pub request_timeout: Duration,
    /// Routing mode: tunnel identity from the Host header (true) or the
    /// first path segment (false).
    pub subdomain: bool,
    /// Inbound request body cap; one byte over is rejected.
    pub max_body_bytes: usize,
    /// Capacity of the per-tunnel queue of requests awaiting an agent poll.
    pub request_queue_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            inactivity_ttl: Duration::from_secs(60),
            max_ttl: Duration::from_secs(600),
            request_timeout: Duration::from_secs(10),
            subdomain: false,
            max_body_bytes: 10 * 1024 * 1024,
            request_queue_capacity: 10,
        }
    }
}

impl RelayConfig {
    /// Startup sanity checks; violations are fatal.
    pub fn validate(&self) -> Result<(), String> {
        if self.inactivity_ttl.is_zero() {
            return Err("TUNNEL_INACTIVITY_LIFE_TIME must be positive".to_string());
        }
        if self.max_ttl <= self.inactivity_ttl {
            return Err(
                "TUNNEL_LIFE_TIME must be greater than TUNNEL_INACTIVITY_LIFE_TIME".to_string(),
            );
        }
        if self.request_timeout.is_zero() {
            return Err("TUNNEL_REQUEST_TIMEOUT must be positive".to_string());
        }
        if self.request_queue_capacity == 0 {
            return Err("request queue capacity must be positive".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(RelayConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_lifetime_not_exceeding_inactivity() {
        let config = RelayConfig {
            inactivity_ttl: Duration::from_secs(60),
            max_ttl: Duration::from_secs(60),
            ..RelayConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_timeout() {
        let config = RelayConfig {
            request_timeout: Duration::ZERO,
            ..RelayConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
