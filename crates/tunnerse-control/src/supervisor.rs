//! Per-tunnel lifecycle supervision.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::info;

use crate::registry::TunnelRegistry;
use crate::tunnel::Tunnel;

/// Why the supervisor tore the tunnel down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shutdown {
    Inactivity,
    MaxLifetime,
    Stopped,
}

/// Launch the supervisor task for one tunnel.
///
/// The task waits for whichever fires first of the inactivity deadline, the
/// max-lifetime deadline, or an explicit stop signal, then runs teardown in
/// a fixed order: terminal flag + pending drain, registry removal, queue
/// close. In-flight handlers observe the drain; blocked agent polls observe
/// the queue close.
pub(crate) fn spawn(
    registry: TunnelRegistry,
    tunnel: Arc<Tunnel>,
    max_ttl: Duration,
    mut stop_rx: mpsc::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let reason = wait_for_shutdown(&tunnel, max_ttl, &mut stop_rx).await;

        let drained = tunnel.mark_closed_and_drain();
        registry.remove(tunnel.name());
        tunnel.close_request_queue();

        info!(
            tunnel = %tunnel.name(),
            reason = ?reason,
            drained_slots = drained,
            "tunnel terminated"
        );
    })
}

async fn wait_for_shutdown(
    tunnel: &Tunnel,
    max_ttl: Duration,
    stop_rx: &mut mpsc::Receiver<()>,
) -> Shutdown {
    let max_sleep = sleep_until(tunnel.created_at() + max_ttl);
    tokio::pin!(max_sleep);

    loop {
        let deadline = tunnel.inactivity_deadline();

        tokio::select! {
            _ = sleep_until(deadline) => {
                // The deadline may have moved forward while we slept; only
                // a deadline that is still in the past counts as expiry.
                if tunnel.inactivity_deadline() <= Instant::now() {
                    return Shutdown::Inactivity;
                }
            }
            _ = &mut max_sleep => return Shutdown::MaxLifetime,
            _ = stop_rx.recv() => return Shutdown::Stopped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;

    fn config() -> RelayConfig {
        RelayConfig {
            inactivity_ttl: Duration::from_secs(60),
            max_ttl: Duration::from_secs(600),
            ..RelayConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn expires_on_inactivity() {
        let registry = TunnelRegistry::new();
        let (tunnel, stop_rx) = Tunnel::new("svc-abc".to_string(), &config());
        registry.insert(tunnel.clone());

        let handle = spawn(registry.clone(), tunnel.clone(), Duration::from_secs(600), stop_rx);

        tokio::time::advance(Duration::from_secs(61)).await;
        handle.await.unwrap();

        assert!(tunnel.is_closed());
        assert!(!registry.contains("svc-abc"));
    }

    #[tokio::test(start_paused = true)]
    async fn activity_defers_inactivity_expiry() {
        let registry = TunnelRegistry::new();
        let (tunnel, stop_rx) = Tunnel::new("svc-abc".to_string(), &config());
        registry.insert(tunnel.clone());

        let handle = spawn(registry.clone(), tunnel.clone(), Duration::from_secs(600), stop_rx);

        // Keep touching just before the deadline; the tunnel must survive
        // well past a single inactivity window.
        for _ in 0..4 {
            tokio::time::advance(Duration::from_secs(50)).await;
            tunnel.ensure_open_and_touch().unwrap();
        }
        assert!(!tunnel.is_closed());

        tokio::time::advance(Duration::from_secs(61)).await;
        handle.await.unwrap();
        assert!(tunnel.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn max_lifetime_fires_despite_activity() {
        let registry = TunnelRegistry::new();
        let (tunnel, stop_rx) = Tunnel::new("svc-abc".to_string(), &config());
        registry.insert(tunnel.clone());

        let handle = spawn(registry.clone(), tunnel.clone(), Duration::from_secs(120), stop_rx);

        for _ in 0..5 {
            tokio::time::advance(Duration::from_secs(30)).await;
            if !tunnel.is_closed() {
                let _ = tunnel.ensure_open_and_touch();
            }
        }

        handle.await.unwrap();
        assert!(tunnel.is_closed());
        assert!(!registry.contains("svc-abc"));
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_stop_tears_down() {
        let registry = TunnelRegistry::new();
        let (tunnel, stop_rx) = Tunnel::new("svc-abc".to_string(), &config());
        registry.insert(tunnel.clone());

        let handle = spawn(registry.clone(), tunnel.clone(), Duration::from_secs(600), stop_rx);

        tunnel.request_stop();
        handle.await.unwrap();

        assert!(tunnel.is_closed());
        assert!(!registry.contains("svc-abc"));
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_drains_pending_and_closes_queue() {
        let registry = TunnelRegistry::new();
        let (tunnel, stop_rx) = Tunnel::new("svc-abc".to_string(), &config());
        registry.insert(tunnel.clone());

        let rx = tunnel.insert_slot("tok").unwrap();
        let handle = spawn(registry.clone(), tunnel.clone(), Duration::from_secs(600), stop_rx);

        tunnel.request_stop();
        handle.await.unwrap();

        assert!(rx.await.is_err());
        assert!(tunnel.next_request().await.is_none());
    }
}
