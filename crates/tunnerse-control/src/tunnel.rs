//! Per-tunnel in-memory state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::time::Instant;
use tracing::debug;

use tunnerse_proto::{ResponseData, SerializableRequest};

use crate::config::RelayConfig;
use crate::error::TunnelError;

/// State guarded by the tunnel's local mutex: the token-keyed rendezvous
/// slots and the terminal flag. `closed` never goes back to false.
struct TunnelState {
    pending: HashMap<String, oneshot::Sender<ResponseData>>,
    closed: bool,
}

/// One live tunnel: a queue of requests awaiting an agent poll, the pending
/// rendezvous slots, and its lifecycle timer state.
///
/// The request queue sender is kept as an `Option` so supervisor teardown can
/// drop it; once dropped, agent polls observe the closed channel and return
/// `Closed`. The receiver sits behind an async mutex so concurrent agent
/// polls take turns; `recv` is cancel-safe, so a poll abandoned mid-wait
/// leaves any queued request for the next one.
pub struct Tunnel {
    name: String,
    request_tx: StdMutex<Option<mpsc::Sender<SerializableRequest>>>,
    request_rx: AsyncMutex<mpsc::Receiver<SerializableRequest>>,
    state: StdMutex<TunnelState>,
    inactivity_deadline: StdMutex<Instant>,
    inactivity_ttl: Duration,
    created_at: Instant,
    stop_tx: mpsc::Sender<()>,
}

impl Tunnel {
    /// Allocate a tunnel entry. The returned receiver is the stop signal the
    /// supervisor waits on.
    pub(crate) fn new(name: String, config: &RelayConfig) -> (Arc<Self>, mpsc::Receiver<()>) {
        let (request_tx, request_rx) = mpsc::channel(config.request_queue_capacity);
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let now = Instant::now();

        let tunnel = Arc::new(Self {
            name,
            request_tx: StdMutex::new(Some(request_tx)),
            request_rx: AsyncMutex::new(request_rx),
            state: StdMutex::new(TunnelState {
                pending: HashMap::new(),
                closed: false,
            }),
            inactivity_deadline: StdMutex::new(now + config.inactivity_ttl),
            inactivity_ttl: config.inactivity_ttl,
            created_at: now,
            stop_tx,
        });

        (tunnel, stop_rx)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn created_at(&self) -> Instant {
        self.created_at
    }

    pub(crate) fn inactivity_deadline(&self) -> Instant {
        *self.inactivity_deadline.lock().unwrap()
    }

    /// Push the inactivity deadline forward. Called on agent poll entry and
    /// external request entry, never on Response or Close.
    fn touch(&self) {
        *self.inactivity_deadline.lock().unwrap() = Instant::now() + self.inactivity_ttl;
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    /// Reject terminal tunnels and count this operation as activity.
    pub(crate) fn ensure_open_and_touch(&self) -> Result<(), TunnelError> {
        {
            let state = self.state.lock().unwrap();
            if state.closed {
                return Err(TunnelError::Closed);
            }
        }
        self.touch();
        Ok(())
    }

    /// Insert a rendezvous slot for `token`, re-checking the terminal flag
    /// under the same lock so no slot lands on a closing tunnel.
    pub(crate) fn insert_slot(
        &self,
        token: &str,
    ) -> Result<oneshot::Receiver<ResponseData>, TunnelError> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(TunnelError::Closed);
        }
        state.pending.insert(token.to_string(), tx);
        Ok(rx)
    }

    /// Take the slot for `token` out of the pending map, claiming exclusive
    /// right to complete it.
    pub(crate) fn take_slot(
        &self,
        token: &str,
    ) -> Result<oneshot::Sender<ResponseData>, TunnelError> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(TunnelError::Closed);
        }
        state
            .pending
            .remove(token)
            .ok_or_else(|| TunnelError::UnknownToken(token.to_string()))
    }

    /// Drop the slot for `token` if still present. No-op when a Response
    /// already claimed it.
    pub(crate) fn remove_slot(&self, token: &str) {
        let mut state = self.state.lock().unwrap();
        state.pending.remove(token);
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }

    /// Clone the queue sender, if the queue is still open.
    pub(crate) fn request_sender(&self) -> Option<mpsc::Sender<SerializableRequest>> {
        self.request_tx.lock().unwrap().clone()
    }

    /// Dequeue the next relayed request; `None` once the queue is closed.
    pub(crate) async fn next_request(&self) -> Option<SerializableRequest> {
        let mut rx = self.request_rx.lock().await;
        rx.recv().await
    }

    /// Flip the terminal flag. Returns the previous value.
    pub(crate) fn set_closed(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        std::mem::replace(&mut state.closed, true)
    }

    /// Terminal transition: mark closed and drain every rendezvous slot.
    /// Dropping the senders wakes the blocked external handlers, which then
    /// fail with tunnel-closed.
    pub(crate) fn mark_closed_and_drain(&self) -> usize {
        let drained = {
            let mut state = self.state.lock().unwrap();
            state.closed = true;
            std::mem::take(&mut state.pending)
        };
        if !drained.is_empty() {
            debug!(
                tunnel = %self.name,
                pending = drained.len(),
                "dropping pending rendezvous slots"
            );
        }
        drained.len()
    }

    /// Drop the queue sender so blocked agent polls observe the closed
    /// channel. Called exactly once, at supervisor teardown, after the
    /// terminal flag is set.
    pub(crate) fn close_request_queue(&self) {
        self.request_tx.lock().unwrap().take();
    }

    /// Ask the supervisor to tear the tunnel down. Non-blocking; extra
    /// signals are discarded, so this is idempotent.
    pub(crate) fn request_stop(&self) {
        let _ = self.stop_tx.try_send(());
    }
}
