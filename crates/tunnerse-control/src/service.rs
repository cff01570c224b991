//! The tunnel operations: Register, Get, Response, Tunnel, Close.

use std::sync::Arc;

use bytes::Bytes;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tunnerse_proto::{
    HeaderMap, ResponseData, SerializableRequest, CONTROL_HEADER, HEALTHCHECK_CONCLUDED,
    HEALTHCHECK_PATH, HEALTHCHECK_PROBE, LOCAL_API_ERROR, REQUEST_TOKEN_HEADER,
};

use crate::config::RelayConfig;
use crate::error::TunnelError;
use crate::naming::{self, MAX_MINT_ATTEMPTS};
use crate::registry::TunnelRegistry;
use crate::supervisor;
use crate::tunnel::Tunnel;

/// An external request as handed to the rendezvous engine, already detached
/// from the HTTP connection (body fully read).
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: String,
    /// Incoming URI path plus query string, before any rewrite.
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub host: String,
}

/// The decoded agent reply for one external request, ready to be written
/// back to the external client.
#[derive(Debug, Clone)]
pub struct TunnelResponse {
    pub status_code: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl TunnelResponse {
    /// The 204 reply for a concluded healthcheck probe. No agent headers or
    /// body are carried over.
    fn healthcheck_concluded() -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTROL_HEADER.to_string(),
            vec![HEALTHCHECK_CONCLUDED.to_string()],
        );
        Self {
            status_code: 204,
            headers,
            body: Vec::new(),
        }
    }
}

/// Removes the rendezvous slot when the owning handler unwinds, whether by
/// return, timeout, panic, or the future being dropped on client disconnect.
/// A Response that already claimed the slot makes this a no-op.
struct SlotGuard {
    tunnel: Arc<Tunnel>,
    token: String,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.tunnel.remove_slot(&self.token);
    }
}

/// The relay core. One instance per process, explicitly injected into the
/// HTTP layer.
pub struct TunnelService {
    registry: TunnelRegistry,
    config: RelayConfig,
}

impl TunnelService {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            registry: TunnelRegistry::new(),
            config,
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn registry(&self) -> &TunnelRegistry {
        &self.registry
    }

    /// Register a new tunnel under `base`, returning the minted full name
    /// (`<base>-<rand3>`, lowercase).
    pub fn register(&self, base: &str) -> Result<String, TunnelError> {
        naming::validate_base_name(base)?;
        let base = base.to_ascii_lowercase();

        let mut name = None;
        for _ in 0..MAX_MINT_ATTEMPTS {
            let candidate = format!("{}-{}", base, naming::random_suffix());
            if !self.registry.contains(&candidate) {
                name = Some(candidate);
                break;
            }
        }
        let name = name.ok_or(TunnelError::NameExhausted)?;

        let (tunnel, stop_rx) = Tunnel::new(name.clone(), &self.config);
        self.registry.insert(tunnel.clone());
        supervisor::spawn(self.registry.clone(), tunnel, self.config.max_ttl, stop_rx);

        info!(tunnel = %name, "tunnel registered");
        Ok(name)
    }

    /// Agent long-poll: block until a relayed request is available, then
    /// return it serialized as JSON.
    ///
    /// If the agent disconnects while blocked the future is simply dropped;
    /// `recv` is cancel-safe, so an undelivered request stays queued for the
    /// next poll.
    pub async fn get(&self, name: &str) -> Result<Vec<u8>, TunnelError> {
        let tunnel = self.registry.lookup(name).ok_or(TunnelError::NotFound)?;
        tunnel.ensure_open_and_touch()?;

        let request = tunnel.next_request().await.ok_or(TunnelError::Closed)?;

        debug!(tunnel = %name, token = %request.token, "request delivered to agent");
        serde_json::to_vec(&request).map_err(TunnelError::Encode)
    }

    /// Agent reply: decode the JSON body, find the matching rendezvous slot
    /// by token, and complete it.
    pub fn respond(&self, name: &str, body: &[u8]) -> Result<(), TunnelError> {
        let tunnel = self.registry.lookup(name).ok_or(TunnelError::NotFound)?;

        let response: ResponseData =
            serde_json::from_slice(body).map_err(TunnelError::Decode)?;
        if response.token.is_empty() {
            return Err(TunnelError::MissingToken);
        }
        let token = response.token.clone();

        let slot = tunnel.take_slot(&token)?;
        if slot.send(response).is_err() {
            // The awaiting handler gave up between our take and this send.
            warn!(tunnel = %name, token = %token, "response arrived for abandoned request");
            return Err(TunnelError::StaleSlot(token));
        }

        debug!(tunnel = %name, token = %token, "response matched to pending request");
        Ok(())
    }

    /// External request: mint a token, enqueue the request for the agent,
    /// and await the matching response.
    pub async fn tunnel(
        &self,
        name: &str,
        request: InboundRequest,
    ) -> Result<TunnelResponse, TunnelError> {
        naming::validate_name(name)?;
        let tunnel = self.registry.lookup(name).ok_or(TunnelError::NotFound)?;
        tunnel.ensure_open_and_touch()?;

        let effective_path = if self.config.subdomain {
            request.path_and_query.clone()
        } else {
            strip_tunnel_prefix(&request.path_and_query)
        };

        let token = Uuid::new_v4().to_string();

        // The slot goes in before the request is enqueued, so a Response
        // racing ahead of our resume always finds it.
        let response_rx = tunnel.insert_slot(&token)?;
        let _guard = SlotGuard {
            tunnel: tunnel.clone(),
            token: token.clone(),
        };

        let mut headers = request.headers;
        headers.insert(REQUEST_TOKEN_HEADER.to_string(), vec![token.clone()]);

        let relayed = SerializableRequest {
            method: request.method.clone(),
            path: effective_path.clone(),
            headers,
            body: String::from_utf8_lossy(&request.body).into_owned(),
            host: request.host,
            token: token.clone(),
        };

        let sender = tunnel.request_sender().ok_or(TunnelError::Closed)?;
        match timeout(self.config.request_timeout, sender.send(relayed)).await {
            Err(_) => return Err(TunnelError::Timeout),
            Ok(Err(_)) => return Err(TunnelError::Closed),
            Ok(Ok(())) => {}
        }

        let response = match timeout(self.config.request_timeout, response_rx).await {
            Err(_) => return Err(TunnelError::Timeout),
            Ok(Err(_)) => return Err(TunnelError::Closed),
            Ok(Ok(response)) => response,
        };

        match response.control_value() {
            Some(LOCAL_API_ERROR) => return Err(TunnelError::LocalApiError),
            Some(HEALTHCHECK_PROBE)
                if request.method == "HEAD" && effective_path == HEALTHCHECK_PATH =>
            {
                debug!(tunnel = %name, "healthcheck concluded");
                return Ok(TunnelResponse::healthcheck_concluded());
            }
            _ => {}
        }

        let body = response.decode_body()?;
        debug!(
            tunnel = %name,
            token = %token,
            status = response.status_code,
            "rendezvous complete"
        );
        Ok(TunnelResponse {
            status_code: response.status_code,
            headers: response.headers,
            body,
        })
    }

    /// Terminate a tunnel. Idempotent: a repeat call finds the name absent
    /// from the registry and reports not-found.
    pub fn close(&self, name: &str) -> Result<(), TunnelError> {
        let tunnel = self.registry.remove(name).ok_or(TunnelError::NotFound)?;

        let already_closed = tunnel.set_closed();
        if !already_closed {
            tunnel.request_stop();
            info!(tunnel = %name, "tunnel close requested");
        }
        Ok(())
    }
}

/// Path-prefix mode rewrite: drop the leading `/<tunnel>` segment, keeping
/// the query string and any trailing slash. `/<tunnel>` alone maps to `/`.
fn strip_tunnel_prefix(path_and_query: &str) -> String {
    let (path, query) = match path_and_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_and_query, None),
    };

    let mut parts = path.splitn(3, '/');
    let _ = parts.next(); // leading empty segment
    let _ = parts.next(); // tunnel name
    let stripped = match parts.next() {
        Some(rest) => format!("/{rest}"),
        None => "/".to_string(),
    };

    match query {
        Some(q) => format!("{stripped}?{q}"),
        None => stripped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_prefix_basic() {
        assert_eq!(strip_tunnel_prefix("/svc-abc/ping"), "/ping");
        assert_eq!(strip_tunnel_prefix("/svc-abc/a/b/c"), "/a/b/c");
    }

    #[test]
    fn strip_prefix_bare_name() {
        assert_eq!(strip_tunnel_prefix("/svc-abc"), "/");
        assert_eq!(strip_tunnel_prefix("/svc-abc/"), "/");
    }

    #[test]
    fn strip_prefix_keeps_query_and_encoding() {
        assert_eq!(
            strip_tunnel_prefix("/svc-abc/search?q=a%20b&x=1"),
            "/search?q=a%20b&x=1"
        );
        assert_eq!(strip_tunnel_prefix("/svc-abc?x=1"), "/?x=1");
    }

    #[test]
    fn strip_prefix_keeps_trailing_slash() {
        assert_eq!(strip_tunnel_prefix("/svc-abc/dir/"), "/dir/");
    }

    #[tokio::test]
    async fn register_validates_and_mints() {
        let service = TunnelService::new(RelayConfig::default());

        let name = service.register("svc").unwrap();
        assert!(name.starts_with("svc-"));
        assert_eq!(name.len(), "svc".len() + 1 + naming::SUFFIX_LEN);
        assert!(service.registry().contains(&name));

        assert!(matches!(
            service.register("x"),
            Err(TunnelError::InvalidName(_))
        ));
    }

    #[tokio::test]
    async fn register_lowercases_base() {
        let service = TunnelService::new(RelayConfig::default());

        let name = service.register("MySvc").unwrap();
        assert!(name.starts_with("mysvc-"));
    }
}
