//! The relay's HTTP entry points.
//!
//! Four operations reach the core: Register, Get (agent long-poll),
//! Response (agent reply) and Tunnel (external client), plus Close and the
//! health probe. Handlers only translate between HTTP and the core's typed
//! errors; no tunnel logic lives here.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use tracing::{debug, error, info};

use tunnerse_control::{InboundRequest, TunnelError, TunnelResponse};

use crate::models::{ErrorResponse, RegisterRequest, RegisterResponse, StatusMessage};
use crate::{pages, AppState};

pub(crate) async fn health() -> &'static str {
    "OK"
}

pub(crate) async fn register(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RegisterRequest>,
) -> Response {
    match state.service.register(&body.name) {
        Ok(tunnel) => {
            info!(tunnel = %tunnel, subdomain = state.subdomain, "tunnel registered");
            Json(RegisterResponse {
                message: "tunnel has been registered".to_string(),
                subdomain: state.subdomain,
                tunnel,
            })
            .into_response()
        }
        Err(err) => {
            error!(error = %err, "registration failed");
            error_response(&state, err).await
        }
    }
}

// Agent long-poll, both routing modes.

pub(crate) async fn agent_poll(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    match tunnel_name_from_host(&headers) {
        Some(name) => poll_inner(&state, &name).await,
        None => home_response(&state).await,
    }
}

pub(crate) async fn agent_poll_path(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Response {
    poll_inner(&state, &name.to_ascii_lowercase()).await
}

async fn poll_inner(state: &AppState, name: &str) -> Response {
    match state.service.get(name).await {
        Ok(body) => {
            debug!(tunnel = %name, "request handed to agent");
            (
                [(header::CONTENT_TYPE, "application/json")],
                body,
            )
                .into_response()
        }
        Err(err) => error_response(state, err).await,
    }
}

// Agent reply, both routing modes.

pub(crate) async fn agent_respond(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match tunnel_name_from_host(&headers) {
        Some(name) => respond_inner(&state, &name, &body).await,
        None => home_response(&state).await,
    }
}

pub(crate) async fn agent_respond_path(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    body: Bytes,
) -> Response {
    respond_inner(&state, &name.to_ascii_lowercase(), &body).await
}

async fn respond_inner(state: &AppState, name: &str, body: &[u8]) -> Response {
    match state.service.respond(name, body) {
        Ok(()) => {
            debug!(tunnel = %name, "agent response accepted");
            StatusCode::OK.into_response()
        }
        Err(err) => {
            error!(tunnel = %name, error = %err, "agent response rejected");
            error_response(state, err).await
        }
    }
}

// Explicit termination, both routing modes.

pub(crate) async fn close_tunnel(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    match tunnel_name_from_host(&headers) {
        Some(name) => close_inner(&state, &name).await,
        None => home_response(&state).await,
    }
}

pub(crate) async fn close_tunnel_path(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Response {
    close_inner(&state, &name.to_ascii_lowercase()).await
}

async fn close_inner(state: &AppState, name: &str) -> Response {
    match state.service.close(name) {
        Ok(()) => {
            info!(tunnel = %name, "tunnel closed");
            StatusCode::OK.into_response()
        }
        Err(err) => error_response(state, err).await,
    }
}

// External client entry. In subdomain mode this is the fallback for every
// path; in path-prefix mode it is routed under /{name}.

pub(crate) async fn external_entry(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Response {
    let name = if state.subdomain {
        tunnel_name_from_host(request.headers())
    } else {
        first_path_segment(request.uri().path())
    };

    match name {
        Some(name) => relay_inner(&state, &name, request).await,
        None => home_response(&state).await,
    }
}

pub(crate) async fn external_entry_path(
    State(state): State<Arc<AppState>>,
    Path(params): Path<Vec<(String, String)>>,
    request: Request,
) -> Response {
    let name = params
        .iter()
        .find(|(key, _)| key == "name")
        .map(|(_, value)| value.to_ascii_lowercase());

    match name {
        Some(name) => relay_inner(&state, &name, request).await,
        None => home_response(&state).await,
    }
}

async fn relay_inner(state: &Arc<AppState>, name: &str, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let host = host_header(&parts.headers).unwrap_or_default();
    let headers = wire_headers(&parts.headers);

    let body = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(err) => {
            debug!(tunnel = %name, error = %err, "rejecting oversized or unreadable body");
            return (
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(ErrorResponse {
                    error: "request body too large".to_string(),
                }),
            )
                .into_response();
        }
    };

    let inbound = InboundRequest {
        method: parts.method.as_str().to_string(),
        path_and_query,
        headers,
        body,
        host,
    };

    match state.service.tunnel(name, inbound).await {
        Ok(response) => {
            info!(tunnel = %name, status = response.status_code, "request relayed");
            client_response(response)
        }
        Err(err) => {
            error!(tunnel = %name, error = %err, "tunneling failed");
            error_response(state, err).await
        }
    }
}

pub(crate) async fn home(State(state): State<Arc<AppState>>) -> Response {
    home_response(&state).await
}

async fn home_response(state: &AppState) -> Response {
    if state.warns_on_html {
        return pages::home(&state.static_dir).await;
    }
    Json(StatusMessage {
        message: "Tunnerse is running :)".to_string(),
    })
    .into_response()
}

/// Map core errors onto HTTP. HTML mode swaps the browser-facing conditions
/// for static pages; everything else is a JSON error body.
async fn error_response(state: &AppState, err: TunnelError) -> Response {
    if state.warns_on_html {
        match err {
            TunnelError::NotFound => return pages::not_found(&state.static_dir).await,
            TunnelError::Timeout => return pages::timeout(&state.static_dir).await,
            TunnelError::LocalApiError => return pages::local_error(&state.static_dir).await,
            _ => {}
        }
    }

    let status = match err {
        TunnelError::InvalidName(_) => StatusCode::BAD_REQUEST,
        TunnelError::NameExhausted | TunnelError::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
        TunnelError::NotFound => StatusCode::NOT_FOUND,
        TunnelError::Closed => StatusCode::BAD_REQUEST,
        TunnelError::Timeout => StatusCode::REQUEST_TIMEOUT,
        TunnelError::LocalApiError => StatusCode::SERVICE_UNAVAILABLE,
        TunnelError::MissingToken
        | TunnelError::UnknownToken(_)
        | TunnelError::StaleSlot(_)
        | TunnelError::Decode(_)
        | TunnelError::BadBody(_) => StatusCode::BAD_REQUEST,
    };

    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

/// Build the external client's response from the decoded agent reply.
/// Framing headers are dropped; the HTTP stack recomputes them for the
/// decoded body.
fn client_response(response: TunnelResponse) -> Response {
    let status =
        StatusCode::from_u16(response.status_code).unwrap_or(StatusCode::BAD_GATEWAY);

    let mut headers = HeaderMap::new();
    for (name, values) in &response.headers {
        if name.eq_ignore_ascii_case("content-length")
            || name.eq_ignore_ascii_case("transfer-encoding")
        {
            continue;
        }
        let Ok(header_name) = HeaderName::try_from(name.as_str()) else {
            debug!(header = %name, "skipping invalid response header name");
            continue;
        };
        for value in values {
            match HeaderValue::from_str(value) {
                Ok(header_value) => {
                    headers.append(header_name.clone(), header_value);
                }
                Err(_) => debug!(header = %name, "skipping invalid response header value"),
            }
        }
    }

    let mut out = Response::new(Body::from(response.body));
    *out.status_mut() = status;
    *out.headers_mut() = headers;
    out
}

/// Tunnel identity from the Host header: the first label of a host with at
/// least three labels (`foo-abc.example.com` → `foo-abc`).
fn tunnel_name_from_host(headers: &HeaderMap) -> Option<String> {
    let host = host_header(headers)?;
    let host = host.split(':').next().unwrap_or(&host).to_ascii_lowercase();

    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() > 2 && !labels[0].is_empty() {
        Some(labels[0].to_string())
    } else {
        None
    }
}

fn host_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn first_path_segment(path: &str) -> Option<String> {
    let segment = path.trim_start_matches('/').split('/').next()?;
    if segment.is_empty() {
        None
    } else {
        Some(segment.to_ascii_lowercase())
    }
}

fn wire_headers(headers: &HeaderMap) -> tunnerse_proto::HeaderMap {
    let mut map = tunnerse_proto::HeaderMap::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            map.entry(name.as_str().to_string())
                .or_insert_with(Vec::new)
                .push(value.to_string());
        }
    }
    map
}
