//! The front-door servers: TLS-terminating host router on :443 and the
//! plaintext :80 listener handling HTTPS redirects and ACME challenges.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::acme::{AcmeSettings, CertManager, ChallengeStore};
use crate::config::ExposeConfig;
use crate::ExposeError;

/// TLS deployment mode for the front door.
pub enum TlsMode {
    /// Certificate and key files on disk.
    Static {
        cert_path: PathBuf,
        key_path: PathBuf,
    },
    /// Automatic issuance with an on-disk cache.
    Acme(AcmeSettings),
}

/// Front-door listener configuration.
pub struct ExposerConfig {
    pub https_addr: SocketAddr,
    pub http_addr: SocketAddr,
    pub tls: TlsMode,
}

impl Default for ExposerConfig {
    fn default() -> Self {
        Self {
            https_addr: "0.0.0.0:443".parse().unwrap(),
            http_addr: "0.0.0.0:80".parse().unwrap(),
            tls: TlsMode::Static {
                cert_path: PathBuf::from("certs/certificates/tunnerse.com.crt"),
                key_path: PathBuf::from("certs/certificates/tunnerse.com.key"),
            },
        }
    }
}

struct ProxyState {
    routes: ExposeConfig,
    client: reqwest::Client,
    challenges: ChallengeStore,
}

/// The front door: terminates TLS and routes by Host to configured local
/// backends; unknown hosts get a 404.
pub struct Exposer {
    config: ExposerConfig,
    state: Arc<ProxyState>,
}

impl Exposer {
    pub fn new(config: ExposerConfig, routes: ExposeConfig) -> Self {
        let state = Arc::new(ProxyState {
            routes,
            client: reqwest::Client::new(),
            challenges: Arc::new(RwLock::new(HashMap::new())),
        });
        Self { config, state }
    }

    /// Router served on :443 after TLS termination.
    pub fn https_router(&self) -> Router {
        Router::new()
            .fallback(proxy_handler)
            .with_state(self.state.clone())
    }

    /// Router served on :80: ACME challenges, HTTPS redirects for
    /// configured hosts, plaintext proxying for the rest.
    pub fn http_router(&self) -> Router {
        Router::new()
            .route(
                "/.well-known/acme-challenge/{token}",
                get(challenge_handler),
            )
            .fallback(plaintext_handler)
            .with_state(self.state.clone())
    }

    /// Run both listeners until the process exits.
    pub async fn start(self) -> Result<(), ExposeError> {
        let http_router = self.http_router();
        let http_addr = self.config.http_addr;
        tokio::spawn(async move {
            let listener = match TcpListener::bind(http_addr).await {
                Ok(listener) => listener,
                Err(e) => {
                    error!(addr = %http_addr, error = %e, "plaintext listener bind failed");
                    return;
                }
            };
            info!(addr = %http_addr, "plaintext front-door listening");
            if let Err(e) = axum::serve(listener, http_router).await {
                error!(error = %e, "plaintext front-door server error");
            }
        });

        let rustls_config = match &self.config.tls {
            TlsMode::Static {
                cert_path,
                key_path,
            } => {
                info!(cert = %cert_path.display(), key = %key_path.display(), "loading static certificate");
                RustlsConfig::from_pem_file(cert_path, key_path)
                    .await
                    .map_err(|e| ExposeError::Tls(format!("failed to load certificate: {e}")))?
            }
            TlsMode::Acme(settings) => {
                let manager = CertManager::new(
                    settings.clone(),
                    self.state.routes.acme_hosts(),
                    self.state.challenges.clone(),
                );
                let (cert_pem, key_pem) = manager.load_or_issue().await?;
                RustlsConfig::from_pem(cert_pem, key_pem)
                    .await
                    .map_err(|e| ExposeError::Tls(format!("bad issued certificate: {e}")))?
            }
        };

        let https_router = self.https_router();
        info!(addr = %self.config.https_addr, "HTTPS front-door listening");
        axum_server::bind_rustls(self.config.https_addr, rustls_config)
            .serve(https_router.into_make_service())
            .await
            .map_err(|e| ExposeError::Tls(format!("HTTPS server error: {e}")))?;

        Ok(())
    }
}

async fn challenge_handler(
    State(state): State<Arc<ProxyState>>,
    Path(token): Path<String>,
) -> Response {
    match state.challenges.read().await.get(&token) {
        Some(key_auth) => {
            debug!(token = %token, "serving ACME challenge");
            key_auth.clone().into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// :80 traffic: configured hosts are 301'd to HTTPS, everything else is
/// proxied on plaintext.
async fn plaintext_handler(State(state): State<Arc<ProxyState>>, request: Request) -> Response {
    let Some(host) = request_host(&request) else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    if state.routes.should_redirect(&host) {
        let uri = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let full_host = raw_host(&request).unwrap_or(host);
        return https_redirect(&format!("https://{full_host}{uri}"));
    }

    route_to_backend(&state, &host, request).await
}

async fn proxy_handler(State(state): State<Arc<ProxyState>>, request: Request) -> Response {
    let Some(host) = request_host(&request) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    route_to_backend(&state, &host, request).await
}

async fn route_to_backend(state: &ProxyState, host: &str, request: Request) -> Response {
    let Some(port) = state.routes.lookup_port(host) else {
        debug!(host = %host, "host not configured");
        return (StatusCode::NOT_FOUND, "domain not configured").into_response();
    };

    match forward(state, port, request).await {
        Ok(response) => response,
        Err(e) => {
            error!(host = %host, port = port, error = %e, "backend proxy failed");
            (StatusCode::BAD_GATEWAY, "bad gateway").into_response()
        }
    }
}

async fn forward(
    state: &ProxyState,
    port: u16,
    request: Request,
) -> Result<Response, reqwest::Error> {
    let (parts, body) = request.into_parts();

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!("http://localhost:{port}{path_and_query}");

    let body = axum::body::to_bytes(body, usize::MAX)
        .await
        .unwrap_or_default();

    let upstream = state
        .client
        .request(parts.method, url)
        .headers(parts.headers)
        .body(body)
        .send()
        .await?;

    let status = upstream.status();
    let mut headers = axum::http::HeaderMap::new();
    for (name, value) in upstream.headers() {
        if name == header::CONTENT_LENGTH || name == header::TRANSFER_ENCODING {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    let bytes = upstream.bytes().await?;
    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}

/// 301 to the HTTPS origin, preserving the request URI.
fn https_redirect(location: &str) -> Response {
    let mut response = StatusCode::MOVED_PERMANENTLY.into_response();
    if let Ok(value) = HeaderValue::from_str(location) {
        response.headers_mut().insert(header::LOCATION, value);
    }
    response
}

/// Host for route matching: lowercased, port stripped.
fn request_host(request: &Request) -> Option<String> {
    raw_host(request).map(|host| {
        host.split(':')
            .next()
            .unwrap_or(&host)
            .to_ascii_lowercase()
    })
}

fn raw_host(request: &Request) -> Option<String> {
    request
        .headers()
        .get(header::HOST)
        .and_then(|value: &HeaderValue| value.to_str().ok())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exposer(config_text: &str) -> Exposer {
        let routes = ExposeConfig::parse(config_text).unwrap();
        Exposer::new(ExposerConfig::default(), routes)
    }

    #[tokio::test]
    async fn unknown_host_is_404() {
        let exposer = exposer("[domains]\nexample.com = 8080\n");
        let router = exposer.https_router();

        let response = tower::ServiceExt::oneshot(
            router,
            axum::http::Request::builder()
                .uri("/")
                .header("host", "unknown.org")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn missing_host_is_400() {
        let exposer = exposer("[domains]\nexample.com = 8080\n");
        let router = exposer.https_router();

        let response = tower::ServiceExt::oneshot(
            router,
            axum::http::Request::builder()
                .uri("/")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn redirect_host_gets_301_to_https() {
        let exposer = exposer("[domains]\nexample.com = 8080\n[redirects]\nexample.com\n");
        let router = exposer.http_router();

        let response = tower::ServiceExt::oneshot(
            router,
            axum::http::Request::builder()
                .uri("/path?x=1")
                .header("host", "example.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "https://example.com/path?x=1"
        );
    }

    #[tokio::test]
    async fn non_redirect_host_is_proxied_not_redirected() {
        // No backend is listening, so the proxy attempt fails with 502;
        // the point is that it is not a redirect.
        let exposer = exposer("[domains]\nnoproxy.test = 1\n[redirects]\nother.test\n");
        let router = exposer.http_router();

        let response = tower::ServiceExt::oneshot(
            router,
            axum::http::Request::builder()
                .uri("/")
                .header("host", "noproxy.test")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn challenge_endpoint_serves_pending_token() {
        let exposer = exposer("[domains]\nexample.com = 8080\n");
        exposer
            .state
            .challenges
            .write()
            .await
            .insert("tok123".to_string(), "tok123.thumbprint".to_string());

        let router = exposer.http_router();
        let response = tower::ServiceExt::oneshot(
            router,
            axum::http::Request::builder()
                .uri("/.well-known/acme-challenge/tok123")
                .header("host", "example.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(body.as_ref(), b"tok123.thumbprint");
    }

    #[tokio::test]
    async fn unknown_challenge_token_is_404() {
        let exposer = exposer("[domains]\nexample.com = 8080\n");
        let router = exposer.http_router();

        let response = tower::ServiceExt::oneshot(
            router,
            axum::http::Request::builder()
                .uri("/.well-known/acme-challenge/missing")
                .header("host", "example.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
