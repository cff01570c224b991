//! Static HTML pages for browser-facing errors.
//!
//! Pages live under the configured static directory as `<name>.html`; when a
//! file is missing a plaintext fallback is served with the same status. Every
//! page response carries a `Tunnerse` header naming the condition so agents
//! and probes can tell relay pages apart from origin responses.

use std::path::Path;

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;

use tunnerse_proto::CONTROL_HEADER;

pub(crate) async fn serve_page(
    static_dir: &Path,
    status: StatusCode,
    control_value: &str,
    page: &str,
    fallback: &str,
) -> Response {
    let path = static_dir.join(format!("{page}.html"));

    let (content_type, body) = match tokio::fs::read(&path).await {
        Ok(data) => ("text/html", data),
        Err(_) => ("text/plain", fallback.as_bytes().to_vec()),
    };

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    if let Ok(value) = HeaderValue::from_str(control_value) {
        response.headers_mut().insert(CONTROL_HEADER, value);
    }
    response
}

pub(crate) async fn not_found(static_dir: &Path) -> Response {
    serve_page(
        static_dir,
        StatusCode::NOT_FOUND,
        "tunnel-not-found",
        "notfound",
        "404 - tunnel not found",
    )
    .await
}

pub(crate) async fn timeout(static_dir: &Path) -> Response {
    serve_page(
        static_dir,
        StatusCode::REQUEST_TIMEOUT,
        "tunnel-timeout",
        "timeout",
        "408 - tunnel timeout",
    )
    .await
}

pub(crate) async fn local_error(static_dir: &Path) -> Response {
    serve_page(
        static_dir,
        StatusCode::SERVICE_UNAVAILABLE,
        "local-api-error",
        "localerror",
        "503 - local api error",
    )
    .await
}

pub(crate) async fn home(static_dir: &Path) -> Response {
    serve_page(
        static_dir,
        StatusCode::OK,
        "tunnel-working",
        "running",
        "Tunnerse is running",
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serves_file_when_present() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notfound.html"), "<h1>gone</h1>").unwrap();

        let response = not_found(dir.path()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers().get(CONTROL_HEADER).unwrap(),
            "tunnel-not-found"
        );
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/html"
        );
    }

    #[tokio::test]
    async fn falls_back_to_plaintext() {
        let dir = tempfile::tempdir().unwrap();

        let response = timeout(dir.path()).await;
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/plain"
        );

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(body.as_ref(), b"408 - tunnel timeout");
    }
}
