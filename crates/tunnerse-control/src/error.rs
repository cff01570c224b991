use thiserror::Error;

/// Errors produced by the core tunnel operations.
///
/// Controllers map these onto HTTP status codes (and optionally static HTML
/// pages); the core never writes a response itself except on the successful
/// rendezvous fast path.
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("invalid tunnel name: {0}")]
    InvalidName(String),

    #[error("could not allocate a unique tunnel name")]
    NameExhausted,

    #[error("tunnel not found")]
    NotFound,

    #[error("tunnel is closed")]
    Closed,

    #[error("timeout")]
    Timeout,

    #[error("missing Tunnerse-Request-Token in response")]
    MissingToken,

    #[error("no pending request found for token: {0} (expired or invalid)")]
    UnknownToken(String),

    #[error("pending request for token {0} is gone")]
    StaleSlot(String),

    #[error("local-api-error")]
    LocalApiError,

    #[error("failed to encode request: {0}")]
    Encode(serde_json::Error),

    #[error("failed to decode response JSON: {0}")]
    Decode(serde_json::Error),

    #[error("failed to decode base64 body: {0}")]
    BadBody(#[from] base64::DecodeError),
}
