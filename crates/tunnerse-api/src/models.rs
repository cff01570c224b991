//! Control-plane request/response bodies.

use serde::{Deserialize, Serialize};

/// Body of `POST /register`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// Base name; the relay appends a random suffix.
    pub name: String,
}

/// Successful registration reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub message: String,
    /// Whether the deployment routes by subdomain (the agent needs this to
    /// build its public URL).
    pub subdomain: bool,
    /// Full minted tunnel name.
    pub tunnel: String,
}

/// Uniform error body for JSON-mode failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Body served at `/` when no tunnel name resolves and HTML mode is off.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusMessage {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_request_parses() {
        let req: RegisterRequest = serde_json::from_str(r#"{"name":"svc"}"#).unwrap();
        assert_eq!(req.name, "svc");
    }

    #[test]
    fn register_response_shape() {
        let resp = RegisterResponse {
            message: "tunnel has been registered".to_string(),
            subdomain: true,
            tunnel: "svc-a1b".to_string(),
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["tunnel"], "svc-a1b");
        assert_eq!(json["subdomain"], true);
    }
}
