//! Wire types shared between the relay and origin-side agents.
//!
//! An agent long-polls the relay and receives a [`SerializableRequest`] for
//! each external request; it replies with a [`ResponseData`]. Correlation is
//! carried by an opaque per-request token, echoed verbatim by the agent.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

/// Header carrying the per-request correlation token on relayed requests.
pub const REQUEST_TOKEN_HEADER: &str = "Tunnerse-Request-Token";

/// Control header used for relay-internal signaling on both directions.
pub const CONTROL_HEADER: &str = "Tunnerse";

/// Control value an agent sets when its local origin was unreachable.
pub const LOCAL_API_ERROR: &str = "local-api-error";

/// Control value an agent sets on a healthcheck probe response.
///
/// The spelling is wrong but deployed agents send it as-is; keep it.
pub const HEALTHCHECK_PROBE: &str = "healtcheck-response";

/// Control value the relay sets on a concluded healthcheck.
pub const HEALTHCHECK_CONCLUDED: &str = "healthcheck-conclued";

/// Path the healthcheck probe is issued against (method HEAD).
pub const HEALTHCHECK_PATH: &str = "/_tunnerse_healthcheck";

/// Header-value multimap as it crosses the wire.
pub type HeaderMap = HashMap<String, Vec<String>>;

/// A relayed external request, serialized to the agent as JSON.
///
/// The body travels as a raw string; non-UTF-8 payloads are lossy on this
/// direction (agents that need binary-clean uploads front them with base64
/// themselves).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializableRequest {
    pub method: String,
    pub path: String,
    pub headers: HeaderMap,
    pub body: String,
    pub host: String,
    pub token: String,
}

/// An agent's reply for one relayed request. Body bytes are base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseData {
    pub status_code: u16,
    pub headers: HeaderMap,
    pub body: String,
    pub token: String,
}

impl ResponseData {
    /// Decode the base64 body into raw bytes.
    pub fn decode_body(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64.decode(&self.body)
    }

    /// First value of the `Tunnerse` control header, if present.
    pub fn control_value(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(CONTROL_HEADER))
            .and_then(|(_, values)| values.first())
            .map(String::as_str)
    }
}

/// Encode raw bytes the way agents are expected to (standard base64).
pub fn encode_body(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializable_request_round_trip() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "Content-Type".to_string(),
            vec!["application/json".to_string()],
        );
        headers.insert(
            REQUEST_TOKEN_HEADER.to_string(),
            vec!["tok-1".to_string()],
        );

        let req = SerializableRequest {
            method: "POST".to_string(),
            path: "/api/v1/items?limit=5".to_string(),
            headers,
            body: "{\"a\":1}".to_string(),
            host: "svc-abc.example.com".to_string(),
            token: "tok-1".to_string(),
        };

        let json = serde_json::to_string(&req).unwrap();
        let parsed: SerializableRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, req);
    }

    #[test]
    fn response_wire_field_names() {
        let json = r#"{
            "status_code": 201,
            "headers": {"X-Custom": ["yes"]},
            "body": "cG9uZw==",
            "token": "t"
        }"#;

        let resp: ResponseData = serde_json::from_str(json).unwrap();
        assert_eq!(resp.status_code, 201);
        assert_eq!(resp.decode_body().unwrap(), b"pong");
    }

    #[test]
    fn body_base64_survives_binary() {
        let payload = [0u8, 1, 2, 255, 254, 0, 128];
        let resp = ResponseData {
            status_code: 200,
            headers: HeaderMap::new(),
            body: encode_body(&payload),
            token: "t".to_string(),
        };

        assert_eq!(resp.decode_body().unwrap(), payload);
    }

    #[test]
    fn decode_rejects_invalid_base64() {
        let resp = ResponseData {
            status_code: 200,
            headers: HeaderMap::new(),
            body: "not base64!!".to_string(),
            token: "t".to_string(),
        };

        assert!(resp.decode_body().is_err());
    }

    #[test]
    fn control_value_is_case_insensitive_on_name() {
        let mut headers = HeaderMap::new();
        headers.insert("tunnerse".to_string(), vec![LOCAL_API_ERROR.to_string()]);

        let resp = ResponseData {
            status_code: 502,
            headers,
            body: String::new(),
            token: "t".to_string(),
        };

        assert_eq!(resp.control_value(), Some(LOCAL_API_ERROR));
    }

    #[test]
    fn control_value_absent() {
        let resp = ResponseData {
            status_code: 200,
            headers: HeaderMap::new(),
            body: String::new(),
            token: "t".to_string(),
        };

        assert_eq!(resp.control_value(), None);
    }
}
