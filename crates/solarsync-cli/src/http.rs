//! `reqwest`-backed request client.
//!
//! Every reply is folded into the [`ApiResponse`] envelope. Connection
//! failures and timeouts become `status = 0`; bodies that are not an envelope
//! are wrapped so callers never see a transport-level `Err`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use solarsync_core::client::{ApiRequest, ApiResponse, AuthProvider, Method, RequestClient};
use solarsync_core::config::ApiConfig;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct HttpClient {
    client: Client,
    base_url: String,
    auth: Arc<dyn AuthProvider>,
}

impl HttpClient {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: &ApiConfig, auth: Arc<dyn AuthProvider>) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("ssync/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth,
        })
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }
}

const fn verb(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

#[async_trait]
impl RequestClient for HttpClient {
    async fn send(&self, request: ApiRequest) -> ApiResponse {
        let url = self.url(&request.path);
        let mut builder = self.client.request(verb(request.method), &url);
        if let Some(token) = self.auth.token() {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(err) => {
                warn!(method = %request.method, %url, error = %err, "request failed");
                return ApiResponse::network_failure(err.to_string());
            }
        };

        let status = response.status().as_u16();
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(err) => {
                warn!(method = %request.method, %url, status, error = %err, "reading body failed");
                return ApiResponse::network_failure(err.to_string());
            }
        };
        debug!(method = %request.method, %url, status, bytes = body.len(), "response");
        parse_envelope(status, &body)
    }
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

/// Fold a raw HTTP reply into the envelope. The HTTP status wins over a
/// body that claims `success = true`.
fn parse_envelope(status: u16, body: &[u8]) -> ApiResponse {
    let text = String::from_utf8_lossy(body);
    if text.trim().is_empty() {
        return if is_success(status) {
            with_status(ApiResponse::ok(Value::Null), status)
        } else {
            ApiResponse::failure(status, format!("HTTP {status}"))
        };
    }

    let Ok(value) = serde_json::from_str::<Value>(&text) else {
        return if is_success(status) {
            with_status(ApiResponse::ok(Value::String(text.into_owned())), status)
        } else {
            ApiResponse::failure(status, text.trim().to_string())
        };
    };

    let is_envelope = value.get("success").is_some_and(Value::is_boolean);
    if is_envelope {
        if let Ok(mut envelope) = serde_json::from_value::<ApiResponse>(value.clone()) {
            envelope.status = status;
            envelope.success &= is_success(status);
            return envelope;
        }
    }

    if is_success(status) {
        with_status(ApiResponse::ok(value), status)
    } else {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| format!("HTTP {status}"), str::to_string);
        ApiResponse::failure(status, message)
    }
}

const fn with_status(mut response: ApiResponse, status: u16) -> ApiResponse {
    response.status = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use solarsync_core::client::StaticAuth;
    use solarsync_core::error::{ErrorCode, SyncError};

    #[test]
    fn envelope_is_passed_through() {
        let body = json!({
            "success": false,
            "message": "Approval needed",
            "errors": [{"code": "APPROVAL_REQUIRED", "message": "manager sign-off"}]
        })
        .to_string();
        let response = parse_envelope(422, body.as_bytes());
        assert!(!response.success);
        assert_eq!(response.status, 422);
        assert_eq!(response.message.as_deref(), Some("Approval needed"));
        assert!(response.has_error_code("approval_required"));
    }

    #[test]
    fn success_envelope_with_error_status_is_failure() {
        let body = json!({"success": true, "data": {"id": "p1"}}).to_string();
        let response = parse_envelope(500, body.as_bytes());
        assert!(!response.success);
        assert_eq!(response.status, 500);
    }

    #[test]
    fn bare_json_body_becomes_data() {
        let body = json!([{"entityId": "p1"}]).to_string();
        let response = parse_envelope(200, body.as_bytes());
        assert!(response.success);
        assert_eq!(response.data, Some(json!([{"entityId": "p1"}])));
    }

    #[test]
    fn empty_no_content_reply_is_success() {
        let response = parse_envelope(204, b"");
        assert!(response.success);
        assert_eq!(response.status, 204);
    }

    #[test]
    fn plain_text_error_keeps_body_as_message() {
        let response = parse_envelope(502, b"Bad Gateway\n");
        assert!(!response.success);
        assert_eq!(response.message.as_deref(), Some("Bad Gateway"));
        let err = SyncError::from_response(response, None);
        assert_eq!(err.code(), ErrorCode::ServerError);
    }

    #[test]
    fn error_object_without_envelope_uses_message_field() {
        let body = json!({"message": "token expired"}).to_string();
        let response = parse_envelope(401, body.as_bytes());
        assert_eq!(response.message.as_deref(), Some("token expired"));
        assert_eq!(SyncError::from_response(response, None).code(), ErrorCode::Unauthorized);
    }

    #[test]
    fn urls_join_without_double_slash() {
        let config = ApiConfig {
            base_url: "https://api.example.test/v1/".to_string(),
            ..ApiConfig::default()
        };
        let client = HttpClient::new(&config, Arc::new(StaticAuth::default())).unwrap();
        assert_eq!(
            client.url("/projects/updates?since=x"),
            "https://api.example.test/v1/projects/updates?since=x"
        );
        assert_eq!(client.url("projects/p1"), "https://api.example.test/v1/projects/p1");
    }

    #[tokio::test]
    async fn unreachable_host_is_network_failure() {
        let config = ApiConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 2,
            ..ApiConfig::default()
        };
        let client = HttpClient::new(&config, Arc::new(StaticAuth::default())).unwrap();
        let response = client.get("/projects/p1").await;
        assert!(!response.success);
        assert_eq!(response.status, 0);
    }
}
