//! Contracts for the collaborators this crate does not implement.
//!
//! The HTTP transport and the credential store live outside the sync layer.
//! They are reached only through [`RequestClient`] and [`AuthProvider`], and
//! every response comes back in the uniform [`ApiResponse`] envelope:
//!
//! ```text
//! { "success": bool, "data": any, "message": string?, "errors": [...] }
//! ```
//!
//! `success = false` (with the HTTP status attached) is the single failure
//! signal every component consumes. A request that never produced a response
//! is reported with status `0`.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub use memory::InMemoryClient;

/// HTTP verb of an [`ApiRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One call against the remote API. `path` is relative to the API base URL
/// and may carry a query string.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

impl ApiRequest {
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            method,
            path: path.into(),
            body,
        }
    }

    /// Path with any query string stripped.
    #[must_use]
    pub fn route(&self) -> &str {
        self.path.split_once('?').map_or(self.path.as_str(), |(route, _)| route)
    }
}

/// One entry of the envelope's `errors` array.
///
/// Servers send either bare strings or `{field, code, message}` objects; both
/// deserialize into this shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiErrorDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
}

impl ApiErrorDetail {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            field: None,
            code: None,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl<'de> Deserialize<'de> for ApiErrorDetail {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Detail {
                #[serde(default)]
                field: Option<String>,
                #[serde(default)]
                code: Option<String>,
                #[serde(default)]
                message: Option<String>,
            },
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(message) => Self::new(message),
            Raw::Detail {
                field,
                code,
                message,
            } => Self {
                message: message
                    .or_else(|| code.clone())
                    .unwrap_or_else(|| "unspecified error".to_string()),
                field,
                code,
            },
        })
    }
}

/// The uniform response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub errors: Vec<ApiErrorDetail>,
    /// HTTP status code; `0` when the request never got a response.
    #[serde(skip)]
    pub status: u16,
}

impl ApiResponse {
    /// `200` with a payload.
    #[must_use]
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: Vec::new(),
            status: 200,
        }
    }

    /// A well-formed `success = false` reply.
    #[must_use]
    pub fn failure(status: u16, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
            errors: Vec::new(),
            status,
        }
    }

    /// No response at all (connection refused, timeout, DNS).
    #[must_use]
    pub fn network_failure(message: impl Into<String>) -> Self {
        Self::failure(0, message)
    }

    #[must_use]
    pub fn with_error(mut self, detail: ApiErrorDetail) -> Self {
        self.errors.push(detail);
        self
    }

    /// True when any error detail carries `code` (case-insensitive).
    #[must_use]
    pub fn has_error_code(&self, code: &str) -> bool {
        self.errors
            .iter()
            .filter_map(|detail| detail.code.as_deref())
            .any(|c| c.eq_ignore_ascii_case(code))
    }
}

/// The external request client.
///
/// Implementors only provide [`send`](Self::send); the verb helpers forward to
/// it. Failures are never raised as errors: they come back as an envelope
/// with `success = false`.
#[async_trait]
pub trait RequestClient: Send + Sync {
    async fn send(&self, request: ApiRequest) -> ApiResponse;

    async fn get(&self, path: &str) -> ApiResponse {
        self.send(ApiRequest::new(Method::Get, path, None)).await
    }

    async fn post(&self, path: &str, body: Option<Value>) -> ApiResponse {
        self.send(ApiRequest::new(Method::Post, path, body)).await
    }

    async fn put(&self, path: &str, body: Option<Value>) -> ApiResponse {
        self.send(ApiRequest::new(Method::Put, path, body)).await
    }

    async fn patch(&self, path: &str, body: Option<Value>) -> ApiResponse {
        self.send(ApiRequest::new(Method::Patch, path, body)).await
    }

    async fn delete(&self, path: &str, body: Option<Value>) -> ApiResponse {
        self.send(ApiRequest::new(Method::Delete, path, body)).await
    }
}

/// Signed-in user as reported by the auth provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl UserIdentity {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role: None,
        }
    }
}

/// The external auth provider.
pub trait AuthProvider: Send + Sync {
    fn current_user(&self) -> Option<UserIdentity>;

    fn token(&self) -> Option<String>;
}

/// Fixed identity and token, resolved once at startup.
#[derive(Debug, Clone, Default)]
pub struct StaticAuth {
    user: Option<UserIdentity>,
    token: Option<String>,
}

impl StaticAuth {
    #[must_use]
    pub const fn new(user: Option<UserIdentity>, token: Option<String>) -> Self {
        Self { user, token }
    }

    #[must_use]
    pub fn user(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            user: Some(UserIdentity::new(id, name)),
            token: None,
        }
    }
}

impl AuthProvider for StaticAuth {
    fn current_user(&self) -> Option<UserIdentity> {
        self.user.clone()
    }

    fn token(&self) -> Option<String> {
        self.token.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_accepts_string_and_object_errors() {
        let raw = json!({
            "success": false,
            "message": "Validation failed",
            "errors": ["name is required", {"field": "status", "code": "APPROVAL_REQUIRED", "message": "needs sign-off"}]
        });
        let resp: ApiResponse = serde_json::from_value(raw).unwrap();
        assert!(!resp.success);
        assert_eq!(resp.errors.len(), 2);
        assert_eq!(resp.errors[0].message, "name is required");
        assert_eq!(resp.errors[1].field.as_deref(), Some("status"));
        assert!(resp.has_error_code("approval_required"));
    }

    #[test]
    fn envelope_defaults_missing_fields() {
        let resp: ApiResponse = serde_json::from_value(json!({"success": true})).unwrap();
        assert!(resp.success);
        assert!(resp.data.is_none());
        assert!(resp.errors.is_empty());
    }

    #[test]
    fn request_route_strips_query() {
        let req = ApiRequest::new(Method::Get, "/projects/updates?since=2026-01-01T00:00:00Z", None);
        assert_eq!(req.route(), "/projects/updates");
    }

    #[test]
    fn static_auth_reports_user() {
        let auth = StaticAuth::user("u1", "Alice");
        assert_eq!(auth.current_user().unwrap().name, "Alice");
        assert!(auth.token().is_none());
    }
}
