//! API Gateway Client
//!
//! Thin JSON-over-HTTP wrapper around the provisioning backend. Every request
//! goes through [`ApiGateway::call_detailed`], which classifies failures into
//! [`GatewayError`]; [`ApiGateway::call`] is the silent variant for call sites
//! that only care whether data came back.
//!
//! Nothing here retries. A failed call surfaces immediately and the user
//! retries by pressing the button again.

use std::time::{Duration, Instant};

use reqwest::Method;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

/// Maximum characters of a backend error reason shown to users
pub const MAX_REASON_CHARS: usize = 200;

/// Classified backend failure
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// Connection refused, DNS failure or timeout
    #[error("could not reach the API: {reason}")]
    Unreachable {
        /// Transport-level detail (for logs only)
        reason: String,
    },

    /// The backend answered with a non-2xx status
    #[error("API returned {status}: {message}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Reason extracted from the response body
        message: String,
    },

    /// The backend answered 2xx but the payload was unusable
    #[error("unexpected API response: {0}")]
    Malformed(String),
}

impl GatewayError {
    /// Text safe to show to the end user
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Unreachable { .. } => "could not reach the API".to_string(),
            Self::Rejected { message, .. } => message.clone(),
            Self::Malformed(_) => "the API returned an unexpected response".to_string(),
        }
    }

    /// Whether the failure happened before the backend answered
    #[must_use]
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable { .. })
    }
}

/// Timeout class of a backend call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallClass {
    /// Reads that should fail fast to keep the chat responsive
    Fast,
    /// Mutations and checks that touch remote machines
    Slow,
    /// Server creation and VPN verification
    Provisioning,
}

/// Per-class request timeouts
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GatewayTimeouts {
    /// Timeout for [`CallClass::Fast`]
    pub fast: Duration,
    /// Timeout for [`CallClass::Slow`]
    pub slow: Duration,
    /// Timeout for [`CallClass::Provisioning`]
    pub provisioning: Duration,
}

impl Default for GatewayTimeouts {
    fn default() -> Self {
        Self {
            fast: Duration::from_secs(5),
            slow: Duration::from_secs(30),
            provisioning: Duration::from_secs(60),
        }
    }
}

impl GatewayTimeouts {
    /// Timeout for a call class
    #[must_use]
    pub fn for_class(&self, class: CallClass) -> Duration {
        match class {
            CallClass::Fast => self.fast,
            CallClass::Slow => self.slow,
            CallClass::Provisioning => self.provisioning,
        }
    }
}

/// A single backend request
#[derive(Clone, Debug)]
pub struct ApiRequest {
    /// HTTP method
    pub method: Method,
    /// Path relative to the base URL, starting with `/`
    pub path: String,
    /// Optional JSON body
    pub body: Option<Value>,
    /// Query parameters
    pub query: Vec<(String, String)>,
    /// Timeout class
    pub class: CallClass,
}

impl ApiRequest {
    /// Create a request with no body or query
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            query: Vec::new(),
            class: CallClass::Fast,
        }
    }

    /// Shorthand for a GET request
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// Shorthand for a POST request
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// Shorthand for a DELETE request
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Attach a JSON body
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Append a query parameter
    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Set the timeout class
    #[must_use]
    pub fn with_class(mut self, class: CallClass) -> Self {
        self.class = class;
        self
    }
}

/// HTTP gateway to the provisioning backend
#[derive(Clone, Debug)]
pub struct ApiGateway {
    /// Base URL without trailing slash
    base_url: String,
    /// Timeouts per call class
    timeouts: GatewayTimeouts,
    /// HTTP client
    http_client: reqwest::Client,
}

impl ApiGateway {
    /// Create a new gateway
    pub fn new(base_url: impl Into<String>, timeouts: GatewayTimeouts) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("hopevpn-conductor/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();

        Self {
            base_url,
            timeouts,
            http_client,
        }
    }

    /// Base URL this gateway talks to
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Configured timeouts
    #[must_use]
    pub fn timeouts(&self) -> GatewayTimeouts {
        self.timeouts
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Perform a request, returning `None` on any failure
    pub async fn call(&self, request: ApiRequest) -> Option<Value> {
        self.call_detailed(request).await.ok()
    }

    /// Perform a request, classifying any failure
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Unreachable`] on transport failure,
    /// [`GatewayError::Rejected`] on a non-2xx status and
    /// [`GatewayError::Malformed`] when a 2xx body is not valid JSON.
    pub async fn call_detailed(&self, request: ApiRequest) -> Result<Value, GatewayError> {
        let start = Instant::now();
        let timeout = self.timeouts.for_class(request.class);

        let mut builder = self
            .http_client
            .request(request.method.clone(), self.url(&request.path))
            .timeout(timeout);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    method = %request.method,
                    path = %request.path,
                    timeout_ms = timeout.as_millis() as u64,
                    error = %e,
                    "API request failed"
                );
                return Err(GatewayError::Unreachable {
                    reason: transport_reason(&e),
                });
            }
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!(path = %request.path, error = %e, "Failed to read API response body");
                return Err(GatewayError::Unreachable {
                    reason: transport_reason(&e),
                });
            }
        };

        if !status.is_success() {
            let message = extract_error_message(status.as_u16(), &body);
            warn!(
                method = %request.method,
                path = %request.path,
                status = status.as_u16(),
                reason = %message,
                "API rejected request"
            );
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        debug!(
            method = %request.method,
            path = %request.path,
            status = status.as_u16(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "API request succeeded"
        );

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| {
            warn!(path = %request.path, error = %e, "API returned invalid JSON");
            GatewayError::Malformed(e.to_string())
        })
    }

    /// Probe `GET /health` and report whether it answered `{"ok": true}`
    pub async fn health_check(&self) -> bool {
        let request = ApiRequest::get("/health");
        matches!(
            self.call(request).await,
            Some(ref v) if v.get("ok").and_then(Value::as_bool) == Some(true)
        )
    }
}

fn transport_reason(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "timed out".to_string()
    } else if e.is_connect() {
        "connection failed".to_string()
    } else {
        e.to_string()
    }
}

/// Extract a user-presentable reason from a non-2xx response body
///
/// Prefers the JSON `message` field (or `error` as a fallback spelling),
/// then the start of the raw body, then `HTTP <status>`.
#[must_use]
pub fn extract_error_message(status: u16, body: &str) -> String {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
        for key in ["message", "error"] {
            if let Some(message) = map.get(key).and_then(Value::as_str) {
                if !message.trim().is_empty() {
                    return truncate_chars(message.trim(), MAX_REASON_CHARS);
                }
            }
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {status}")
    } else {
        truncate_chars(trimmed, MAX_REASON_CHARS)
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_message_field() {
        assert_eq!(
            extract_error_message(400, r#"{"message":"invalid token"}"#),
            "invalid token"
        );
        assert_eq!(
            extract_error_message(500, r#"{"error":"boom","code":1}"#),
            "boom"
        );
    }

    #[test]
    fn test_extract_raw_body_truncated() {
        let body = "x".repeat(500);
        let message = extract_error_message(502, &body);
        assert_eq!(message.chars().count(), MAX_REASON_CHARS);
    }

    #[test]
    fn test_extract_falls_back_to_status() {
        assert_eq!(extract_error_message(404, ""), "HTTP 404");
        assert_eq!(extract_error_message(503, "   \n"), "HTTP 503");
    }

    #[test]
    fn test_extract_json_without_message_uses_body() {
        assert_eq!(
            extract_error_message(422, r#"{"detail":"nope"}"#),
            r#"{"detail":"nope"}"#
        );
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let body = "ж".repeat(300);
        let message = extract_error_message(400, &body);
        assert_eq!(message.chars().count(), MAX_REASON_CHARS);
    }

    #[test]
    fn test_user_messages() {
        let e = GatewayError::Unreachable {
            reason: "timed out".to_string(),
        };
        assert_eq!(e.user_message(), "could not reach the API");
        assert!(e.is_unreachable());

        let e = GatewayError::Rejected {
            status: 400,
            message: "invalid token".to_string(),
        };
        assert_eq!(e.user_message(), "invalid token");
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let gw = ApiGateway::new("http://localhost:3000///", GatewayTimeouts::default());
        assert_eq!(gw.base_url(), "http://localhost:3000");
        assert_eq!(gw.url("/servers"), "http://localhost:3000/servers");
    }

    #[test]
    fn test_timeout_classes() {
        let t = GatewayTimeouts::default();
        assert!(t.for_class(CallClass::Fast) < t.for_class(CallClass::Slow));
        assert!(t.for_class(CallClass::Slow) <= t.for_class(CallClass::Provisioning));
    }
}
