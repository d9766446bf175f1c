//! Backend API health probe

use std::fmt;
use std::time::Duration;

use hopevpn_conductor::{ApiGateway, ApiRequest, GatewayError, GatewayTimeouts};
use serde_json::Value;

/// Timeout for the health request
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of probing `GET /health`
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Answered `{"ok": true}`
    Healthy,
    /// No connection could be made
    ConnectionFailed(String),
    /// No answer within [`PROBE_TIMEOUT`]
    Timeout,
    /// Answered, but not with `{"ok": true}`
    UnexpectedBody(String),
}

impl ProbeOutcome {
    /// Whether the backend is usable
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    fn from_error(err: GatewayError) -> Self {
        match err {
            GatewayError::Unreachable { reason } if reason == "timed out" => Self::Timeout,
            GatewayError::Unreachable { reason } => Self::ConnectionFailed(reason),
            GatewayError::Rejected { status, message } => {
                Self::UnexpectedBody(format!("HTTP {status}: {message}"))
            }
            GatewayError::Malformed(detail) => Self::UnexpectedBody(detail),
        }
    }

    fn from_body(body: &Value) -> Self {
        if body.get("ok").and_then(Value::as_bool) == Some(true) {
            Self::Healthy
        } else {
            Self::UnexpectedBody(body.to_string())
        }
    }
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::ConnectionFailed(reason) => write!(f, "connection failed ({reason})"),
            Self::Timeout => write!(f, "timeout after {}s", PROBE_TIMEOUT.as_secs()),
            Self::UnexpectedBody(body) => write!(f, "unexpected body: {body}"),
        }
    }
}

/// Probe the backend health endpoint once
pub async fn check_api(base_url: &str) -> ProbeOutcome {
    let timeouts = GatewayTimeouts {
        fast: PROBE_TIMEOUT,
        ..GatewayTimeouts::default()
    };
    let gateway = ApiGateway::new(base_url, timeouts);
    match gateway.call_detailed(ApiRequest::get("/health")).await {
        Ok(body) => ProbeOutcome::from_body(&body),
        Err(e) => ProbeOutcome::from_error(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_ok_body_is_healthy() {
        assert!(ProbeOutcome::from_body(&json!({ "ok": true })).is_healthy());
        assert!(!ProbeOutcome::from_body(&json!({ "ok": false })).is_healthy());
        assert!(!ProbeOutcome::from_body(&Value::Null).is_healthy());
    }

    #[test]
    fn test_error_classes() {
        assert_eq!(
            ProbeOutcome::from_error(GatewayError::Unreachable {
                reason: "timed out".to_string()
            }),
            ProbeOutcome::Timeout
        );
        assert_eq!(
            ProbeOutcome::from_error(GatewayError::Unreachable {
                reason: "connection failed".to_string()
            }),
            ProbeOutcome::ConnectionFailed("connection failed".to_string())
        );
        assert_eq!(
            ProbeOutcome::from_error(GatewayError::Rejected {
                status: 503,
                message: "down".to_string()
            })
            .to_string(),
            "unexpected body: HTTP 503: down"
        );
    }

    #[tokio::test]
    async fn test_unreachable_backend() {
        let outcome = check_api("http://127.0.0.1:1").await;
        assert!(matches!(outcome, ProbeOutcome::ConnectionFailed(_)));
    }
}
