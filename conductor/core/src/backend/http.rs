//! HTTP Backend Implementation
//!
//! [`VpnBackend`] over the backend's REST API, via [`ApiGateway`].
//!
//! # Endpoints
//!
//! - `POST /signup`, `GET /user`, `DELETE /user`
//! - `GET /providers`, `GET|POST|DELETE /selections`
//! - `GET /servers`, `GET /servers/{id}`, `POST /servers/create`,
//!   `DELETE /servers/{id}`
//! - `GET /servers/{id}/check|vpn-verify|metrics|ssh-key`
//! - `GET /stats/aggregate`

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use super::gateway::{ApiGateway, ApiRequest, CallClass, GatewayError, GatewayTimeouts};
use super::models::{
    AggregateStats, HealthEnvelope, HealthReport, MetricsEnvelope, Provider, Selection, Server,
    SignupResponse, SshKeyEnvelope, UserLookup, UserRecord, VpnVerification,
};
use super::traits::VpnBackend;
use crate::messages::{BackendUserId, ExternalUserId};

/// Backend client for the Hope VPN API
#[derive(Clone, Debug)]
pub struct HttpVpnBackend {
    gateway: ApiGateway,
}

impl HttpVpnBackend {
    /// Create a backend client from an existing gateway
    #[must_use]
    pub fn new(gateway: ApiGateway) -> Self {
        Self { gateway }
    }

    /// Create a backend client for a base URL with default timeouts
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self::new(ApiGateway::new(base_url, GatewayTimeouts::default()))
    }

    /// The underlying gateway
    #[must_use]
    pub fn gateway(&self) -> &ApiGateway {
        &self.gateway
    }

    fn server_path(server_id: &str, suffix: &str) -> String {
        format!("/servers/{}{}", encode_segment(server_id), suffix)
    }

    async fn fetch<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, GatewayError> {
        let value = self.gateway.call_detailed(request).await?;
        decode(value)
    }

    async fn execute(&self, request: ApiRequest) -> Result<(), GatewayError> {
        self.gateway.call_detailed(request).await.map(|_| ())
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, GatewayError> {
    serde_json::from_value(value).map_err(|e| GatewayError::Malformed(e.to_string()))
}

/// Characters left as-is in a path segment (RFC 3986 unreserved)
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, SEGMENT).to_string()
}

#[async_trait]
impl VpnBackend for HttpVpnBackend {
    fn name(&self) -> &'static str {
        "HopeVPN"
    }

    async fn health_check(&self) -> bool {
        self.gateway.health_check().await
    }

    async fn signup(&self, external: ExternalUserId) -> Result<BackendUserId, GatewayError> {
        let request = ApiRequest::post("/signup").with_body(json!({ "telegramId": external.0 }));
        let response: SignupResponse = self.fetch(request).await?;
        Ok(response.user_id)
    }

    async fn lookup_user(&self, lookup: UserLookup) -> Result<Option<UserRecord>, GatewayError> {
        let request = match lookup {
            UserLookup::ById(id) => ApiRequest::get("/user").with_query("userId", id.0),
            UserLookup::ByTelegramId(id) => {
                ApiRequest::get("/user").with_query("telegramId", id.to_string())
            }
        };
        match self.gateway.call_detailed(request).await {
            Ok(Value::Null) | Err(GatewayError::Rejected { status: 404, .. }) => Ok(None),
            Ok(value) => decode(value).map(Some),
            Err(e) => Err(e),
        }
    }

    async fn providers(&self) -> Result<Vec<Provider>, GatewayError> {
        self.fetch(ApiRequest::get("/providers")).await
    }

    async fn selections(&self, user: &BackendUserId) -> Result<Vec<Selection>, GatewayError> {
        let request = ApiRequest::get("/selections").with_query("userId", user.as_str());
        self.fetch(request).await
    }

    async fn save_token(
        &self,
        user: &BackendUserId,
        provider: &str,
        token: &str,
    ) -> Result<(), GatewayError> {
        let request = ApiRequest::post("/selections")
            .with_body(json!({
                "userId": user.as_str(),
                "token": token,
                "provider": provider,
            }))
            .with_class(CallClass::Slow);
        self.execute(request).await
    }

    async fn remove_token(
        &self,
        user: &BackendUserId,
        provider: &str,
    ) -> Result<(), GatewayError> {
        let request = ApiRequest::delete("/selections").with_body(json!({
            "userId": user.as_str(),
            "provider": provider,
        }));
        self.execute(request).await
    }

    async fn servers(&self, user: &BackendUserId) -> Result<Vec<Server>, GatewayError> {
        let request = ApiRequest::get("/servers").with_query("userId", user.as_str());
        self.fetch(request).await
    }

    async fn server(&self, user: &BackendUserId, server_id: &str) -> Result<Server, GatewayError> {
        let request =
            ApiRequest::get(Self::server_path(server_id, "")).with_query("userId", user.as_str());
        self.fetch(request).await
    }

    async fn create_server(&self, user: &BackendUserId) -> Result<(), GatewayError> {
        let request = ApiRequest::post("/servers/create")
            .with_body(json!({ "userId": user.as_str() }))
            .with_class(CallClass::Provisioning);
        self.execute(request).await
    }

    async fn delete_server(
        &self,
        user: &BackendUserId,
        server_id: &str,
    ) -> Result<(), GatewayError> {
        let request = ApiRequest::delete(Self::server_path(server_id, ""))
            .with_body(json!({ "userId": user.as_str() }))
            .with_class(CallClass::Slow);
        self.execute(request).await
    }

    async fn check_server(
        &self,
        user: &BackendUserId,
        server_id: &str,
    ) -> Result<HealthReport, GatewayError> {
        let request = ApiRequest::get(Self::server_path(server_id, "/check"))
            .with_query("userId", user.as_str())
            .with_class(CallClass::Slow);
        let envelope: HealthEnvelope = self.fetch(request).await?;
        Ok(envelope.health)
    }

    async fn verify_vpn(
        &self,
        user: &BackendUserId,
        server_id: &str,
    ) -> Result<VpnVerification, GatewayError> {
        let request = ApiRequest::get(Self::server_path(server_id, "/vpn-verify"))
            .with_query("userId", user.as_str())
            .with_class(CallClass::Provisioning);
        self.fetch(request).await
    }

    async fn server_metrics(
        &self,
        user: &BackendUserId,
        server_id: &str,
    ) -> Result<String, GatewayError> {
        let request = ApiRequest::get(Self::server_path(server_id, "/metrics"))
            .with_query("userId", user.as_str());
        let envelope: MetricsEnvelope = self.fetch(request).await?;
        Ok(envelope.metrics)
    }

    async fn ssh_key(&self, user: &BackendUserId, server_id: &str) -> Result<String, GatewayError> {
        let request = ApiRequest::get(Self::server_path(server_id, "/ssh-key"))
            .with_query("userId", user.as_str());
        let envelope: SshKeyEnvelope = self.fetch(request).await?;
        Ok(envelope.private_key)
    }

    async fn delete_account(&self, user: &BackendUserId) -> Result<(), GatewayError> {
        let request = ApiRequest::delete("/user")
            .with_body(json!({ "userId": user.as_str() }))
            .with_class(CallClass::Slow);
        self.execute(request).await
    }

    async fn aggregate_stats(&self) -> Option<AggregateStats> {
        let value = self.gateway.call(ApiRequest::get("/stats/aggregate")).await?;
        decode(value).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_path_encodes_id() {
        assert_eq!(HttpVpnBackend::server_path("abc-1", ""), "/servers/abc-1");
        assert_eq!(
            HttpVpnBackend::server_path("a/b c", "/check"),
            "/servers/a%2Fb%20c/check"
        );
        assert_eq!(HttpVpnBackend::server_path("ü~x", ""), "/servers/%C3%BC~x");
    }

    #[test]
    fn test_decode_reports_malformed() {
        let err = decode::<Vec<Server>>(json!({"not": "a list"})).unwrap_err();
        assert!(matches!(err, GatewayError::Malformed(_)));
    }
}
