//! Backend Traits
//!
//! The controller talks to the provisioning backend only through
//! [`VpnBackend`]. The HTTP implementation lives in `http.rs`; tests plug in
//! in-memory doubles.
//!
//! Methods returning `Result` are call sites that must be able to tell the
//! user why something failed. Methods returning `Option` tolerate silent
//! failure.

use async_trait::async_trait;

use super::gateway::GatewayError;
use super::models::{
    AggregateStats, HealthReport, Provider, Selection, Server, UserLookup, UserRecord,
    VpnVerification,
};
use crate::messages::{BackendUserId, ExternalUserId};

/// Provisioning backend contract
#[async_trait]
pub trait VpnBackend: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Check if the backend is reachable
    async fn health_check(&self) -> bool;

    /// Register (idempotently) a chat user and return the canonical id
    async fn signup(&self, external: ExternalUserId) -> Result<BackendUserId, GatewayError>;

    /// Look a user up
    ///
    /// `Ok(None)` means the backend answered that the user does not exist.
    async fn lookup_user(&self, lookup: UserLookup) -> Result<Option<UserRecord>, GatewayError>;

    /// Look a user up, treating every failure as "not found"
    async fn find_user(&self, lookup: UserLookup) -> Option<UserRecord> {
        match self.lookup_user(lookup).await {
            Ok(record) => record,
            Err(e) => {
                tracing::debug!(error = %e, "User lookup failed");
                None
            }
        }
    }

    /// All providers known to the backend
    async fn providers(&self) -> Result<Vec<Provider>, GatewayError>;

    /// Providers for which the user saved a token
    async fn selections(&self, user: &BackendUserId) -> Result<Vec<Selection>, GatewayError>;

    /// Save a provider token
    async fn save_token(
        &self,
        user: &BackendUserId,
        provider: &str,
        token: &str,
    ) -> Result<(), GatewayError>;

    /// Remove a provider token
    async fn remove_token(&self, user: &BackendUserId, provider: &str)
        -> Result<(), GatewayError>;

    /// Servers owned by the user
    async fn servers(&self, user: &BackendUserId) -> Result<Vec<Server>, GatewayError>;

    /// One server owned by the user
    async fn server(&self, user: &BackendUserId, server_id: &str) -> Result<Server, GatewayError>;

    /// Start provisioning a new server
    async fn create_server(&self, user: &BackendUserId) -> Result<(), GatewayError>;

    /// Destroy a server
    async fn delete_server(&self, user: &BackendUserId, server_id: &str)
        -> Result<(), GatewayError>;

    /// Run a reachability check against a server
    async fn check_server(
        &self,
        user: &BackendUserId,
        server_id: &str,
    ) -> Result<HealthReport, GatewayError>;

    /// Verify the VPN endpoint on a server
    async fn verify_vpn(
        &self,
        user: &BackendUserId,
        server_id: &str,
    ) -> Result<VpnVerification, GatewayError>;

    /// Raw metrics exposition text of a server
    async fn server_metrics(
        &self,
        user: &BackendUserId,
        server_id: &str,
    ) -> Result<String, GatewayError>;

    /// Private SSH key of a server
    async fn ssh_key(&self, user: &BackendUserId, server_id: &str) -> Result<String, GatewayError>;

    /// Delete the user account and everything it owns
    async fn delete_account(&self, user: &BackendUserId) -> Result<(), GatewayError>;

    /// Service-wide counters
    async fn aggregate_stats(&self) -> Option<AggregateStats>;
}
