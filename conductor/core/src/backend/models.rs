//! Backend Data Model
//!
//! Typed views of the JSON documents returned by the provisioning backend.
//! The backend is loose about field names (`Provider` vs `provider`,
//! `totalUsers` vs `users`, `userId` vs `id`); every alias is resolved here,
//! once, so the controller only ever sees one spelling.

use serde::{Deserialize, Serialize};

use crate::messages::{string_or_number, BackendUserId};

/// Response to `POST /signup`
#[derive(Clone, Debug, Deserialize)]
pub struct SignupResponse {
    /// Canonical user id
    #[serde(rename = "userId", alias = "id", alias = "user_id")]
    pub user_id: BackendUserId,
}

/// Response to `GET /user`
#[derive(Clone, Debug, Deserialize)]
pub struct UserRecord {
    /// Canonical user id
    #[serde(rename = "userId", alias = "id", alias = "user_id")]
    pub user_id: BackendUserId,
    /// Saved provider tokens
    #[serde(default)]
    pub selections: Vec<Selection>,
}

/// How to look a user up with `GET /user`
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UserLookup {
    /// By backend-assigned id
    ById(BackendUserId),
    /// By chat transport identity
    ByTelegramId(i64),
}

/// A cloud provider the backend can provision servers under
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    /// Stable lower-cased identifier
    #[serde(deserialize_with = "lowercase_name")]
    pub name: String,
    /// Whether new tokens may be saved for this provider
    #[serde(rename = "isActive", alias = "active", alias = "is_active", default)]
    pub is_active: bool,
    /// Optional human-readable title supplied by the backend
    #[serde(alias = "displayName", alias = "display_name", default)]
    pub title: Option<String>,
    /// Where to obtain an API token for this provider
    #[serde(
        rename = "docsUrl",
        alias = "tokenUrl",
        alias = "documentationUrl",
        alias = "docs_url",
        default
    )]
    pub docs_url: Option<String>,
}

impl Provider {
    /// Title for display, falling back to the capitalized name
    #[must_use]
    pub fn display_title(&self) -> String {
        match self.title.as_deref() {
            Some(title) if !title.trim().is_empty() => title.trim().to_string(),
            _ => capitalize(&self.name),
        }
    }
}

/// Reference to a provider inside a selection
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRef {
    /// Provider identifier
    #[serde(deserialize_with = "lowercase_name")]
    pub name: String,
}

/// A saved provider token (the token value itself is never returned)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    /// Provider the token belongs to
    #[serde(alias = "Provider")]
    pub provider: ProviderRef,
}

impl Selection {
    /// Provider identifier of this selection
    #[must_use]
    pub fn provider_name(&self) -> &str {
        &self.provider.name
    }
}

/// A provisioned (or provisioning) virtual server
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    /// Backend server id
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    /// Optional user-facing label
    #[serde(default, alias = "name")]
    pub label: Option<String>,
    /// Public address, absent before provisioning finishes
    #[serde(rename = "ipAddress", alias = "ip", alias = "ip_address", default)]
    pub ip_address: Option<String>,
    /// Free-text lifecycle status
    #[serde(default)]
    pub status: Option<String>,
    /// Free-text VPN install status
    #[serde(rename = "vpnInstallStatus", alias = "vpn_install_status", default)]
    pub vpn_install_status: Option<String>,
    /// Free-text VPN install message
    #[serde(rename = "vpnInstallMessage", alias = "vpn_install_message", default)]
    pub vpn_install_message: Option<String>,
}

/// Number of id characters shown when a server has no label
pub const SERVER_ID_PREFIX_LEN: usize = 8;

impl Server {
    /// Label for display, falling back to an id prefix
    #[must_use]
    pub fn display_label(&self) -> String {
        match self.label.as_deref() {
            Some(label) if !label.trim().is_empty() => label.trim().to_string(),
            _ => self.id.chars().take(SERVER_ID_PREFIX_LEN).collect(),
        }
    }

    /// Raw lifecycle status, empty when the backend sent none
    #[must_use]
    pub fn status_str(&self) -> &str {
        self.status.as_deref().unwrap_or("")
    }
}

/// Envelope of `GET /servers/{id}/check`
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct HealthEnvelope {
    pub health: HealthReport,
}

/// Reachability result for a server
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct HealthReport {
    /// Status string, when the backend reports one
    #[serde(default)]
    pub status: Option<String>,
    /// Whether the relay is reachable from the censored network
    #[serde(rename = "iranAccessible", alias = "accessible", default)]
    pub iran_accessible: Option<bool>,
    /// Human-readable detail
    #[serde(default)]
    pub message: Option<String>,
}

/// Result of `GET /servers/{id}/vpn-verify`
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct VpnVerification {
    /// Whether the VPN endpoint answered correctly
    #[serde(default)]
    pub ok: bool,
    /// Optional detail
    #[serde(default, alias = "error")]
    pub message: Option<String>,
}

/// Envelope of `GET /servers/{id}/metrics`
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct MetricsEnvelope {
    #[serde(default)]
    pub metrics: String,
}

/// Envelope of `GET /servers/{id}/ssh-key`
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct SshKeyEnvelope {
    #[serde(rename = "privateKey", alias = "private_key", alias = "key")]
    pub private_key: String,
}

/// Result of `GET /stats/aggregate`
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct AggregateStats {
    /// Registered users
    #[serde(rename = "totalUsers", alias = "users", default)]
    pub total_users: Option<u64>,
    /// Provisioned servers
    #[serde(rename = "totalServers", alias = "servers", default)]
    pub total_servers: Option<u64>,
    /// Clients currently connected to any relay
    #[serde(rename = "connectedClients", alias = "clients", default)]
    pub connected_clients: Option<u64>,
}

fn lowercase_name<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let name = String::deserialize(deserializer)?;
    Ok(name.trim().to_lowercase())
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
