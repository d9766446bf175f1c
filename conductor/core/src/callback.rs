//! Callback Tokens
//!
//! Every interactive button carries a short opaque token of the form
//! `prefix` or `prefix:id`. Routing matches on the literal prefix and takes
//! the remainder as the id verbatim, so ids may themselves contain `:`.
//!
//! Prefixes that carry an id all end with `:` and no prefix is a prefix of
//! another, so the order of the lookup table does not matter.

use std::fmt;

use thiserror::Error;

/// Maximum callback payload the Telegram Bot API accepts, in bytes
pub const MAX_CALLBACK_BYTES: usize = 64;

/// Logical action behind a button
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum CallbackAction {
    /// Go to the main menu
    Main,
    /// Re-render the main menu
    Refresh,
    /// Restart onboarding as if `/start` was sent
    Restart,
    /// Show service-wide statistics
    Stats,

    /// Pick a provider during onboarding
    ChooseProvider(String),
    /// Replace the token already saved for a provider
    ReplaceToken(String),
    /// Keep the token already saved
    KeepToken,
    /// Abort token entry
    CancelTokenEntry,

    /// Open a server detail view
    OpenServer(String),
    /// Provision a new server
    CreateServer,
    /// Reachability check
    CheckServer(String),
    /// VPN verification
    VerifyVpn(String),
    /// Metrics summary
    ServerMetrics(String),
    /// Destroy a server
    DeleteServer(String),
    /// Export the SSH private key as a file
    ExportSshKey(String),

    /// Open the token inventory
    ManageTokens,
    /// Add a token for a provider from the inventory
    AddToken(String),
    /// Update a saved token from the inventory
    UpdateToken(String),
    /// Remove a saved token from the inventory
    RemoveToken(String),

    /// Ask for account deletion confirmation
    DeleteAccount,
    /// Confirm account deletion
    ConfirmDeleteAccount,
    /// Abort account deletion
    CancelDeleteAccount,
}

/// Failure to parse a callback token
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CallbackParseError {
    /// Token does not match any known prefix
    #[error("unknown callback token: {0}")]
    Unknown(String),
    /// Token matched an id-bearing prefix but the id is empty
    #[error("callback token {0} is missing its id")]
    MissingId(String),
}

type WithId = fn(String) -> CallbackAction;

const PLAIN: &[(&str, CallbackAction)] = &[
    ("main", CallbackAction::Main),
    ("refresh", CallbackAction::Refresh),
    ("start", CallbackAction::Restart),
    ("stats", CallbackAction::Stats),
    ("prov_keep", CallbackAction::KeepToken),
    ("tok_cancel", CallbackAction::CancelTokenEntry),
    ("srv_create", CallbackAction::CreateServer),
    ("tokens", CallbackAction::ManageTokens),
    ("acct_delete", CallbackAction::DeleteAccount),
    ("acct_delete_yes", CallbackAction::ConfirmDeleteAccount),
    ("acct_delete_no", CallbackAction::CancelDeleteAccount),
];

const WITH_ID: &[(&str, WithId)] = &[
    ("prov:", CallbackAction::ChooseProvider),
    ("prov_replace:", CallbackAction::ReplaceToken),
    ("srv:", CallbackAction::OpenServer),
    ("srv_check:", CallbackAction::CheckServer),
    ("srv_vpn:", CallbackAction::VerifyVpn),
    ("srv_metrics:", CallbackAction::ServerMetrics),
    ("srv_delete:", CallbackAction::DeleteServer),
    ("srv_key:", CallbackAction::ExportSshKey),
    ("tok_add:", CallbackAction::AddToken),
    ("tok_update:", CallbackAction::UpdateToken),
    ("tok_remove:", CallbackAction::RemoveToken),
];

impl CallbackAction {
    /// Parse a raw callback token
    ///
    /// # Errors
    ///
    /// Returns [`CallbackParseError`] if the token is unknown or lacks an id.
    pub fn parse(token: &str) -> Result<Self, CallbackParseError> {
        if let Some((_, action)) = PLAIN.iter().find(|(t, _)| *t == token) {
            return Ok(action.clone());
        }

        for (prefix, build) in WITH_ID {
            if let Some(id) = token.strip_prefix(prefix) {
                if id.is_empty() {
                    return Err(CallbackParseError::MissingId(token.to_string()));
                }
                return Ok(build(id.to_string()));
            }
        }

        Err(CallbackParseError::Unknown(token.to_string()))
    }

    /// Encode into the token carried by a button
    #[must_use]
    pub fn token(&self) -> String {
        let (prefix, id) = self.parts();
        match id {
            Some(id) => format!("{prefix}{id}"),
            None => prefix.to_string(),
        }
    }

    fn parts(&self) -> (&'static str, Option<&str>) {
        match self {
            Self::Main => ("main", None),
            Self::Refresh => ("refresh", None),
            Self::Restart => ("start", None),
            Self::Stats => ("stats", None),
            Self::ChooseProvider(p) => ("prov:", Some(p.as_str())),
            Self::ReplaceToken(p) => ("prov_replace:", Some(p.as_str())),
            Self::KeepToken => ("prov_keep", None),
            Self::CancelTokenEntry => ("tok_cancel", None),
            Self::OpenServer(id) => ("srv:", Some(id.as_str())),
            Self::CreateServer => ("srv_create", None),
            Self::CheckServer(id) => ("srv_check:", Some(id.as_str())),
            Self::VerifyVpn(id) => ("srv_vpn:", Some(id.as_str())),
            Self::ServerMetrics(id) => ("srv_metrics:", Some(id.as_str())),
            Self::DeleteServer(id) => ("srv_delete:", Some(id.as_str())),
            Self::ExportSshKey(id) => ("srv_key:", Some(id.as_str())),
            Self::ManageTokens => ("tokens", None),
            Self::AddToken(p) => ("tok_add:", Some(p.as_str())),
            Self::UpdateToken(p) => ("tok_update:", Some(p.as_str())),
            Self::RemoveToken(p) => ("tok_remove:", Some(p.as_str())),
            Self::DeleteAccount => ("acct_delete", None),
            Self::ConfirmDeleteAccount => ("acct_delete_yes", None),
            Self::CancelDeleteAccount => ("acct_delete_no", None),
        }
    }

    /// Whether the encoded token fits in a transport callback payload
    #[must_use]
    pub fn fits_transport(&self) -> bool {
        self.token().len() <= MAX_CALLBACK_BYTES
    }
}

impl fmt::Display for CallbackAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token())
    }
}
