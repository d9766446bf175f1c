//! Identifiers and Message References
//!
//! Small strongly-typed identifiers shared by the controller, the session
//! store and chat surfaces. Keeping them distinct types prevents mixing a
//! chat id with a user id, which are both plain integers on the wire.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Identity of an end user as reported by the chat transport
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExternalUserId(pub i64);

impl fmt::Display for ExternalUserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Chat in which a conversation happens
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transport-assigned message number, unique within a chat
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub i64);

/// A stable reference to one rendered chat message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    /// Chat the message lives in
    pub chat_id: ChatId,
    /// Message number inside that chat
    pub message_id: MessageId,
}

impl MessageRef {
    /// Create a new message reference
    #[must_use]
    pub fn new(chat_id: ChatId, message_id: MessageId) -> Self {
        Self {
            chat_id,
            message_id,
        }
    }
}

impl fmt::Display for MessageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.chat_id.0, self.message_id.0)
    }
}

/// Canonical user identity assigned by the provisioning backend
///
/// The backend is inconsistent about whether it returns ids as JSON strings
/// or numbers, so deserialization accepts both and stores the textual form.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct BackendUserId(pub String);

impl BackendUserId {
    /// Create a backend user id from anything string-like
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BackendUserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for BackendUserId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        string_or_number(deserializer).map(Self)
    }
}

/// Deserialize a JSON string or number into its textual form
pub(crate) fn string_or_number<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<String, D::Error> {
    use serde::de::Error;

    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(D::Error::custom(format!(
            "expected string or number, found {other}"
        ))),
    }
}

/// Correlation id attached to every processed turn for log tracing
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TurnId(uuid::Uuid);

impl TurnId {
    /// Generate a fresh turn id
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for TurnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps log lines readable
        let s = self.0.simple().to_string();
        f.write_str(&s[..8])
    }
}
