//! Turn Events
//!
//! What a chat surface reports to the conductor. Surfaces do not interpret
//! anything: they forward raw text, command names and callback tokens, and
//! the conductor decides how to respond.

use serde::{Deserialize, Serialize};

use crate::messages::{ChatId, ExternalUserId, MessageRef};

/// One incoming user turn
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// Who sent it
    pub user: ExternalUserId,
    /// Where replies go
    pub chat: ChatId,
    /// What happened
    pub event: TurnEvent,
}

impl Turn {
    /// A turn from `user` in `chat`
    #[must_use]
    pub fn new(user: ExternalUserId, chat: ChatId, event: TurnEvent) -> Self {
        Self { user, chat, event }
    }

    /// Short event kind for logging
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self.event {
            TurnEvent::Command(_) => "command",
            TurnEvent::Text(_) => "text",
            TurnEvent::Callback { .. } => "callback",
        }
    }
}

/// Event carried by a turn
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnEvent {
    /// Slash command
    Command(BotCommand),
    /// Plain text message
    Text(String),
    /// Button press
    Callback {
        /// Transport id used to acknowledge the press
        callback_id: String,
        /// Message the button was attached to
        message: MessageRef,
        /// Raw callback token
        data: String,
    },
}

/// Slash commands the bot understands
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BotCommand {
    /// `/start`
    Start,
    /// `/cancel`
    Cancel,
    /// `/menu`
    Menu,
    /// `/stats`
    Stats,
    /// `/help`
    Help,
    /// Anything else starting with `/`
    Unknown(String),
}

impl BotCommand {
    /// Parse a message starting with `/`
    ///
    /// Accepts the `/name@botname` form and ignores trailing arguments.
    /// Returns `None` if the text is not a command at all.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let rest = text.trim_start().strip_prefix('/')?;
        let word = rest.split_whitespace().next().unwrap_or("");
        let name = word.split('@').next().unwrap_or("").to_ascii_lowercase();

        Some(match name.as_str() {
            "start" => Self::Start,
            "cancel" => Self::Cancel,
            "menu" => Self::Menu,
            "stats" => Self::Stats,
            "help" => Self::Help,
            _ => Self::Unknown(name),
        })
    }
}

impl TurnEvent {
    /// Classify raw message text as a command or plain text
    #[must_use]
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        match BotCommand::parse(&text) {
            Some(command) => Self::Command(command),
            None => Self::Text(text),
        }
    }
}
