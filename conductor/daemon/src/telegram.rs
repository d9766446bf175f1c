//! Telegram Bot API Surface
//!
//! [`ChatSurface`] over the Telegram Bot API, plus the update types the
//! polling loop needs. Messages are sent as plain text; screens map onto
//! inline keyboards one row per action row.
//!
//! The bot token is part of every request URL. It never appears in logs:
//! request errors are stripped of their URL before they are formatted.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use hopevpn_conductor::{
    Action, ChatId, ChatSurface, ExternalUserId, MessageId, MessageRef, Screen, SurfaceError,
    Turn, TurnEvent,
};

const API_BASE: &str = "https://api.telegram.org";

/// Headroom on top of the long-poll timeout for the HTTP request itself
const POLL_SLACK: Duration = Duration::from_secs(10);

/// Timeout for every call except `getUpdates`
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Telegram rejects message text longer than this
const MAX_TEXT_CHARS: usize = 4096;

/// Failure talking to the Bot API
#[derive(Debug, Error)]
pub enum TelegramError {
    /// Request did not complete
    #[error("telegram request failed: {0}")]
    Http(String),
    /// Bot API answered `ok: false`
    #[error("telegram API error {code}: {description}")]
    Api {
        /// `error_code` from the response
        code: i64,
        /// `description` from the response
        description: String,
    },
    /// Response could not be decoded
    #[error("unexpected telegram response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for TelegramError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.without_url().to_string())
    }
}

impl From<TelegramError> for SurfaceError {
    fn from(e: TelegramError) -> Self {
        match e {
            TelegramError::Api { description, .. }
                if description.contains("message is not modified") =>
            {
                SurfaceError::NotModified
            }
            TelegramError::Api { description, .. } => SurfaceError::Rejected(description),
            TelegramError::Http(reason) | TelegramError::Decode(reason) => {
                SurfaceError::Transport(reason)
            }
        }
    }
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<i64>,
}

/// Incoming update from `getUpdates`
#[derive(Clone, Debug, Deserialize)]
pub struct Update {
    /// Monotonic update id
    pub update_id: i64,
    /// New message
    pub message: Option<Message>,
    /// Button press
    pub callback_query: Option<CallbackQuery>,
}

/// Chat message
#[derive(Clone, Debug, Deserialize)]
pub struct Message {
    /// Id within the chat
    pub message_id: i64,
    /// Chat the message belongs to
    pub chat: Chat,
    /// Sender, absent for channel posts
    pub from: Option<User>,
    /// Text content
    pub text: Option<String>,
}

/// Chat
#[derive(Clone, Debug, Deserialize)]
pub struct Chat {
    /// Chat id
    pub id: i64,
}

/// Telegram user
#[derive(Clone, Debug, Deserialize)]
pub struct User {
    /// User id
    pub id: i64,
    /// Username, if set
    pub username: Option<String>,
}

/// Inline button press
#[derive(Clone, Debug, Deserialize)]
pub struct CallbackQuery {
    /// Id to acknowledge
    pub id: String,
    /// Who pressed
    pub from: User,
    /// Message carrying the button
    pub message: Option<Message>,
    /// Callback data
    pub data: Option<String>,
}

#[derive(Debug, Serialize)]
struct InlineKeyboardMarkup {
    inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

#[derive(Debug, Serialize)]
struct InlineKeyboardButton {
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    callback_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
}

fn keyboard(screen: &Screen) -> Option<InlineKeyboardMarkup> {
    if screen.rows.is_empty() {
        return None;
    }
    let inline_keyboard = screen
        .rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|action| match action {
                    Action::Callback { label, token } => InlineKeyboardButton {
                        text: label.clone(),
                        callback_data: Some(token.clone()),
                        url: None,
                    },
                    Action::Url { label, url } => InlineKeyboardButton {
                        text: label.clone(),
                        callback_data: None,
                        url: Some(url.clone()),
                    },
                })
                .collect()
        })
        .collect();
    Some(InlineKeyboardMarkup { inline_keyboard })
}

fn clip_text(text: &str) -> String {
    if text.chars().count() <= MAX_TEXT_CHARS {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(MAX_TEXT_CHARS - 1).collect();
    clipped.push('…');
    clipped
}

/// What the polling loop should do with an update
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    /// Hand to the conductor
    Turn(Turn),
    /// Button press that cannot be routed; acknowledge only
    Unroutable {
        /// Callback id to acknowledge
        callback_id: String,
    },
}

/// Turn an update into something the loop can act on
///
/// Updates without text or a sender are dropped.
#[must_use]
pub fn classify(update: Update) -> Option<Inbound> {
    if let Some(query) = update.callback_query {
        let (Some(message), Some(data)) = (query.message, query.data) else {
            return Some(Inbound::Unroutable {
                callback_id: query.id,
            });
        };
        let chat = ChatId(message.chat.id);
        let event = TurnEvent::Callback {
            callback_id: query.id,
            message: MessageRef::new(chat, MessageId(message.message_id)),
            data,
        };
        return Some(Inbound::Turn(Turn::new(
            ExternalUserId(query.from.id),
            chat,
            event,
        )));
    }

    let message = update.message?;
    let from = message.from?;
    let text = message.text?;
    Some(Inbound::Turn(Turn::new(
        ExternalUserId(from.id),
        ChatId(message.chat.id),
        TurnEvent::from_text(text),
    )))
}

// =============================================================================
// Client
// =============================================================================

/// Bot API client and chat surface
#[derive(Clone)]
pub struct TelegramSurface {
    http: reqwest::Client,
    base: String,
}

impl std::fmt::Debug for TelegramSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramSurface").finish_non_exhaustive()
    }
}

impl TelegramSurface {
    /// Client for the bot identified by `token`
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(token: &str) -> Result<Self, TelegramError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("hopevpn-daemon/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base: format!("{API_BASE}/bot{token}"),
        })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{method}", self.base)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<T, TelegramError> {
        let response = self
            .http
            .post(self.url(method))
            .timeout(timeout)
            .json(body)
            .send()
            .await?;
        Self::decode(method, response).await
    }

    async fn decode<T: DeserializeOwned>(
        method: &str,
        response: reqwest::Response,
    ) -> Result<T, TelegramError> {
        let parsed: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| TelegramError::Decode(e.without_url().to_string()))?;

        if !parsed.ok {
            let err = TelegramError::Api {
                code: parsed.error_code.unwrap_or_default(),
                description: parsed.description.unwrap_or_default(),
            };
            debug!(method, error = %err, "Bot API call rejected");
            return Err(err);
        }
        parsed
            .result
            .ok_or_else(|| TelegramError::Decode(format!("{method} returned no result")))
    }

    /// Bot identity, used to confirm the token at startup
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails.
    pub async fn get_me(&self) -> Result<User, TelegramError> {
        self.call("getMe", &json!({}), REQUEST_TIMEOUT).await
    }

    /// Long-poll for updates after `offset`
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails.
    pub async fn get_updates(
        &self,
        offset: i64,
        poll_timeout: Duration,
    ) -> Result<Vec<Update>, TelegramError> {
        let body = json!({
            "offset": offset,
            "timeout": poll_timeout.as_secs(),
            "allowed_updates": ["message", "callback_query"],
        });
        self.call("getUpdates", &body, poll_timeout + POLL_SLACK)
            .await
    }
}

#[async_trait]
impl ChatSurface for TelegramSurface {
    async fn send_message(&self, chat: ChatId, screen: &Screen) -> Result<MessageRef, SurfaceError> {
        let mut body = json!({
            "chat_id": chat.0,
            "text": clip_text(&screen.text),
            "disable_web_page_preview": true,
        });
        if let Some(markup) = keyboard(screen) {
            body["reply_markup"] = json!(markup);
        }
        let message: Message = self.call("sendMessage", &body, REQUEST_TIMEOUT).await?;
        Ok(MessageRef::new(
            ChatId(message.chat.id),
            MessageId(message.message_id),
        ))
    }

    async fn edit_message(&self, target: MessageRef, screen: &Screen) -> Result<(), SurfaceError> {
        let mut body = json!({
            "chat_id": target.chat_id.0,
            "message_id": target.message_id.0,
            "text": clip_text(&screen.text),
            "disable_web_page_preview": true,
        });
        // An empty keyboard removes the old buttons
        body["reply_markup"] = json!(keyboard(screen).unwrap_or(InlineKeyboardMarkup {
            inline_keyboard: Vec::new(),
        }));
        let _: Value = self.call("editMessageText", &body, REQUEST_TIMEOUT).await?;
        Ok(())
    }

    async fn send_document(
        &self,
        chat: ChatId,
        filename: &str,
        bytes: Vec<u8>,
        caption: Option<&str>,
    ) -> Result<(), SurfaceError> {
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str("application/x-pem-file")
            .map_err(|e| SurfaceError::Transport(e.without_url().to_string()))?;
        let mut form = reqwest::multipart::Form::new()
            .text("chat_id", chat.0.to_string())
            .part("document", part);
        if let Some(caption) = caption {
            form = form.text("caption", caption.to_string());
        }

        let response = self
            .http
            .post(self.url("sendDocument"))
            .timeout(REQUEST_TIMEOUT)
            .multipart(form)
            .send()
            .await
            .map_err(|e| SurfaceError::from(TelegramError::from(e)))?;
        let _: Message = Self::decode("sendDocument", response).await?;
        Ok(())
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        notice: Option<&str>,
    ) -> Result<(), SurfaceError> {
        let mut body = json!({ "callback_query_id": callback_id });
        if let Some(text) = notice {
            body["text"] = json!(text);
        }
        let result: Result<bool, _> = self
            .call("answerCallbackQuery", &body, REQUEST_TIMEOUT)
            .await;
        if let Err(ref e) = result {
            warn!(error = %e, "answerCallbackQuery failed");
        }
        result.map(|_| ()).map_err(SurfaceError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hopevpn_conductor::{BotCommand, CallbackAction};
    use pretty_assertions::assert_eq;

    fn update(raw: Value) -> Update {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn test_classify_text_message() {
        let inbound = classify(update(json!({
            "update_id": 1,
            "message": {
                "message_id": 10,
                "chat": { "id": 500 },
                "from": { "id": 42, "username": "alice" },
                "text": "/start@HopeVpnBot"
            }
        })));
        assert_eq!(
            inbound,
            Some(Inbound::Turn(Turn::new(
                ExternalUserId(42),
                ChatId(500),
                TurnEvent::Command(BotCommand::Start)
            )))
        );
    }

    #[test]
    fn test_classify_callback() {
        let inbound = classify(update(json!({
            "update_id": 2,
            "callback_query": {
                "id": "cb-1",
                "from": { "id": 42 },
                "message": { "message_id": 11, "chat": { "id": 500 } },
                "data": "srv:abc"
            }
        })));
        let Some(Inbound::Turn(turn)) = inbound else {
            panic!("expected a turn");
        };
        assert_eq!(turn.user, ExternalUserId(42));
        assert_eq!(
            turn.event,
            TurnEvent::Callback {
                callback_id: "cb-1".to_string(),
                message: MessageRef::new(ChatId(500), MessageId(11)),
                data: "srv:abc".to_string(),
            }
        );
    }

    #[test]
    fn test_classify_unroutable_callback() {
        let inbound = classify(update(json!({
            "update_id": 3,
            "callback_query": { "id": "cb-2", "from": { "id": 1 }, "data": "main" }
        })));
        assert_eq!(
            inbound,
            Some(Inbound::Unroutable {
                callback_id: "cb-2".to_string()
            })
        );
    }

    #[test]
    fn test_classify_drops_non_text() {
        let inbound = classify(update(json!({
            "update_id": 4,
            "message": { "message_id": 1, "chat": { "id": 1 }, "from": { "id": 1 } }
        })));
        assert!(inbound.is_none());
    }

    #[test]
    fn test_keyboard_mapping() {
        let screen = Screen::text("hi")
            .button("Main", &CallbackAction::Main)
            .row(vec![Action::url("Docs", "https://example.com")]);
        let markup = serde_json::to_value(keyboard(&screen).unwrap()).unwrap();
        assert_eq!(
            markup,
            json!({
                "inline_keyboard": [
                    [{ "text": "Main", "callback_data": "main" }],
                    [{ "text": "Docs", "url": "https://example.com" }]
                ]
            })
        );
        assert!(keyboard(&Screen::text("plain")).is_none());
    }

    #[test]
    fn test_not_modified_maps_to_surface_error() {
        let err = TelegramError::Api {
            code: 400,
            description: "Bad Request: message is not modified".to_string(),
        };
        assert_eq!(SurfaceError::from(err), SurfaceError::NotModified);
    }

    #[test]
    fn test_clip_text() {
        let long = "a".repeat(MAX_TEXT_CHARS + 10);
        assert_eq!(clip_text(&long).chars().count(), MAX_TEXT_CHARS);
        assert_eq!(clip_text("short"), "short");
    }
}
