//! Chat Surface
//!
//! The narrow contract the conductor uses to talk to a chat transport:
//! send a screen, edit a screen in place, deliver a file, acknowledge a
//! button press. Transports map [`Action`](crate::views::Action)s onto their
//! own button widgets.
//!
//! [`RecordingSurface`] is an in-process implementation that keeps every
//! operation in memory. It backs the conductor's tests and is handy for
//! driving conversations without a network.

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

use crate::messages::{ChatId, MessageId, MessageRef};
use crate::views::Screen;

/// Failure reported by a chat transport
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SurfaceError {
    /// Edit was a no-op because the content did not change
    #[error("message is not modified")]
    NotModified,
    /// Transport refused the request
    #[error("rejected by transport: {0}")]
    Rejected(String),
    /// Transport could not be reached
    #[error("transport failure: {0}")]
    Transport(String),
}

/// Chat transport as seen by the conductor
#[async_trait]
pub trait ChatSurface: Send + Sync {
    /// Send a new message
    async fn send_message(&self, chat: ChatId, screen: &Screen) -> Result<MessageRef, SurfaceError>;

    /// Replace the content of an existing message
    async fn edit_message(&self, target: MessageRef, screen: &Screen) -> Result<(), SurfaceError>;

    /// Deliver a file as a downloadable attachment
    async fn send_document(
        &self,
        chat: ChatId,
        filename: &str,
        bytes: Vec<u8>,
        caption: Option<&str>,
    ) -> Result<(), SurfaceError>;

    /// Acknowledge a button press, optionally with a short notice
    async fn answer_callback(
        &self,
        callback_id: &str,
        notice: Option<&str>,
    ) -> Result<(), SurfaceError>;
}

/// Operation performed on a [`RecordingSurface`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SurfaceOp {
    /// New message
    Sent {
        /// Assigned message
        target: MessageRef,
        /// Rendered screen
        screen: Screen,
    },
    /// Edit in place
    Edited {
        /// Edited message
        target: MessageRef,
        /// Rendered screen
        screen: Screen,
    },
    /// File delivery
    Document {
        /// Destination chat
        chat: ChatId,
        /// File name
        filename: String,
        /// File content
        bytes: Vec<u8>,
        /// Optional caption
        caption: Option<String>,
    },
    /// Callback acknowledgement
    Answered {
        /// Transport callback id
        callback_id: String,
        /// Optional notice text
        notice: Option<String>,
    },
}

/// In-memory surface that records every operation
#[derive(Debug)]
pub struct RecordingSurface {
    ops: Mutex<Vec<SurfaceOp>>,
    next_id: AtomicI64,
    edit_failure: Mutex<Option<SurfaceError>>,
}

impl Default for RecordingSurface {
    fn default() -> Self {
        Self {
            ops: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1),
            edit_failure: Mutex::new(None),
        }
    }
}

impl RecordingSurface {
    /// Empty recorder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent edit fail with `error`
    pub fn fail_edits_with(&self, error: Option<SurfaceError>) {
        *self.edit_failure.lock() = error;
    }

    /// All recorded operations
    #[must_use]
    pub fn ops(&self) -> Vec<SurfaceOp> {
        self.ops.lock().clone()
    }

    /// Drop recorded operations
    pub fn clear(&self) {
        self.ops.lock().clear();
    }

    /// Most recently rendered screen, sent or edited
    #[must_use]
    pub fn last_screen(&self) -> Option<Screen> {
        self.ops.lock().iter().rev().find_map(|op| match op {
            SurfaceOp::Sent { screen, .. } | SurfaceOp::Edited { screen, .. } => {
                Some(screen.clone())
            }
            _ => None,
        })
    }

    /// Number of new messages sent
    #[must_use]
    pub fn sent_count(&self) -> usize {
        self.count(|op| matches!(op, SurfaceOp::Sent { .. }))
    }

    /// Number of edits that succeeded
    #[must_use]
    pub fn edit_count(&self) -> usize {
        self.count(|op| matches!(op, SurfaceOp::Edited { .. }))
    }

    /// Acknowledgements, in order
    #[must_use]
    pub fn answers(&self) -> Vec<(String, Option<String>)> {
        self.ops
            .lock()
            .iter()
            .filter_map(|op| match op {
                SurfaceOp::Answered {
                    callback_id,
                    notice,
                } => Some((callback_id.clone(), notice.clone())),
                _ => None,
            })
            .collect()
    }

    fn count(&self, pred: impl Fn(&SurfaceOp) -> bool) -> usize {
        self.ops.lock().iter().filter(|op| pred(op)).count()
    }

    fn push(&self, op: SurfaceOp) {
        self.ops.lock().push(op);
    }
}

#[async_trait]
impl ChatSurface for RecordingSurface {
    async fn send_message(&self, chat: ChatId, screen: &Screen) -> Result<MessageRef, SurfaceError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let target = MessageRef::new(chat, MessageId(id));
        self.push(SurfaceOp::Sent {
            target,
            screen: screen.clone(),
        });
        Ok(target)
    }

    async fn edit_message(&self, target: MessageRef, screen: &Screen) -> Result<(), SurfaceError> {
        if let Some(err) = self.edit_failure.lock().clone() {
            return Err(err);
        }
        self.push(SurfaceOp::Edited {
            target,
            screen: screen.clone(),
        });
        Ok(())
    }

    async fn send_document(
        &self,
        chat: ChatId,
        filename: &str,
        bytes: Vec<u8>,
        caption: Option<&str>,
    ) -> Result<(), SurfaceError> {
        self.push(SurfaceOp::Document {
            chat,
            filename: filename.to_string(),
            bytes,
            caption: caption.map(str::to_string),
        });
        Ok(())
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        notice: Option<&str>,
    ) -> Result<(), SurfaceError> {
        self.push(SurfaceOp::Answered {
            callback_id: callback_id.to_string(),
            notice: notice.map(str::to_string),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_surface_assigns_ids() {
        let surface = RecordingSurface::new();
        let a = surface
            .send_message(ChatId(1), &Screen::text("a"))
            .await
            .unwrap();
        let b = surface
            .send_message(ChatId(1), &Screen::text("b"))
            .await
            .unwrap();
        assert_ne!(a, b);
        assert_eq!(surface.sent_count(), 2);
        assert_eq!(surface.last_screen().unwrap().text, "b");
    }

    #[tokio::test]
    async fn test_recording_surface_edit_failure() {
        let surface = RecordingSurface::new();
        let target = MessageRef::new(ChatId(1), MessageId(9));
        surface.fail_edits_with(Some(SurfaceError::NotModified));
        assert_eq!(
            surface.edit_message(target, &Screen::text("x")).await,
            Err(SurfaceError::NotModified)
        );
        assert_eq!(surface.edit_count(), 0);

        surface.fail_edits_with(None);
        surface.edit_message(target, &Screen::text("x")).await.unwrap();
        assert_eq!(surface.edit_count(), 1);
    }
}
