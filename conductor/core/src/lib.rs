//! Conductor Core - Session-Scoped Conversation Controller for Hope VPN
//!
//! This crate holds the conversation logic of the Hope VPN bot, completely
//! independent of any chat transport. A user talks to the bot to provision,
//! inspect and tear down VPN relay servers; the servers themselves are
//! managed by a separate provisioning backend reached over HTTP.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Chat transport                          │
//! │            (Telegram long polling in the daemon)             │
//! └──────────────┬──────────────────────────────▲────────────────┘
//!                │ Turn                         │ Screen
//! ┌──────────────▼──────────────────────────────┴────────────────┐
//! │                      CONDUCTOR CORE                          │
//! │  ┌──────────┐   ┌───────────┐   ┌────────┐   ┌────────────┐  │
//! │  │ Session  │   │ Conductor │──▶│ Views  │──▶│ Normalizer │  │
//! │  │  Store   │◀──│ (routing) │   └────────┘   └────────────┘  │
//! │  └──────────┘   └─────┬─────┘                                │
//! │                       │ VpnBackend                           │
//! │                 ┌─────▼──────┐                               │
//! │                 │ ApiGateway │                               │
//! │                 └─────┬──────┘                               │
//! └───────────────────────┼──────────────────────────────────────┘
//!                         │ JSON over HTTP
//!                  Provisioning backend
//! ```
//!
//! # Key Types
//!
//! - [`Conductor`]: routes turns and renders screens
//! - [`ChatSurface`]: what the conductor needs from a chat transport
//! - [`VpnBackend`]: what the conductor needs from the provisioning backend
//! - [`Session`]: per-user navigation state
//! - [`Screen`]: transport-neutral text plus actions
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use hopevpn_conductor::{
//!     backend::HttpVpnBackend, Conductor, ConductorLimits, RecordingSurface, Turn, TurnEvent,
//! };
//!
//! let backend = Arc::new(HttpVpnBackend::with_base_url("http://localhost:3000"));
//! let surface = Arc::new(RecordingSurface::new());
//! let conductor = Conductor::new(backend, surface.clone(), ConductorLimits::default());
//!
//! conductor
//!     .handle_turn(Turn::new(user, chat, TurnEvent::from_text("/start")))
//!     .await;
//! ```
//!
//! # Module Overview
//!
//! - [`backend`]: gateway client and typed backend access
//! - [`callback`]: button callback tokens
//! - [`conductor`]: routing and flow execution
//! - [`config`]: layered configuration (CLI, env, TOML, defaults)
//! - [`events`]: turns reported by a surface
//! - [`messages`]: identifiers shared across modules
//! - [`normalize`]: status bucketing, metrics parsing, unit formatting
//! - [`security`]: token validation and turn rate limiting
//! - [`session`]: per-user session store
//! - [`surface`]: chat transport contract
//! - [`views`]: screen builders
//!
//! # No Transport Dependencies
//!
//! This crate has **zero** dependencies on a chat SDK. Transports live in
//! the daemon.

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod callback;
pub mod conductor;
pub mod config;
pub mod events;
pub mod messages;
pub mod normalize;
pub mod security;
pub mod session;
pub mod surface;
pub mod views;

// Re-exports for convenience
pub use backend::{
    ApiGateway, ApiRequest, CallClass, GatewayError, GatewayTimeouts, HttpVpnBackend, VpnBackend,
};
pub use callback::{CallbackAction, CallbackParseError};
pub use conductor::{route, Conductor, Intent};
pub use events::{BotCommand, Turn, TurnEvent};
pub use messages::{BackendUserId, ChatId, ExternalUserId, MessageId, MessageRef, TurnId};
pub use security::{ConductorLimits, InputValidator, RateWindow, ValidationResult};
pub use session::{
    ConversationState, NavigationContext, PendingTokenAction, ReturnTo, Session, SessionStore,
};
pub use surface::{ChatSurface, RecordingSurface, SurfaceError, SurfaceOp};
pub use views::{Action, Screen};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, BotConfig, BotToml, ConfigError,
    ConfigOverrides,
};
