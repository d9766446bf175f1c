//! Conductor - The Conversation Controller
//!
//! The conductor turns chat turns into backend calls and rendered screens.
//! It is transport-agnostic: it talks to the chat through [`ChatSurface`] and
//! to the provisioning service through [`VpnBackend`].
//!
//! Each turn is handled in two steps:
//! 1. [`route`] maps (state, pending input, event) to an [`Intent`] without
//!    side effects
//! 2. the intent is executed against the backend and rendered
//!
//! Rendering goes through a single primitive: a button pressed on the anchor
//! message edits that message in place, everything else sends a new message
//! that becomes the anchor.
//!
//! Backend failures never escape a turn. They degrade into a screen that
//! explains what happened and offers a way back to the main menu.

use std::fmt;
use std::sync::Arc;

use anyhow::Context;
use tracing::Instrument;

use crate::backend::{GatewayError, Provider, Server, UserLookup, VpnBackend};
use crate::callback::CallbackAction;
use crate::events::{BotCommand, Turn, TurnEvent};
use crate::messages::{BackendUserId, ChatId, MessageRef, TurnId};
use crate::normalize::MetricsSummary;
use crate::security::{ConductorLimits, InputValidator, ValidationResult};
use crate::session::{
    ConversationState, PendingTokenAction, ReturnTo, Session, SessionStore,
};
use crate::surface::{ChatSurface, SurfaceError};
use crate::views::{self, Screen};

/// What a turn asks the conductor to do
#[derive(Clone, PartialEq, Eq)]
pub enum Intent {
    /// Slash command
    Command(BotCommand),
    /// Text to submit as a provider token
    SubmitToken(String),
    /// Text that has no meaning in the current state
    IgnoreText,
    /// Button press valid in the current state
    Action(CallbackAction),
    /// Unknown, malformed or out-of-state button press
    Expired,
}

impl fmt::Debug for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command(c) => f.debug_tuple("Command").field(c).finish(),
            Self::SubmitToken(t) => write!(f, "SubmitToken(<{} bytes>)", t.len()),
            Self::IgnoreText => f.write_str("IgnoreText"),
            Self::Action(a) => f.debug_tuple("Action").field(a).finish(),
            Self::Expired => f.write_str("Expired"),
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command(c) => write!(f, "command:{c:?}"),
            Self::SubmitToken(_) => f.write_str("submit_token"),
            Self::IgnoreText => f.write_str("ignore_text"),
            Self::Action(a) => write!(f, "action:{a}"),
            Self::Expired => f.write_str("expired"),
        }
    }
}

/// Map an event to an intent
///
/// Pure: depends only on the session's state, its pending-input flag and
/// the event itself.
#[must_use]
pub fn route(state: ConversationState, awaiting_text: bool, event: &TurnEvent) -> Intent {
    match event {
        TurnEvent::Command(command) => Intent::Command(command.clone()),
        TurnEvent::Text(text) => {
            if state == ConversationState::EnterToken && awaiting_text {
                Intent::SubmitToken(text.clone())
            } else {
                Intent::IgnoreText
            }
        }
        TurnEvent::Callback { data, .. } => match CallbackAction::parse(data) {
            Ok(action) if action_allowed(state, &action) => Intent::Action(action),
            Ok(_) | Err(_) => Intent::Expired,
        },
    }
}

fn action_allowed(state: ConversationState, action: &CallbackAction) -> bool {
    use CallbackAction as A;
    use ConversationState as S;

    match action {
        A::ChooseProvider(_) | A::ReplaceToken(_) => {
            matches!(state, S::SelectProvider | S::EnterToken)
        }
        A::KeepToken => state == S::SelectProvider,
        A::CancelTokenEntry => state == S::EnterToken,
        A::ConfirmDeleteAccount => state == S::AccountDeleteConfirm,
        A::CheckServer(_)
        | A::VerifyVpn(_)
        | A::ServerMetrics(_)
        | A::DeleteServer(_)
        | A::ExportSshKey(_) => state == S::ServerDetails,
        A::Main
        | A::Refresh
        | A::Restart
        | A::Stats
        | A::OpenServer(_)
        | A::CreateServer
        | A::ManageTokens
        | A::AddToken(_)
        | A::UpdateToken(_)
        | A::RemoveToken(_)
        | A::DeleteAccount
        | A::CancelDeleteAccount => true,
    }
}

/// Rendering target for one turn
#[derive(Clone, Copy, Debug)]
struct TurnCtx {
    chat: ChatId,
    /// Message to edit: the pressed button's message, then whatever this
    /// turn last sent
    source: Option<MessageRef>,
}

/// Conversation controller
pub struct Conductor<B: VpnBackend, S: ChatSurface> {
    backend: Arc<B>,
    surface: Arc<S>,
    sessions: SessionStore,
    validator: InputValidator,
}

impl<B: VpnBackend, S: ChatSurface> Conductor<B, S> {
    /// Create a conductor with the given limits
    pub fn new(backend: Arc<B>, surface: Arc<S>, limits: ConductorLimits) -> Self {
        Self {
            backend,
            surface,
            sessions: SessionStore::new(),
            validator: InputValidator::new(limits),
        }
    }

    /// Session store
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Backend in use
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Surface in use
    pub fn surface(&self) -> &Arc<S> {
        &self.surface
    }

    /// Handle one user turn
    ///
    /// Never fails: errors are logged and turned into a generic failure
    /// screen.
    pub async fn handle_turn(&self, turn: Turn) {
        let turn_id = TurnId::new();
        let span = tracing::info_span!(
            "turn",
            user = %turn.user,
            turn = %turn_id,
            kind = turn.kind()
        );
        self.process(turn).instrument(span).await;
    }

    async fn process(&self, turn: Turn) {
        let handle = self.sessions.checkout(turn.user);
        let mut session = handle.lock().await;

        let mut ctx = TurnCtx {
            chat: turn.chat,
            source: match turn.event {
                TurnEvent::Callback { message, .. } => Some(message),
                _ => None,
            },
        };

        let limit = self.validator.limits().max_turns_per_minute;
        if !session.admit_turn(limit) {
            tracing::warn!(limit, "Rate limited turn");
            let screen = views::slow_down();
            match turn.event {
                TurnEvent::Callback {
                    ref callback_id, ..
                } => self.answer(callback_id, Some(screen.text.as_str())).await,
                _ => {
                    if let Err(e) = self.surface.send_message(ctx.chat, &screen).await {
                        tracing::warn!(error = %e, "Failed to send rate limit notice");
                    }
                }
            }
            return;
        }

        let intent = route(session.state(), session.awaiting_text(), &turn.event);
        tracing::debug!(state = ?session.state(), intent = %intent, "Routed turn");

        if let TurnEvent::Callback {
            ref callback_id, ..
        } = turn.event
        {
            let notice = matches!(intent, Intent::Expired).then(views::expired_notice);
            self.answer(callback_id, notice).await;
        }

        if let Err(e) = self.execute(&mut session, &mut ctx, intent).await {
            tracing::error!(error = %format!("{e:#}"), "Turn failed");
            if let Err(e) = self.render(&mut session, &mut ctx, &views::internal_error()).await {
                tracing::error!(error = %format!("{e:#}"), "Failed to report turn failure");
            }
        }
    }

    async fn answer(&self, callback_id: &str, notice: Option<&str>) {
        if let Err(e) = self.surface.answer_callback(callback_id, notice).await {
            tracing::warn!(error = %e, "Failed to acknowledge callback");
        }
    }

    async fn execute(
        &self,
        session: &mut Session,
        ctx: &mut TurnCtx,
        intent: Intent,
    ) -> anyhow::Result<()> {
        match intent {
            Intent::Command(command) => self.command(session, ctx, command).await,
            Intent::SubmitToken(text) => self.submit_token(session, ctx, &text).await,
            Intent::IgnoreText => {
                tracing::debug!(state = ?session.state(), "Ignoring text outside token entry");
                Ok(())
            }
            Intent::Expired => self.show_main(session, ctx, None).await,
            Intent::Action(action) => self.action(session, ctx, action).await,
        }
    }

    async fn command(
        &self,
        session: &mut Session,
        ctx: &mut TurnCtx,
        command: BotCommand,
    ) -> anyhow::Result<()> {
        match command {
            BotCommand::Start => self.start(session, ctx).await,
            BotCommand::Cancel => {
                session.go_main();
                self.show_main(session, ctx, Some("Cancelled.")).await
            }
            BotCommand::Menu => self.show_main(session, ctx, None).await,
            BotCommand::Stats => self.show_stats(session, ctx).await,
            BotCommand::Help | BotCommand::Unknown(_) => {
                self.render(session, ctx, &views::help()).await
            }
        }
    }

    async fn action(
        &self,
        session: &mut Session,
        ctx: &mut TurnCtx,
        action: CallbackAction,
    ) -> anyhow::Result<()> {
        use CallbackAction as A;

        match action {
            A::Main | A::Refresh | A::KeepToken | A::CancelDeleteAccount => {
                self.show_main(session, ctx, None).await
            }
            A::Restart => self.start(session, ctx).await,
            A::Stats => self.show_stats(session, ctx).await,

            A::ChooseProvider(name) => self.choose_provider(session, ctx, &name).await,
            A::ReplaceToken(name) => {
                let provider = self.provider_or_bare(&name).await;
                self.prompt_token(
                    session,
                    ctx,
                    &provider,
                    PendingTokenAction::Update,
                    ReturnTo::MainMenu,
                )
                .await
            }
            A::CancelTokenEntry => match session.finish_token_entry() {
                ReturnTo::TokenInventory => self.show_tokens(session, ctx, None).await,
                ReturnTo::MainMenu => self.onboarding(session, ctx).await,
            },

            A::OpenServer(id) => self.open_server(session, ctx, &id).await,
            A::CreateServer => self.create_server(session, ctx).await,
            A::CheckServer(id) => self.check_server(session, ctx, &id).await,
            A::VerifyVpn(id) => self.verify_vpn(session, ctx, &id).await,
            A::ServerMetrics(id) => self.server_metrics(session, ctx, &id).await,
            A::DeleteServer(id) => self.delete_server(session, ctx, &id).await,
            A::ExportSshKey(id) => self.export_ssh_key(session, ctx, &id).await,

            A::ManageTokens => self.show_tokens(session, ctx, None).await,
            A::AddToken(name) => {
                let provider = self.provider_or_bare(&name).await;
                self.prompt_token(
                    session,
                    ctx,
                    &provider,
                    PendingTokenAction::Add,
                    ReturnTo::TokenInventory,
                )
                .await
            }
            A::UpdateToken(name) => {
                let provider = self.provider_or_bare(&name).await;
                self.prompt_token(
                    session,
                    ctx,
                    &provider,
                    PendingTokenAction::Update,
                    ReturnTo::TokenInventory,
                )
                .await
            }
            A::RemoveToken(name) => self.remove_token(session, ctx, &name).await,

            A::DeleteAccount => {
                session.go_main();
                session.set_state(ConversationState::AccountDeleteConfirm);
                self.render(session, ctx, &views::account_delete_confirm()).await
            }
            A::ConfirmDeleteAccount => self.delete_account(session, ctx).await,
        }
    }

    // ------------------------------------------------------------------
    // Rendering
    // ------------------------------------------------------------------

    /// Edit the anchor in place when the turn came from it, otherwise send
    async fn render(
        &self,
        session: &mut Session,
        ctx: &mut TurnCtx,
        screen: &Screen,
    ) -> anyhow::Result<()> {
        if let (Some(source), Some(anchor)) = (ctx.source, session.anchor()) {
            if source == anchor {
                match self.surface.edit_message(anchor, screen).await {
                    Ok(()) | Err(SurfaceError::NotModified) => return Ok(()),
                    Err(e) => {
                        tracing::warn!(error = %e, message = %anchor, "Edit failed, sending a new message");
                    }
                }
            }
        }

        let sent = self
            .surface
            .send_message(ctx.chat, screen)
            .await
            .context("sending message")?;
        session.set_anchor(sent);
        ctx.source = Some(sent);
        Ok(())
    }

    async fn render_unavailable(
        &self,
        session: &mut Session,
        ctx: &mut TurnCtx,
        error: &GatewayError,
    ) -> anyhow::Result<()> {
        let screen = views::service_unavailable(&error.user_message(), &CallbackAction::Restart);
        self.render(session, ctx, &screen).await
    }

    // ------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------

    fn resync(&self, session: &mut Session, id: BackendUserId) {
        let new_id = id.clone();
        if session.resync_backend_user(id) {
            tracing::info!(backend_user = %new_id, "Backend returned a different user id, resynced");
        }
    }

    /// Cached backend id, else lookup by transport id, else signup
    async fn ensure_identity(&self, session: &mut Session) -> Result<BackendUserId, GatewayError> {
        if let Some(id) = session.backend_user() {
            return Ok(id.clone());
        }

        let external = session.external_user();
        if let Some(record) = self.backend.find_user(UserLookup::ByTelegramId(external.0)).await {
            self.resync(session, record.user_id.clone());
            return Ok(record.user_id);
        }

        let id = self.backend.signup(external).await?;
        self.resync(session, id.clone());
        Ok(id)
    }

    // ------------------------------------------------------------------
    // Onboarding
    // ------------------------------------------------------------------

    async fn start(&self, session: &mut Session, ctx: &mut TurnCtx) -> anyhow::Result<()> {
        session.clear_pending();
        session.set_state(ConversationState::Start);

        let user = match self.backend.signup(session.external_user()).await {
            Ok(id) => {
                self.resync(session, id.clone());
                id
            }
            Err(e) => {
                tracing::warn!(error = %e, "Signup failed");
                return self.render_unavailable(session, ctx, &e).await;
            }
        };

        let lookup = self.backend.lookup_user(UserLookup::ById(user.clone())).await;
        let has_selections = match lookup {
            Ok(Some(record)) => {
                self.resync(session, record.user_id);
                !record.selections.is_empty()
            }
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(error = %e, "User lookup failed during start");
                return self.render_unavailable(session, ctx, &e).await;
            }
        };
        let user = session.backend_user().cloned().unwrap_or(user);

        let servers = match self.backend.servers(&user).await {
            Ok(servers) => servers,
            Err(e) => {
                tracing::warn!(error = %e, "Could not list servers during start");
                return self.render_unavailable(session, ctx, &e).await;
            }
        };

        if has_selections || !servers.is_empty() {
            session.go_main();
            return self
                .render(session, ctx, &views::server_list(&servers, None))
                .await;
        }

        self.onboarding(session, ctx).await
    }

    async fn onboarding(&self, session: &mut Session, ctx: &mut TurnCtx) -> anyhow::Result<()> {
        session.clear_pending();

        let providers = match self.backend.providers().await {
            Ok(providers) => providers,
            Err(e) => return self.render_unavailable(session, ctx, &e).await,
        };
        let active: Vec<Provider> = providers.into_iter().filter(|p| p.is_active).collect();

        if active.is_empty() {
            tracing::warn!("Backend has no active providers");
            session.go_main();
            return self.render(session, ctx, &views::no_providers()).await;
        }

        session.set_state(ConversationState::SelectProvider);
        self.render(session, ctx, &views::provider_list(&active)).await
    }

    async fn choose_provider(
        &self,
        session: &mut Session,
        ctx: &mut TurnCtx,
        name: &str,
    ) -> anyhow::Result<()> {
        let user = match self.ensure_identity(session).await {
            Ok(id) => id,
            Err(e) => return self.render_unavailable(session, ctx, &e).await,
        };

        let provider = match self.backend.providers().await {
            Ok(providers) => providers.into_iter().find(|p| p.name == name && p.is_active),
            Err(e) => return self.render_unavailable(session, ctx, &e).await,
        };
        let Some(provider) = provider else {
            let screen =
                views::failure("This provider is no longer available.", Some(&CallbackAction::Restart));
            return self.render(session, ctx, &screen).await;
        };

        let selections = match self.backend.selections(&user).await {
            Ok(selections) => selections,
            Err(e) => {
                let retry = CallbackAction::ChooseProvider(name.to_string());
                return self
                    .render(session, ctx, &views::failure(&e.user_message(), Some(&retry)))
                    .await;
            }
        };

        if selections.iter().any(|s| s.provider_name() == provider.name) {
            session.offer_replace(provider.name.clone());
            return self.render(session, ctx, &views::replace_or_keep(&provider)).await;
        }

        self.prompt_token(session, ctx, &provider, PendingTokenAction::Add, ReturnTo::MainMenu)
            .await
    }

    // ------------------------------------------------------------------
    // Tokens
    // ------------------------------------------------------------------

    /// Provider details for a prompt, or just the name if they cannot be fetched
    async fn provider_or_bare(&self, name: &str) -> Provider {
        let found = match self.backend.providers().await {
            Ok(providers) => providers.into_iter().find(|p| p.name == name),
            Err(e) => {
                tracing::debug!(error = %e, "Could not fetch provider details");
                None
            }
        };
        found.unwrap_or_else(|| bare_provider(name))
    }

    async fn prompt_token(
        &self,
        session: &mut Session,
        ctx: &mut TurnCtx,
        provider: &Provider,
        action: PendingTokenAction,
        return_to: ReturnTo,
    ) -> anyhow::Result<()> {
        session.begin_token_entry(provider.name.clone(), action, return_to);
        self.render(session, ctx, &views::token_prompt(provider, action, None))
            .await
    }

    async fn submit_token(
        &self,
        session: &mut Session,
        ctx: &mut TurnCtx,
        raw: &str,
    ) -> anyhow::Result<()> {
        let nav = session.navigation().clone();
        let (Some(provider_name), Some(action)) = (nav.selected_provider, nav.pending_token_action)
        else {
            session.go_main();
            return self.show_main(session, ctx, None).await;
        };
        let provider = bare_provider(&provider_name);

        let validation = self.validator.validate_token(raw);
        if let Some(reason) = validation.error_message() {
            if validation != ValidationResult::Empty {
                tracing::warn!(reason, "Rejected token input");
            }
            let screen = views::token_prompt(&provider, action, Some(reason));
            return self.render(session, ctx, &screen).await;
        }
        let token = raw.trim();

        let user = match self.ensure_identity(session).await {
            Ok(id) => id,
            Err(e) => return self.render_unavailable(session, ctx, &e).await,
        };

        self.render(session, ctx, &views::progress("Saving your token…"))
            .await?;

        let result = match action {
            PendingTokenAction::Add => {
                self.backend.save_token(&user, &provider_name, token).await
            }
            PendingTokenAction::Update => {
                match self.backend.remove_token(&user, &provider_name).await {
                    Ok(()) => self.backend.save_token(&user, &provider_name, token).await,
                    Err(e) => Err(e),
                }
            }
        };

        if let Err(e) = result {
            tracing::warn!(provider = %provider_name, error = %e, "Token was not saved");
            let provider = self.provider_or_bare(&provider_name).await;
            let screen = views::token_prompt(&provider, action, Some(&e.user_message()));
            return self.render(session, ctx, &screen).await;
        }

        tracing::info!(provider = %provider_name, "Token saved");
        let provider = self.provider_or_bare(&provider_name).await;
        let notice = format!("✅ {} token saved.", provider.display_title());
        match session.finish_token_entry() {
            ReturnTo::TokenInventory => self.show_tokens(session, ctx, Some(&notice)).await,
            ReturnTo::MainMenu => self.show_main(session, ctx, Some(&notice)).await,
        }
    }

    async fn show_tokens(
        &self,
        session: &mut Session,
        ctx: &mut TurnCtx,
        notice: Option<&str>,
    ) -> anyhow::Result<()> {
        let user = match self.ensure_identity(session).await {
            Ok(id) => id,
            Err(e) => return self.render_unavailable(session, ctx, &e).await,
        };

        let (providers, selections) =
            tokio::join!(self.backend.providers(), self.backend.selections(&user));
        let (providers, selections) = match (providers, selections) {
            (Ok(p), Ok(s)) => (p, s),
            (Err(e), _) | (_, Err(e)) => {
                let screen = views::failure(&e.user_message(), Some(&CallbackAction::ManageTokens));
                return self.render(session, ctx, &screen).await;
            }
        };

        session.go_main();
        self.render(session, ctx, &views::token_inventory(&providers, &selections, notice))
            .await
    }

    async fn remove_token(
        &self,
        session: &mut Session,
        ctx: &mut TurnCtx,
        name: &str,
    ) -> anyhow::Result<()> {
        let user = match self.ensure_identity(session).await {
            Ok(id) => id,
            Err(e) => return self.render_unavailable(session, ctx, &e).await,
        };

        let notice = match self.backend.remove_token(&user, name).await {
            Ok(()) => {
                tracing::info!(provider = name, "Token removed");
                format!("Removed the {} token.", bare_provider(name).display_title())
            }
            Err(e) => format!("⚠️ Could not remove the token: {}", e.user_message()),
        };
        self.show_tokens(session, ctx, Some(&notice)).await
    }

    // ------------------------------------------------------------------
    // Main menu and servers
    // ------------------------------------------------------------------

    async fn show_main(
        &self,
        session: &mut Session,
        ctx: &mut TurnCtx,
        notice: Option<&str>,
    ) -> anyhow::Result<()> {
        let user = match self.ensure_identity(session).await {
            Ok(id) => id,
            Err(e) => return self.render_unavailable(session, ctx, &e).await,
        };

        session.go_main();
        match self.backend.servers(&user).await {
            Ok(servers) => {
                self.render(session, ctx, &views::server_list(&servers, notice))
                    .await
            }
            Err(e) => {
                let screen = views::failure(&e.user_message(), Some(&CallbackAction::Refresh));
                self.render(session, ctx, &screen).await
            }
        }
    }

    async fn show_stats(&self, session: &mut Session, ctx: &mut TurnCtx) -> anyhow::Result<()> {
        let stats = self.backend.aggregate_stats().await;
        session.go_main();
        self.render(session, ctx, &views::stats(stats.as_ref())).await
    }

    async fn open_server(
        &self,
        session: &mut Session,
        ctx: &mut TurnCtx,
        id: &str,
    ) -> anyhow::Result<()> {
        let user = match self.ensure_identity(session).await {
            Ok(id) => id,
            Err(e) => return self.render_unavailable(session, ctx, &e).await,
        };

        match self.backend.server(&user, id).await {
            Ok(server) => {
                session.select_server(id);
                self.render(session, ctx, &views::server_detail(&server, None))
                    .await
            }
            Err(e) => {
                let retry = CallbackAction::OpenServer(id.to_string());
                self.render(session, ctx, &views::failure(&e.user_message(), Some(&retry)))
                    .await
            }
        }
    }

    async fn create_server(&self, session: &mut Session, ctx: &mut TurnCtx) -> anyhow::Result<()> {
        let user = match self.ensure_identity(session).await {
            Ok(id) => id,
            Err(e) => return self.render_unavailable(session, ctx, &e).await,
        };

        self.render(
            session,
            ctx,
            &views::progress("Creating your server… this can take a minute."),
        )
        .await?;

        let notice = match self.backend.create_server(&user).await {
            Ok(()) => {
                tracing::info!("Server creation started");
                "✅ Server creation started. It will show up as ready once provisioning finishes."
                    .to_string()
            }
            Err(e) => {
                tracing::warn!(error = %e, "Server creation failed");
                format!("⚠️ Could not create a server: {}", e.user_message())
            }
        };
        self.show_main(session, ctx, Some(&notice)).await
    }

    /// Re-render the detail view of `id` with a result section
    async fn server_section(
        &self,
        session: &mut Session,
        ctx: &mut TurnCtx,
        user: &BackendUserId,
        id: &str,
        section: &str,
    ) -> anyhow::Result<()> {
        let server = self.server_or_placeholder(user, id).await;
        session.select_server(id);
        self.render(session, ctx, &views::server_detail(&server, Some(section)))
            .await
    }

    async fn server_or_placeholder(&self, user: &BackendUserId, id: &str) -> Server {
        match self.backend.server(user, id).await {
            Ok(server) => server,
            Err(e) => {
                tracing::debug!(error = %e, "Could not refresh server details");
                Server {
                    id: id.to_string(),
                    ..Default::default()
                }
            }
        }
    }

    async fn check_server(
        &self,
        session: &mut Session,
        ctx: &mut TurnCtx,
        id: &str,
    ) -> anyhow::Result<()> {
        let user = match self.ensure_identity(session).await {
            Ok(id) => id,
            Err(e) => return self.render_unavailable(session, ctx, &e).await,
        };

        self.render(session, ctx, &views::progress("Checking reachability…"))
            .await?;
        let section = match self.backend.check_server(&user, id).await {
            Ok(report) => views::health_section(&report),
            Err(e) => format!("⚠️ Reachability check failed: {}", e.user_message()),
        };
        self.server_section(session, ctx, &user, id, &section).await
    }

    async fn verify_vpn(
        &self,
        session: &mut Session,
        ctx: &mut TurnCtx,
        id: &str,
    ) -> anyhow::Result<()> {
        let user = match self.ensure_identity(session).await {
            Ok(id) => id,
            Err(e) => return self.render_unavailable(session, ctx, &e).await,
        };

        self.render(session, ctx, &views::progress("Verifying the VPN…"))
            .await?;
        let section = match self.backend.verify_vpn(&user, id).await {
            Ok(verification) => views::vpn_verify_section(&verification),
            Err(e) => format!("⚠️ VPN verification failed: {}", e.user_message()),
        };
        self.server_section(session, ctx, &user, id, &section).await
    }

    async fn server_metrics(
        &self,
        session: &mut Session,
        ctx: &mut TurnCtx,
        id: &str,
    ) -> anyhow::Result<()> {
        let user = match self.ensure_identity(session).await {
            Ok(id) => id,
            Err(e) => return self.render_unavailable(session, ctx, &e).await,
        };

        let section = match self.backend.server_metrics(&user, id).await {
            Ok(text) => views::metrics_section(&MetricsSummary::from_text(&text)),
            Err(e) => format!("⚠️ Metrics unavailable: {}", e.user_message()),
        };
        self.server_section(session, ctx, &user, id, &section).await
    }

    async fn delete_server(
        &self,
        session: &mut Session,
        ctx: &mut TurnCtx,
        id: &str,
    ) -> anyhow::Result<()> {
        let user = match self.ensure_identity(session).await {
            Ok(id) => id,
            Err(e) => return self.render_unavailable(session, ctx, &e).await,
        };

        self.render(session, ctx, &views::progress("Deleting the server…"))
            .await?;
        let notice = match self.backend.delete_server(&user, id).await {
            Ok(()) => {
                tracing::info!(server = id, "Server deleted");
                "🗑 Server deleted.".to_string()
            }
            Err(e) => {
                tracing::warn!(server = id, error = %e, "Server deletion failed");
                format!("⚠️ Could not delete the server: {}", e.user_message())
            }
        };
        self.show_main(session, ctx, Some(&notice)).await
    }

    async fn export_ssh_key(
        &self,
        session: &mut Session,
        ctx: &mut TurnCtx,
        id: &str,
    ) -> anyhow::Result<()> {
        let user = match self.ensure_identity(session).await {
            Ok(id) => id,
            Err(e) => return self.render_unavailable(session, ctx, &e).await,
        };

        let key = match self.backend.ssh_key(&user, id).await {
            Ok(key) => key,
            Err(e) => {
                let section = format!("⚠️ Could not export the SSH key: {}", e.user_message());
                return self.server_section(session, ctx, &user, id, &section).await;
            }
        };

        let server = self.server_or_placeholder(&user, id).await;
        let filename = key_filename(&server.display_label());
        let caption = format!("SSH private key for {}", server.display_label());
        match self
            .surface
            .send_document(ctx.chat, &filename, key.into_bytes(), Some(&caption))
            .await
        {
            Ok(()) => {
                tracing::info!(server = id, "SSH key exported");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(server = id, error = %e, "SSH key delivery failed");
                let section = "⚠️ Could not deliver the key file. Please try again.";
                self.server_section(session, ctx, &user, id, section).await
            }
        }
    }

    // ------------------------------------------------------------------
    // Account
    // ------------------------------------------------------------------

    async fn delete_account(&self, session: &mut Session, ctx: &mut TurnCtx) -> anyhow::Result<()> {
        let external = session.external_user();
        let user = match session.backend_user() {
            Some(id) => Some(id.clone()),
            None => match self
                .backend
                .lookup_user(UserLookup::ByTelegramId(external.0))
                .await
            {
                Ok(record) => record.map(|r| r.user_id),
                Err(e) => {
                    tracing::warn!(error = %e, "Could not resolve account before deletion");
                    session.go_main();
                    let message = format!("Could not delete your account: {}", e.user_message());
                    return self
                        .render(session, ctx, &views::failure(&message, None))
                        .await;
                }
            },
        };

        if let Some(user) = user {
            self.render(session, ctx, &views::progress("Deleting your account…"))
                .await?;
            if let Err(e) = self.backend.delete_account(&user).await {
                tracing::warn!(error = %e, "Account deletion failed");
                session.go_main();
                let notice = format!("⚠️ Could not delete your account: {}", e.user_message());
                return self.show_main(session, ctx, Some(&notice)).await;
            }
        }

        self.sessions.remove(external);
        tracing::info!("Account deleted, session cleared");
        self.render(session, ctx, &views::account_deleted()).await
    }
}

fn bare_provider(name: &str) -> Provider {
    Provider {
        name: name.to_string(),
        is_active: true,
        title: None,
        docs_url: None,
    }
}

/// Attachment name for an exported key: `server-<label>.pem`
fn key_filename(label: &str) -> String {
    let safe: String = label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let safe = if safe.is_empty() { "key".to_string() } else { safe };
    format!("server-{safe}.pem")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::MessageId;
    use pretty_assertions::assert_eq;

    fn callback(data: &str) -> TurnEvent {
        TurnEvent::Callback {
            callback_id: "cb".to_string(),
            message: MessageRef::new(ChatId(1), MessageId(1)),
            data: data.to_string(),
        }
    }

    #[test]
    fn test_text_only_submits_while_awaiting() {
        let text = TurnEvent::Text("tok".to_string());
        assert_eq!(
            route(ConversationState::EnterToken, true, &text),
            Intent::SubmitToken("tok".to_string())
        );
        assert_eq!(route(ConversationState::EnterToken, false, &text), Intent::IgnoreText);
        assert_eq!(route(ConversationState::MainMenu, true, &text), Intent::IgnoreText);
    }

    #[test]
    fn test_commands_route_in_any_state() {
        let event = TurnEvent::Command(BotCommand::Cancel);
        for state in [
            ConversationState::Start,
            ConversationState::EnterToken,
            ConversationState::ServerDetails,
        ] {
            assert_eq!(route(state, true, &event), Intent::Command(BotCommand::Cancel));
        }
    }

    #[test]
    fn test_server_actions_need_details_state() {
        let event = callback("srv_delete:abc");
        assert_eq!(
            route(ConversationState::ServerDetails, false, &event),
            Intent::Action(CallbackAction::DeleteServer("abc".to_string()))
        );
        assert_eq!(route(ConversationState::MainMenu, false, &event), Intent::Expired);
    }

    #[test]
    fn test_account_confirmation_needs_confirm_state() {
        let event = callback("acct_delete_yes");
        assert_eq!(route(ConversationState::MainMenu, false, &event), Intent::Expired);
        assert_eq!(
            route(ConversationState::AccountDeleteConfirm, false, &event),
            Intent::Action(CallbackAction::ConfirmDeleteAccount)
        );
    }

    #[test]
    fn test_unknown_callback_expires() {
        assert_eq!(route(ConversationState::MainMenu, false, &callback("bogus")), Intent::Expired);
        assert_eq!(route(ConversationState::MainMenu, false, &callback("srv:")), Intent::Expired);
    }

    #[test]
    fn test_global_actions_allowed_everywhere() {
        let event = callback("main");
        assert_eq!(
            route(ConversationState::EnterToken, true, &event),
            Intent::Action(CallbackAction::Main)
        );
        assert_eq!(
            route(ConversationState::Start, false, &callback("tokens")),
            Intent::Action(CallbackAction::ManageTokens)
        );
    }

    #[test]
    fn test_intent_debug_hides_token() {
        let intent = Intent::SubmitToken("secret-token".to_string());
        assert!(!format!("{intent:?}").contains("secret"));
        assert!(!intent.to_string().contains("secret"));
    }

    #[test]
    fn test_key_filename() {
        assert_eq!(key_filename("nl-1"), "server-nl-1.pem");
        assert_eq!(key_filename("my server/1"), "server-my_server_1.pem");
        assert_eq!(key_filename(""), "server-key.pem");
    }
}
