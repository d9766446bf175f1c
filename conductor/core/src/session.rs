//! Session Store
//!
//! Per-user conversation state, held in memory for the lifetime of the
//! process. A restart loses every session; the conductor rehydrates them
//! lazily by asking the backend for identity and existing selections.
//!
//! # Concurrency
//!
//! The store is a sharded map from external user to an individually locked
//! session. Turns for different users never contend on a shared lock; turns
//! for the same user are serialized on that user's mutex.
//!
//! Navigation fields are only mutated through `pub(crate)` methods, so the
//! conductor is the single place where transitions happen.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::messages::{BackendUserId, ExternalUserId, MessageRef};
use crate::security::RateWindow;

/// Logical screen the user is on
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConversationState {
    /// First contact or restart; transient
    #[default]
    Start,
    /// Onboarding provider choice, or replace/keep decision
    SelectProvider,
    /// Waiting for a token as the next text message
    EnterToken,
    /// Server list, token inventory, statistics
    MainMenu,
    /// Looking at one server
    ServerDetails,
    /// Asked to confirm account deletion
    AccountDeleteConfirm,
}

/// What a submitted token will do
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PendingTokenAction {
    /// First token for the provider
    Add,
    /// Replace an existing token
    Update,
}

/// Where to land after a token flow finishes or is cancelled
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReturnTo {
    /// The server list
    MainMenu,
    /// The token inventory
    TokenInventory,
}

/// Current screen plus the ephemeral selections that go with it
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationContext {
    /// Current logical screen
    pub state: ConversationState,
    /// Provider picked in the current token flow
    pub selected_provider: Option<String>,
    /// Server shown in the detail view
    pub selected_server: Option<String>,
    /// Add or update, while a token flow is active
    pub pending_token_action: Option<PendingTokenAction>,
    /// Landing screen once the token flow ends
    pub return_to: Option<ReturnTo>,
}

/// One user's conversation
#[derive(Clone, Debug)]
pub struct Session {
    external_user: ExternalUserId,
    backend_user: Option<BackendUserId>,
    navigation: NavigationContext,
    awaiting_text: bool,
    anchor: Option<MessageRef>,
    rate: RateWindow,
    created_at: Instant,
}

impl Session {
    /// Fresh session in the `Start` state
    #[must_use]
    pub fn new(external_user: ExternalUserId) -> Self {
        Self {
            external_user,
            backend_user: None,
            navigation: NavigationContext::default(),
            awaiting_text: false,
            anchor: None,
            rate: RateWindow::default(),
            created_at: Instant::now(),
        }
    }

    /// Chat transport identity
    #[must_use]
    pub fn external_user(&self) -> ExternalUserId {
        self.external_user
    }

    /// Cached backend identity
    #[must_use]
    pub fn backend_user(&self) -> Option<&BackendUserId> {
        self.backend_user.as_ref()
    }

    /// Navigation context
    #[must_use]
    pub fn navigation(&self) -> &NavigationContext {
        &self.navigation
    }

    /// Current logical screen
    #[must_use]
    pub fn state(&self) -> ConversationState {
        self.navigation.state
    }

    /// Whether the next text message is a token
    #[must_use]
    pub fn awaiting_text(&self) -> bool {
        self.awaiting_text
    }

    /// Message that is edited in place on callbacks
    #[must_use]
    pub fn anchor(&self) -> Option<MessageRef> {
        self.anchor
    }

    /// When the session was created
    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Store the backend's identity, preferring it over any cached value
    ///
    /// Returns `true` when a previously cached id was replaced.
    pub(crate) fn resync_backend_user(&mut self, id: BackendUserId) -> bool {
        match self.backend_user.replace(id) {
            Some(previous) => Some(&previous) != self.backend_user.as_ref(),
            None => false,
        }
    }

    pub(crate) fn set_state(&mut self, state: ConversationState) {
        self.navigation.state = state;
    }

    /// Enter `EnterToken` for a provider
    ///
    /// Any selection from an earlier attempt is overwritten.
    pub(crate) fn begin_token_entry(
        &mut self,
        provider: impl Into<String>,
        action: PendingTokenAction,
        return_to: ReturnTo,
    ) {
        self.navigation = NavigationContext {
            state: ConversationState::EnterToken,
            selected_provider: Some(provider.into()),
            selected_server: None,
            pending_token_action: Some(action),
            return_to: Some(return_to),
        };
        self.awaiting_text = true;
    }

    /// Leave the token flow and report where to land
    pub(crate) fn finish_token_entry(&mut self) -> ReturnTo {
        let return_to = self.navigation.return_to.take().unwrap_or(ReturnTo::MainMenu);
        self.clear_pending();
        return_to
    }

    /// Drop pending input and token selections
    pub(crate) fn clear_pending(&mut self) {
        self.awaiting_text = false;
        self.navigation.selected_provider = None;
        self.navigation.pending_token_action = None;
        self.navigation.return_to = None;
    }

    /// Stay on the provider screen with a narrowed replace/keep choice
    pub(crate) fn offer_replace(&mut self, provider: impl Into<String>) {
        self.clear_pending();
        self.navigation.state = ConversationState::SelectProvider;
        self.navigation.selected_provider = Some(provider.into());
    }

    pub(crate) fn select_server(&mut self, server_id: impl Into<String>) {
        self.clear_pending();
        self.navigation.state = ConversationState::ServerDetails;
        self.navigation.selected_server = Some(server_id.into());
    }

    /// Return to the main menu, dropping every ephemeral selection
    pub(crate) fn go_main(&mut self) {
        self.clear_pending();
        self.navigation.selected_server = None;
        self.navigation.state = ConversationState::MainMenu;
    }

    pub(crate) fn set_anchor(&mut self, anchor: MessageRef) {
        self.anchor = Some(anchor);
    }

    /// Count a turn and report whether it is within the per-minute limit
    pub(crate) fn admit_turn(&mut self, limit: u32) -> bool {
        self.rate.admit(Instant::now(), limit)
    }
}

/// In-memory sessions keyed by external user
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<ExternalUserId, Arc<Mutex<Session>>>,
}

impl SessionStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Session handle for a user, created on first contact
    ///
    /// The shard lock is released before the handle is returned, so callers
    /// may hold the session mutex across `.await` points.
    pub fn checkout(&self, user: ExternalUserId) -> Arc<Mutex<Session>> {
        self.sessions
            .entry(user)
            .or_insert_with(|| Arc::new(Mutex::new(Session::new(user))))
            .value()
            .clone()
    }

    /// Forget a user entirely
    pub fn remove(&self, user: ExternalUserId) -> bool {
        self.sessions.remove(&user).is_some()
    }

    /// Whether a session exists
    #[must_use]
    pub fn contains(&self, user: ExternalUserId) -> bool {
        self.sessions.contains_key(&user)
    }

    /// Number of sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Copy of a user's session, waiting for any in-flight turn
    pub async fn snapshot(&self, user: ExternalUserId) -> Option<Session> {
        let handle = self.sessions.get(&user).map(|s| s.value().clone())?;
        let session = handle.lock().await;
        Some(session.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const USER: ExternalUserId = ExternalUserId(42);

    #[test]
    fn test_new_session_defaults() {
        let session = Session::new(USER);
        assert_eq!(session.state(), ConversationState::Start);
        assert!(!session.awaiting_text());
        assert!(session.backend_user().is_none());
        assert!(session.anchor().is_none());
    }

    #[test]
    fn test_switching_provider_keeps_latest_only() {
        let mut session = Session::new(USER);
        session.begin_token_entry("hetzner", PendingTokenAction::Add, ReturnTo::MainMenu);
        session.begin_token_entry(
            "digitalocean",
            PendingTokenAction::Update,
            ReturnTo::TokenInventory,
        );

        let nav = session.navigation();
        assert_eq!(nav.state, ConversationState::EnterToken);
        assert_eq!(nav.selected_provider.as_deref(), Some("digitalocean"));
        assert_eq!(nav.pending_token_action, Some(PendingTokenAction::Update));
        assert_eq!(nav.return_to, Some(ReturnTo::TokenInventory));
        assert!(session.awaiting_text());
    }

    #[test]
    fn test_finish_token_entry_defaults_to_main() {
        let mut session = Session::new(USER);
        session.begin_token_entry("hetzner", PendingTokenAction::Add, ReturnTo::TokenInventory);
        assert_eq!(session.finish_token_entry(), ReturnTo::TokenInventory);
        assert!(!session.awaiting_text());
        assert!(session.navigation().pending_token_action.is_none());

        assert_eq!(session.finish_token_entry(), ReturnTo::MainMenu);
    }

    #[test]
    fn test_resync_prefers_backend_value() {
        let mut session = Session::new(USER);
        assert!(!session.resync_backend_user(BackendUserId::new("a")));
        assert!(!session.resync_backend_user(BackendUserId::new("a")));
        assert!(session.resync_backend_user(BackendUserId::new("b")));
        assert_eq!(session.backend_user().map(BackendUserId::as_str), Some("b"));
    }

    #[test]
    fn test_select_server_clears_token_flow() {
        let mut session = Session::new(USER);
        session.begin_token_entry("hetzner", PendingTokenAction::Add, ReturnTo::MainMenu);
        session.select_server("srv-1");
        assert_eq!(session.state(), ConversationState::ServerDetails);
        assert!(!session.awaiting_text());
        assert_eq!(session.navigation().selected_server.as_deref(), Some("srv-1"));

        session.go_main();
        assert_eq!(session.state(), ConversationState::MainMenu);
        assert!(session.navigation().selected_server.is_none());
    }

    #[tokio::test]
    async fn test_store_checkout_is_per_user() {
        let store = SessionStore::new();
        let a = store.checkout(ExternalUserId(1));
        let b = store.checkout(ExternalUserId(2));

        // Holding one user's lock must not block another user
        let _guard_a = a.lock().await;
        let guard_b = b.try_lock();
        assert!(guard_b.is_ok());
        drop(guard_b);

        assert_eq!(store.len(), 2);
        assert!(Arc::ptr_eq(&a, &store.checkout(ExternalUserId(1))));
    }

    #[tokio::test]
    async fn test_store_remove_starts_fresh() {
        let store = SessionStore::new();
        {
            let handle = store.checkout(USER);
            handle.lock().await.go_main();
        }
        assert!(store.remove(USER));
        assert!(!store.contains(USER));

        let handle = store.checkout(USER);
        assert_eq!(handle.lock().await.state(), ConversationState::Start);
        assert!(store.snapshot(ExternalUserId(7)).await.is_none());
    }
}
