//! View Builder
//!
//! Turns already-fetched domain data into a [`Screen`]: the text to show and
//! an ordered set of logical actions. Screens know nothing about transport
//! widgets; surfaces map [`Action`]s onto whatever buttons they support.
//!
//! Every screen that can follow a failure includes a way back to the main
//! menu.

use std::collections::HashSet;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::backend::{AggregateStats, HealthReport, Provider, Selection, Server, VpnVerification};
use crate::callback::CallbackAction;
use crate::normalize::{
    format_bytes, format_duration, service_status, vpn_readiness, MetricsSummary,
};
use crate::session::PendingTokenAction;

/// One interactive element of a screen
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    /// Button that comes back to the conductor as a callback
    Callback {
        /// Visible label
        label: String,
        /// Encoded callback token
        token: String,
    },
    /// Button that opens an external link
    Url {
        /// Visible label
        label: String,
        /// Target URL
        url: String,
    },
}

impl Action {
    /// Callback button for a logical action
    pub fn callback(label: impl Into<String>, action: &CallbackAction) -> Self {
        Self::Callback {
            label: label.into(),
            token: action.token(),
        }
    }

    /// Link button
    pub fn url(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self::Url {
            label: label.into(),
            url: url.into(),
        }
    }

    /// Visible label
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Callback { label, .. } | Self::Url { label, .. } => label,
        }
    }

    /// Callback token, if this is a callback button
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        match self {
            Self::Callback { token, .. } => Some(token),
            Self::Url { .. } => None,
        }
    }
}

/// Rendered screen: text plus rows of actions
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Screen {
    /// Message text
    pub text: String,
    /// Action rows, top to bottom
    pub rows: Vec<Vec<Action>>,
}

impl Screen {
    /// Screen with text only
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            rows: Vec::new(),
        }
    }

    /// Append a row of actions
    #[must_use]
    pub fn row(mut self, row: Vec<Action>) -> Self {
        if !row.is_empty() {
            self.rows.push(row);
        }
        self
    }

    /// Append a single-action row
    #[must_use]
    pub fn button(self, label: impl Into<String>, action: &CallbackAction) -> Self {
        self.row(vec![Action::callback(label, action)])
    }

    /// Iterate all actions in order
    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.rows.iter().flatten()
    }

    /// Whether any callback button carries the given logical action
    #[must_use]
    pub fn has_action(&self, action: &CallbackAction) -> bool {
        let token = action.token();
        self.actions().any(|a| a.token() == Some(token.as_str()))
    }

    /// Whether the screen offers a way back to the main menu
    #[must_use]
    pub fn has_main_action(&self) -> bool {
        self.has_action(&CallbackAction::Main)
    }

    /// Whether the screen has no actions at all
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.rows.is_empty()
    }
}

const MAIN_LABEL: &str = "🏠 Main menu";
const EXPIRED_NOTICE: &str = "This button has expired";

/// Notice shown on callbacks that no longer apply
#[must_use]
pub fn expired_notice() -> &'static str {
    EXPIRED_NOTICE
}

fn with_notice(notice: Option<&str>, body: String) -> String {
    match notice {
        Some(n) if !n.is_empty() => format!("{n}\n\n{body}"),
        _ => body,
    }
}

/// Onboarding provider list
#[must_use]
pub fn provider_list(providers: &[Provider]) -> Screen {
    let mut text = String::from("Welcome! Choose which provider you want to connect:\n");
    for p in providers {
        let _ = write!(text, "\n• {} – enter your {} API token", p.display_title(), p.display_title());
    }

    let buttons: Vec<Action> = providers
        .iter()
        .map(|p| {
            Action::callback(
                p.display_title(),
                &CallbackAction::ChooseProvider(p.name.clone()),
            )
        })
        .collect();

    let mut screen = Screen::text(text);
    for chunk in buttons.chunks(2) {
        screen = screen.row(chunk.to_vec());
    }
    screen.button(MAIN_LABEL, &CallbackAction::Main)
}

/// Shown when the backend has no active providers
#[must_use]
pub fn no_providers() -> Screen {
    Screen::text(
        "No cloud providers are available right now. \
         Please contact the operator of this bot.",
    )
    .button(MAIN_LABEL, &CallbackAction::Main)
}

/// Provider already has a token: replace it or keep it
#[must_use]
pub fn replace_or_keep(provider: &Provider) -> Screen {
    let title = provider.display_title();
    Screen::text(format!(
        "You already saved a {title} token.\n\nDo you want to replace it?"
    ))
    .row(vec![
        Action::callback(
            "🔄 Replace token",
            &CallbackAction::ReplaceToken(provider.name.clone()),
        ),
        Action::callback("✅ Keep current", &CallbackAction::KeepToken),
    ])
}

/// Ask the user to send a token as the next message
#[must_use]
pub fn token_prompt(provider: &Provider, action: PendingTokenAction, error: Option<&str>) -> Screen {
    let title = provider.display_title();
    let verb = match action {
        PendingTokenAction::Add => "selected",
        PendingTokenAction::Update => "are replacing the token for",
    };
    let mut text = format!(
        "You {verb} {title}.\n\nPlease send your API token in the next message."
    );
    if let Some(err) = error {
        text = format!("⚠️ {err}\n\n{text}");
    }

    let mut screen = Screen::text(text);
    if let Some(ref url) = provider.docs_url {
        screen = screen.row(vec![Action::url(format!("📖 How to get a {title} token"), url)]);
    }
    screen.row(vec![
        Action::callback("✖️ Cancel", &CallbackAction::CancelTokenEntry),
        Action::callback(MAIN_LABEL, &CallbackAction::Main),
    ])
}

/// Home view: the user's servers
#[must_use]
pub fn server_list(servers: &[Server], notice: Option<&str>) -> Screen {
    let body = if servers.is_empty() {
        "You have no servers yet. Tap “Create server” to provision one.".to_string()
    } else {
        let mut body = String::from("Your servers:");
        for s in servers {
            let vpn = vpn_readiness(s);
            let _ = write!(body, "\n{} {} – {}", vpn.icon, s.display_label(), vpn.label);
        }
        body
    };

    let mut screen = Screen::text(with_notice(notice, body));
    for s in servers {
        let vpn = vpn_readiness(s);
        screen = screen.button(
            format!("{} {}", vpn.icon, s.display_label()),
            &CallbackAction::OpenServer(s.id.clone()),
        );
    }

    screen
        .button("➕ Create server", &CallbackAction::CreateServer)
        .row(vec![
            Action::callback("🔑 Tokens", &CallbackAction::ManageTokens),
            Action::callback("📊 Stats", &CallbackAction::Stats),
        ])
        .row(vec![
            Action::callback("🗑 Delete account", &CallbackAction::DeleteAccount),
            Action::callback("🔄 Refresh", &CallbackAction::Main),
        ])
}

/// Detail view of one server, with an optional result section
#[must_use]
pub fn server_detail(server: &Server, section: Option<&str>) -> Screen {
    let status = service_status(server.status_str());
    let vpn = vpn_readiness(server);

    let mut text = format!("🖥 {}\n", server.display_label());
    let _ = write!(text, "\nStatus: {} {}", status.icon, status.label);
    let _ = write!(
        text,
        "\nIP: {}",
        server.ip_address.as_deref().unwrap_or("not assigned yet")
    );

    let raw_vpn = server.vpn_install_status.as_deref().unwrap_or("").trim();
    let mut vpn_line = format!("\nVPN: {} {}", vpn.icon, vpn.label);
    if let Some(message) = server.vpn_install_message.as_deref().map(str::trim) {
        if !message.is_empty() && !message.eq_ignore_ascii_case(raw_vpn) {
            let _ = write!(vpn_line, " ({message})");
        }
    }
    text.push_str(&vpn_line);

    if let Some(section) = section {
        let _ = write!(text, "\n\n{section}");
    }

    let id = server.id.clone();
    Screen::text(text)
        .row(vec![
            Action::callback("📡 Check reachability", &CallbackAction::CheckServer(id.clone())),
            Action::callback("🔐 Verify VPN", &CallbackAction::VerifyVpn(id.clone())),
        ])
        .row(vec![
            Action::callback("📈 Metrics", &CallbackAction::ServerMetrics(id.clone())),
            Action::callback("🔑 SSH key", &CallbackAction::ExportSshKey(id.clone())),
        ])
        .button("🗑 Delete server", &CallbackAction::DeleteServer(id))
        .button("⬅️ Back", &CallbackAction::Main)
}

/// Result section for a reachability check
#[must_use]
pub fn health_section(report: &HealthReport) -> String {
    let headline = match (report.iran_accessible, report.status.as_deref()) {
        (Some(true), _) => "✅ Reachable".to_string(),
        (Some(false), _) => "❌ Not reachable".to_string(),
        (None, Some(status)) => {
            let s = service_status(status);
            format!("{} {}", s.icon, s.label)
        }
        (None, None) => "⚪ No result".to_string(),
    };

    match report.message.as_deref().map(str::trim) {
        Some(m) if !m.is_empty() => format!("Reachability: {headline}\n{m}"),
        _ => format!("Reachability: {headline}"),
    }
}

/// Result section for a VPN verification
#[must_use]
pub fn vpn_verify_section(verification: &VpnVerification) -> String {
    let headline = if verification.ok {
        "✅ VPN verified"
    } else {
        "❌ VPN verification failed"
    };
    match verification.message.as_deref().map(str::trim) {
        Some(m) if !m.is_empty() => format!("{headline}\n{m}"),
        _ => headline.to_string(),
    }
}

/// Result section for metrics
#[must_use]
pub fn metrics_section(summary: &MetricsSummary) -> String {
    if summary.is_empty() {
        return "📈 No metrics reported yet.".to_string();
    }

    let mut text = String::from("📈 Metrics");
    if let Some(c) = summary.connected_clients {
        let _ = write!(text, "\nClients: {c}");
    }
    if let Some(rx) = summary.bytes_received {
        let _ = write!(text, "\nReceived: {}", format_bytes(rx));
    }
    if let Some(tx) = summary.bytes_sent {
        let _ = write!(text, "\nSent: {}", format_bytes(tx));
    }
    if let Some(up) = summary.uptime_secs {
        let _ = write!(text, "\nUptime: {}", format_duration(up));
    }
    for (name, value) in &summary.raw {
        let _ = write!(text, "\n{name}: {value}");
    }
    text
}

/// Token inventory: one row per active provider
#[must_use]
pub fn token_inventory(
    providers: &[Provider],
    selections: &[Selection],
    notice: Option<&str>,
) -> Screen {
    let saved: HashSet<&str> = selections.iter().map(Selection::provider_name).collect();
    let active: Vec<&Provider> = providers.iter().filter(|p| p.is_active).collect();

    let mut body = String::from("🔑 Provider tokens");
    if active.is_empty() {
        body.push_str("\n\nNo providers are available right now.");
    }
    for p in &active {
        let state = if saved.contains(p.name.as_str()) {
            "✅ saved"
        } else {
            "not set"
        };
        let _ = write!(body, "\n• {} – {state}", p.display_title());
    }

    let mut screen = Screen::text(with_notice(notice, body));
    for p in active {
        let title = p.display_title();
        let row = if saved.contains(p.name.as_str()) {
            vec![
                Action::callback(
                    format!("🔄 Update {title}"),
                    &CallbackAction::UpdateToken(p.name.clone()),
                ),
                Action::callback(
                    format!("🗑 Remove {title}"),
                    &CallbackAction::RemoveToken(p.name.clone()),
                ),
            ]
        } else {
            vec![Action::callback(
                format!("➕ Add {title}"),
                &CallbackAction::AddToken(p.name.clone()),
            )]
        };
        screen = screen.row(row);
    }
    screen.button(MAIN_LABEL, &CallbackAction::Main)
}

/// Confirmation before deleting the account
#[must_use]
pub fn account_delete_confirm() -> Screen {
    Screen::text(
        "⚠️ Delete your account?\n\n\
         All your servers will be destroyed and your saved tokens removed. \
         This cannot be undone.",
    )
    .row(vec![
        Action::callback("🗑 Yes, delete", &CallbackAction::ConfirmDeleteAccount),
        Action::callback("✖️ Cancel", &CallbackAction::CancelDeleteAccount),
    ])
}

/// Final message after the account is gone
#[must_use]
pub fn account_deleted() -> Screen {
    Screen::text("Your account has been deleted. Send /start to begin again.")
}

/// Service-wide statistics
#[must_use]
pub fn stats(stats: Option<&AggregateStats>) -> Screen {
    let text = match stats {
        Some(s) => {
            let fmt = |v: Option<u64>| v.map_or_else(|| "–".to_string(), |n| n.to_string());
            format!(
                "📊 Statistics\n\nUsers: {}\nServers: {}\nConnected clients: {}",
                fmt(s.total_users),
                fmt(s.total_servers),
                fmt(s.connected_clients)
            )
        }
        None => "Statistics are unavailable right now.".to_string(),
    };
    Screen::text(text).button(MAIN_LABEL, &CallbackAction::Main)
}

/// Backend could not be used at all; offer a retry
#[must_use]
pub fn service_unavailable(reason: &str, retry: &CallbackAction) -> Screen {
    Screen::text(format!(
        "⚠️ The service is unavailable right now ({reason}). Please try again."
    ))
    .row(vec![
        Action::callback("🔄 Try again", retry),
        Action::callback(MAIN_LABEL, &CallbackAction::Main),
    ])
}

/// A backend call failed inside a flow; offer a retry
#[must_use]
pub fn failure(message: &str, retry: Option<&CallbackAction>) -> Screen {
    let mut row = Vec::with_capacity(2);
    if let Some(retry) = retry {
        row.push(Action::callback("🔄 Try again", retry));
    }
    row.push(Action::callback(MAIN_LABEL, &CallbackAction::Main));
    Screen::text(format!("⚠️ {message}")).row(row)
}

/// Interim screen while a slow backend call runs
#[must_use]
pub fn progress(message: &str) -> Screen {
    Screen::text(format!("⏳ {message}"))
}

/// Generic failure produced at the turn boundary
#[must_use]
pub fn internal_error() -> Screen {
    Screen::text("⚠️ Something went wrong. Please try again.")
        .button(MAIN_LABEL, &CallbackAction::Main)
}

/// Shown when a user sends turns too quickly
#[must_use]
pub fn slow_down() -> Screen {
    Screen::text("You are sending requests too quickly. Please wait a moment.")
}

/// Command overview
#[must_use]
pub fn help() -> Screen {
    Screen::text(
        "Commands:\n\
         /start – set up or resume\n\
         /menu – show your servers\n\
         /stats – service statistics\n\
         /cancel – abort the current step",
    )
    .button(MAIN_LABEL, &CallbackAction::Main)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn provider(name: &str, active: bool) -> Provider {
        Provider {
            name: name.to_string(),
            is_active: active,
            title: None,
            docs_url: Some(format!("https://docs.example/{name}")),
        }
    }

    fn server(id: &str, status: &str) -> Server {
        Server {
            id: id.to_string(),
            label: Some(format!("label-{id}")),
            status: Some(status.to_string()),
            ..Default::default()
        }
    }

    fn selection(name: &str) -> Selection {
        Selection {
            provider: crate::backend::ProviderRef {
                name: name.to_string(),
            },
        }
    }

    #[test]
    fn test_empty_server_list_has_message_and_actions() {
        let screen = server_list(&[], None);
        assert!(screen.text.contains("no servers yet"));
        assert!(screen.has_action(&CallbackAction::CreateServer));
        assert!(screen.has_main_action());
    }

    #[test]
    fn test_server_list_rows() {
        let screen = server_list(&[server("a", "running"), server("b", "creating")], Some("hi"));
        assert!(screen.text.starts_with("hi\n\n"));
        assert!(screen.has_action(&CallbackAction::OpenServer("a".to_string())));
        assert!(screen.has_action(&CallbackAction::OpenServer("b".to_string())));

        // Server rows come first, create and main trail
        let tokens: Vec<&str> = screen.actions().filter_map(Action::token).collect();
        assert_eq!(tokens[0], "srv:a");
        assert_eq!(tokens[1], "srv:b");
        assert_eq!(tokens[2], "srv_create");
        assert_eq!(*tokens.last().unwrap(), "main");
    }

    #[test]
    fn test_server_detail_action_set() {
        let screen = server_detail(&server("x", "running"), None);
        let tokens: Vec<&str> = screen.actions().filter_map(Action::token).collect();
        assert_eq!(
            tokens,
            vec![
                "srv_check:x",
                "srv_vpn:x",
                "srv_metrics:x",
                "srv_key:x",
                "srv_delete:x",
                "main"
            ]
        );
        assert!(screen.text.contains("Status: 🟢 Ready"));
        assert!(screen.text.contains("not assigned yet"));
    }

    #[test]
    fn test_server_detail_vpn_message_not_duplicated() {
        let mut s = server("x", "running");
        s.vpn_install_status = Some("installing".to_string());
        s.vpn_install_message = Some("Installing".to_string());
        let screen = server_detail(&s, None);
        assert!(!screen.text.contains("(Installing)"));

        s.vpn_install_message = Some("step 2 of 5".to_string());
        let screen = server_detail(&s, Some("extra"));
        assert!(screen.text.contains("(step 2 of 5)"));
        assert!(screen.text.ends_with("extra"));
    }

    #[test]
    fn test_token_inventory() {
        let providers = vec![
            provider("hetzner", true),
            provider("digitalocean", true),
            provider("legacy", false),
        ];
        let screen = token_inventory(&providers, &[selection("hetzner")], None);

        assert!(screen.text.contains("Hetzner – ✅ saved"));
        assert!(screen.text.contains("Digitalocean – not set"));
        assert!(!screen.text.contains("Legacy"));
        assert!(screen.has_action(&CallbackAction::UpdateToken("hetzner".to_string())));
        assert!(screen.has_action(&CallbackAction::RemoveToken("hetzner".to_string())));
        assert!(!screen.has_action(&CallbackAction::AddToken("hetzner".to_string())));
        assert!(screen.has_action(&CallbackAction::AddToken("digitalocean".to_string())));
        assert!(screen.has_main_action());
    }

    #[test]
    fn test_token_prompt_with_docs_and_error() {
        let p = provider("hetzner", true);
        let screen = token_prompt(&p, PendingTokenAction::Add, Some("invalid token"));
        assert!(screen.text.starts_with("⚠️ invalid token"));
        assert!(screen
            .actions()
            .any(|a| matches!(a, Action::Url { url, .. } if url.ends_with("/hetzner"))));
        assert!(screen.has_action(&CallbackAction::CancelTokenEntry));
    }

    #[test]
    fn test_provider_list_pairs_buttons() {
        let providers = vec![
            provider("a", true),
            provider("b", true),
            provider("c", true),
        ];
        let screen = provider_list(&providers);
        assert_eq!(screen.rows[0].len(), 2);
        assert_eq!(screen.rows[1].len(), 1);
        assert!(screen.has_main_action());
    }

    #[test]
    fn test_failure_screens_lead_home() {
        assert!(failure("boom", None).has_main_action());
        assert!(failure("boom", Some(&CallbackAction::ManageTokens))
            .has_action(&CallbackAction::ManageTokens));
        assert!(service_unavailable("x", &CallbackAction::Restart).has_main_action());
        assert!(no_providers().has_main_action());
        assert!(stats(None).has_main_action());
        assert!(internal_error().has_main_action());
    }

    #[test]
    fn test_sections() {
        let report = HealthReport {
            status: None,
            iran_accessible: Some(false),
            message: Some("blocked".to_string()),
        };
        assert_eq!(health_section(&report), "Reachability: ❌ Not reachable\nblocked");

        let v = VpnVerification {
            ok: true,
            message: None,
        };
        assert_eq!(vpn_verify_section(&v), "✅ VPN verified");

        let summary = MetricsSummary::from_text("connected_clients 2\nuptime_seconds 65\n");
        let text = metrics_section(&summary);
        assert!(text.contains("Clients: 2"));
        assert!(text.contains("Uptime: 1m 5s"));
    }
}
