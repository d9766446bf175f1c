//! Status and Metrics Normalizer
//!
//! Pure functions turning raw backend fields into vendor-neutral summaries:
//! lifecycle status buckets, VPN readiness, metrics exposition parsing and
//! unit formatting. Nothing in this module performs I/O.

use std::collections::BTreeMap;

use crate::backend::Server;

/// Lifecycle statuses treated as ready
pub const READY_STATUSES: &[&str] = &["active", "running", "ready", "online"];

/// Lifecycle statuses treated as a problem
pub const ISSUE_STATUSES: &[&str] = &["error", "failed", "deleted", "stopped", "offline"];

/// Lifecycle statuses treated as still being set up
pub const SETUP_STATUSES: &[&str] = &[
    "creating",
    "provisioning",
    "booting",
    "pending",
    "starting",
    "initializing",
];

/// VPN install statuses meaning the relay is usable
const VPN_READY_STATUSES: &[&str] = &["installed", "ready", "verified", "success", "completed", "done"];

/// VPN install statuses meaning installation is in progress
const VPN_LOADING_STATUSES: &[&str] = &[
    "installing",
    "pending",
    "queued",
    "in_progress",
    "running",
    "started",
];

/// VPN install statuses meaning installation failed
const VPN_ERROR_STATUSES: &[&str] = &["failed", "error", "timeout"];

/// Service status bucket
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceBucket {
    /// Server is up
    Ready,
    /// Server is in a failed or removed state
    Issue,
    /// Server is still being provisioned
    SettingUp,
    /// Status not recognised
    Unknown,
}

/// Normalized lifecycle status
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceStatus {
    /// Bucket the raw status fell into
    pub bucket: ServiceBucket,
    /// Icon for display
    pub icon: &'static str,
    /// Label for display
    pub label: String,
}

/// Bucket an arbitrary lifecycle status string
#[must_use]
pub fn service_status(raw: &str) -> ServiceStatus {
    let normalized = raw.trim().to_lowercase();
    let bucket = if READY_STATUSES.contains(&normalized.as_str()) {
        ServiceBucket::Ready
    } else if ISSUE_STATUSES.contains(&normalized.as_str()) {
        ServiceBucket::Issue
    } else if SETUP_STATUSES.contains(&normalized.as_str()) {
        ServiceBucket::SettingUp
    } else {
        ServiceBucket::Unknown
    };

    let (icon, label) = match bucket {
        ServiceBucket::Ready => ("🟢", "Ready".to_string()),
        ServiceBucket::Issue => ("🔴", "Issue".to_string()),
        ServiceBucket::SettingUp => ("🟡", "Setting up".to_string()),
        ServiceBucket::Unknown if raw.trim().is_empty() => ("⚪", "unknown".to_string()),
        ServiceBucket::Unknown => ("⚪", raw.trim().to_string()),
    };

    ServiceStatus {
        bucket,
        icon,
        label,
    }
}

/// VPN readiness bucket
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VpnBucket {
    /// Relay verified or installed
    Ready,
    /// Relay still installing (also the default)
    Loading,
    /// Relay installation failed
    Error,
}

/// Normalized VPN readiness
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VpnReadiness {
    /// Bucket
    pub bucket: VpnBucket,
    /// Icon for display
    pub icon: &'static str,
    /// Label for display
    pub label: &'static str,
}

/// Classify the VPN side of a server
///
/// Precedence is Ready > Loading > Error, defaulting to Loading. A server
/// with no VPN signal that is still being provisioned shows Loading.
#[must_use]
pub fn vpn_readiness(server: &Server) -> VpnReadiness {
    let status = server
        .vpn_install_status
        .as_deref()
        .unwrap_or("")
        .trim()
        .to_lowercase();
    let message = server
        .vpn_install_message
        .as_deref()
        .unwrap_or("")
        .to_lowercase();
    let service = service_status(server.status_str()).bucket;

    let bucket = if message.contains("verified") || VPN_READY_STATUSES.contains(&status.as_str()) {
        VpnBucket::Ready
    } else if VPN_LOADING_STATUSES.contains(&status.as_str())
        || service == ServiceBucket::SettingUp
    {
        VpnBucket::Loading
    } else if VPN_ERROR_STATUSES.contains(&status.as_str()) || service == ServiceBucket::Issue {
        VpnBucket::Error
    } else {
        VpnBucket::Loading
    };

    match bucket {
        VpnBucket::Ready => VpnReadiness {
            bucket,
            icon: "✅",
            label: "VPN ready",
        },
        VpnBucket::Loading => VpnReadiness {
            bucket,
            icon: "⏳",
            label: "VPN setting up",
        },
        VpnBucket::Error => VpnReadiness {
            bucket,
            icon: "⚠️",
            label: "VPN error",
        },
    }
}

/// Parse metrics exposition text into name/value pairs
///
/// Blank lines and `#` comments are skipped. The metric name is the first
/// whitespace-delimited token with any `{...}` label set stripped; the value
/// is the last token. Lines whose value is not a finite number are dropped.
/// When a name repeats, the last value wins.
#[must_use]
pub fn parse_metrics_text(raw: &str) -> BTreeMap<String, f64> {
    let mut metrics = BTreeMap::new();

    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut tokens = line.split_whitespace();
        let Some(first) = tokens.next() else {
            continue;
        };
        let Some(last) = tokens.last() else {
            continue;
        };

        let name = match first.find('{') {
            Some(idx) => &first[..idx],
            None => first,
        };
        if name.is_empty() {
            continue;
        }

        match last.parse::<f64>() {
            Ok(value) if value.is_finite() => {
                metrics.insert(name.to_string(), value);
            }
            _ => {}
        }
    }

    metrics
}

const BYTE_UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];

/// Format a byte count with binary units
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{bytes} B");
    }

    #[allow(clippy::cast_precision_loss)]
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < BYTE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", BYTE_UNITS[unit])
}

/// Format a duration in seconds as `1d 2h 3m 4s`, dropping leading zeros
#[must_use]
pub fn format_duration(total_secs: u64) -> String {
    let days = total_secs / 86_400;
    let hours = (total_secs % 86_400) / 3_600;
    let minutes = (total_secs % 3_600) / 60;
    let seconds = total_secs % 60;

    let mut parts = Vec::with_capacity(4);
    if days > 0 {
        parts.push(format!("{days}d"));
    }
    if days > 0 || hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if days > 0 || hours > 0 || minutes > 0 {
        parts.push(format!("{minutes}m"));
    }
    parts.push(format!("{seconds}s"));
    parts.join(" ")
}

const CLIENT_METRICS: &[&str] = &[
    "vpn_connected_clients",
    "xray_connected_clients",
    "connected_clients",
];
const RX_METRICS: &[&str] = &[
    "vpn_bytes_received_total",
    "bytes_received_total",
    "node_network_receive_bytes_total",
];
const TX_METRICS: &[&str] = &[
    "vpn_bytes_sent_total",
    "bytes_sent_total",
    "node_network_transmit_bytes_total",
];
const UPTIME_METRICS: &[&str] = &[
    "vpn_uptime_seconds",
    "uptime_seconds",
    "process_uptime_seconds",
];

/// Raw metrics listed when none of the known figures are present
pub const MAX_RAW_METRICS: usize = 10;

/// Human-oriented summary of a server's metrics
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetricsSummary {
    /// Connected VPN clients
    pub connected_clients: Option<u64>,
    /// Bytes received by the relay
    pub bytes_received: Option<u64>,
    /// Bytes sent by the relay
    pub bytes_sent: Option<u64>,
    /// Relay uptime in seconds
    pub uptime_secs: Option<u64>,
    /// Fallback listing when no known figure matched
    pub raw: Vec<(String, f64)>,
}

impl MetricsSummary {
    /// Build a summary from parsed metrics
    #[must_use]
    pub fn from_metrics(metrics: &BTreeMap<String, f64>) -> Self {
        let pick = |aliases: &[&str]| -> Option<u64> {
            aliases
                .iter()
                .find_map(|name| metrics.get(*name))
                .map(|v| as_count(*v))
        };

        let mut summary = Self {
            connected_clients: pick(CLIENT_METRICS),
            bytes_received: pick(RX_METRICS),
            bytes_sent: pick(TX_METRICS),
            uptime_secs: pick(UPTIME_METRICS),
            raw: Vec::new(),
        };

        if !summary.has_known_figures() {
            summary.raw = metrics
                .iter()
                .take(MAX_RAW_METRICS)
                .map(|(k, v)| (k.clone(), *v))
                .collect();
        }
        summary
    }

    /// Parse exposition text straight into a summary
    #[must_use]
    pub fn from_text(raw: &str) -> Self {
        Self::from_metrics(&parse_metrics_text(raw))
    }

    /// Whether any known figure was found
    #[must_use]
    pub fn has_known_figures(&self) -> bool {
        self.connected_clients.is_some()
            || self.bytes_received.is_some()
            || self.bytes_sent.is_some()
            || self.uptime_secs.is_some()
    }

    /// Whether there is nothing at all to show
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.has_known_figures() && self.raw.is_empty()
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn as_count(value: f64) -> u64 {
    if value <= 0.0 {
        0
    } else {
        value.round() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn server(status: &str, vpn_status: Option<&str>, vpn_message: Option<&str>) -> Server {
        Server {
            id: "srv-1".to_string(),
            status: Some(status.to_string()),
            vpn_install_status: vpn_status.map(String::from),
            vpn_install_message: vpn_message.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn test_service_status_buckets() {
        for s in ["active", "running", "RUNNING", " Active "] {
            assert_eq!(service_status(s).bucket, ServiceBucket::Ready, "{s}");
        }
        for s in ["error", "failed", "deleted"] {
            assert_eq!(service_status(s).bucket, ServiceBucket::Issue, "{s}");
        }
        for s in ["creating", "provisioning", "booting", "pending", "starting"] {
            assert_eq!(service_status(s).bucket, ServiceBucket::SettingUp, "{s}");
        }
    }

    #[test]
    fn test_service_status_unknown_echoes_raw() {
        let status = service_status("Rebuilding");
        assert_eq!(status.bucket, ServiceBucket::Unknown);
        assert_eq!(status.label, "Rebuilding");

        assert_eq!(service_status("").label, "unknown");
    }

    #[test]
    fn test_vpn_verified_message_wins() {
        let s = server("error", Some("failed"), Some("Connection VERIFIED ok"));
        assert_eq!(vpn_readiness(&s).bucket, VpnBucket::Ready);
    }

    #[test]
    fn test_vpn_setup_service_shows_loading() {
        let s = server("provisioning", None, None);
        assert_eq!(vpn_readiness(&s).bucket, VpnBucket::Loading);
    }

    #[test]
    fn test_vpn_loading_beats_error() {
        let s = server("booting", Some("failed"), None);
        assert_eq!(vpn_readiness(&s).bucket, VpnBucket::Loading);
    }

    #[test]
    fn test_vpn_error_and_default() {
        assert_eq!(
            vpn_readiness(&server("running", Some("failed"), None)).bucket,
            VpnBucket::Error
        );
        assert_eq!(
            vpn_readiness(&server("deleted", None, None)).bucket,
            VpnBucket::Error
        );
        assert_eq!(
            vpn_readiness(&server("running", None, None)).bucket,
            VpnBucket::Loading
        );
        assert_eq!(
            vpn_readiness(&server("running", Some("installed"), None)).bucket,
            VpnBucket::Ready
        );
    }

    #[test]
    fn test_parse_metrics_text() {
        let raw = "\
# HELP vpn_connected_clients Connected clients
# TYPE vpn_connected_clients gauge
vpn_connected_clients 3

vpn_bytes_received_total{iface=\"eth0\"} 1.5e3
label_with_space{path=\"a b\"} 7
broken_metric NaN
not_a_number abc
lonely
";
        let metrics = parse_metrics_text(raw);
        assert_eq!(metrics.get("vpn_connected_clients"), Some(&3.0));
        assert_eq!(metrics.get("vpn_bytes_received_total"), Some(&1500.0));
        assert_eq!(metrics.get("label_with_space"), Some(&7.0));
        assert!(!metrics.contains_key("broken_metric"));
        assert!(!metrics.contains_key("not_a_number"));
        assert!(!metrics.contains_key("lonely"));
        assert_eq!(metrics.len(), 3);
    }

    #[test]
    fn test_parse_metrics_is_stable() {
        let raw = "a 1\nb{x=\"y\"} 2\n# c 3\n";
        assert_eq!(parse_metrics_text(raw), parse_metrics_text(raw));
        assert!(parse_metrics_text("").is_empty());
    }

    #[test]
    fn test_parse_metrics_last_duplicate_wins() {
        let raw = "rx{if=\"a\"} 1\nrx{if=\"b\"} 2\n";
        assert_eq!(parse_metrics_text(raw).get("rx"), Some(&2.0));
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.00 GB");
        assert_eq!(format_bytes(2048 * 1024 * 1024 * 1024 * 1024), "2048.00 TB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0s");
        assert_eq!(format_duration(65), "1m 5s");
        assert_eq!(format_duration(3600), "1h 0m 0s");
        assert_eq!(format_duration(90_061), "1d 1h 1m 1s");
    }

    #[test]
    fn test_metrics_summary_known_figures() {
        let summary = MetricsSummary::from_text(
            "connected_clients 4\nbytes_sent_total 2048\nuptime_seconds 65\n",
        );
        assert_eq!(summary.connected_clients, Some(4));
        assert_eq!(summary.bytes_sent, Some(2048));
        assert_eq!(summary.uptime_secs, Some(65));
        assert!(summary.raw.is_empty());
    }

    #[test]
    fn test_metrics_summary_falls_back_to_raw() {
        let text: String = (0..15).map(|i| format!("m{i:02} {i}\n")).collect();
        let summary = MetricsSummary::from_text(&text);
        assert!(!summary.has_known_figures());
        assert_eq!(summary.raw.len(), MAX_RAW_METRICS);
        assert!(MetricsSummary::from_text("").is_empty());
    }
}
