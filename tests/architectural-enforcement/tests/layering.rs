//! Integration Test: Layering Rules
//!
//! **Policy**: Screens and metric normalization are pure functions of their
//! inputs. The conductor core talks to chat transports only through the
//! `ChatSurface` trait; the Telegram adapter lives in the daemon.

use std::fs;

use architectural_enforcement::{
    assert_clean, find_in_production, rust_files, workspace_root, Violation,
};

/// Things a pure module must not reach for
const NETWORK_NEEDLES: &[&str] = &[
    "reqwest",
    "tokio::",
    "ApiGateway",
    "VpnBackend",
    "ChatSurface",
];

#[test]
fn test_views_and_normalizer_stay_pure() {
    let mut violations = Vec::new();
    for file in ["conductor/core/src/views.rs", "conductor/core/src/normalize.rs"] {
        violations.extend(find_in_production(
            &workspace_root().join(file),
            NETWORK_NEEDLES,
        ));
    }
    assert_clean("views and normalize must not perform I/O", &violations);
}

#[test]
fn test_core_has_no_transport_dependency() {
    let manifest = fs::read_to_string(workspace_root().join("conductor/core/Cargo.toml"))
        .expect("core manifest is readable");
    for forbidden in ["teloxide", "frankenstein", "telegram"] {
        assert!(
            !manifest.contains(forbidden),
            "conductor/core must not depend on {forbidden}"
        );
    }

    let violations: Vec<Violation> = rust_files("conductor/core/src")
        .iter()
        .flat_map(|f| find_in_production(f, &["api.telegram.org", "sendMessage", "getUpdates"]))
        .collect();
    assert_clean("conductor/core must not speak the Telegram API", &violations);
}

#[test]
fn test_no_unwrap_in_core_production_code() {
    let violations: Vec<Violation> = rust_files("conductor/core/src")
        .iter()
        .flat_map(|f| find_in_production(f, &[".unwrap()", ".expect("]))
        .collect();
    assert_clean(
        "conductor/core production code must propagate errors instead of panicking",
        &violations,
    );
}

#[test]
fn test_no_blocking_http_client() {
    let violations: Vec<Violation> = ["conductor/core/src", "conductor/daemon/src"]
        .iter()
        .flat_map(|dir| rust_files(dir))
        .flat_map(|f| find_in_production(&f, &["reqwest::blocking"]))
        .collect();
    assert_clean("HTTP calls must be async", &violations);
}
