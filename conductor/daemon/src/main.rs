//! Hope VPN Daemon - Telegram Front End
//!
//! Runs the Hope VPN conversation controller behind the Telegram Bot API.
//! Updates are fetched by long polling; the provisioning backend is reached
//! over HTTP.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (token from the environment)
//! TELEGRAM_BOT_TOKEN=123:abc hopevpn-daemon
//!
//! # Point at another backend
//! hopevpn-daemon --api-base-url https://api.example.com
//!
//! # With config file
//! hopevpn-daemon --config /etc/hopevpn/bot.toml
//!
//! # Probe the backend and exit
//! hopevpn-daemon check-api
//!
//! # Verbose logging
//! RUST_LOG=debug hopevpn-daemon
//! ```
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: stop polling, finish in-flight turns, exit

mod probe;
mod server;
mod telegram;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

use hopevpn_conductor::{
    default_config_path, load_config_from_path, ApiGateway, BotConfig, Conductor,
    ConfigOverrides, HttpVpnBackend,
};

use server::{BotServer, ServerConfig};
use telegram::TelegramSurface;

/// Hope VPN Telegram bot daemon
#[derive(Parser, Debug)]
#[command(name = "hopevpn-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "HOPEVPN_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Backend API base URL (overrides API_BASE_URL and the config file)
    #[arg(long, value_name = "URL")]
    api_base_url: Option<String>,

    /// Telegram bot token (overrides TELEGRAM_BOT_TOKEN)
    #[arg(long, value_name = "TOKEN")]
    telegram_token: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "HOPEVPN_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Run the bot (default)
    Run,
    /// Probe the backend health endpoint and exit
    CheckApi,
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "hopevpn_daemon={level},hopevpn_conductor={level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

fn resolve_config(args: &Args) -> Result<BotConfig> {
    let path = args.config.clone().or_else(default_config_path);
    let mut config =
        load_config_from_path(path.as_deref()).context("Failed to load configuration")?;

    ConfigOverrides {
        api_base_url: args.api_base_url.clone(),
        telegram_token: args.telegram_token.clone(),
    }
    .apply(&mut config);

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn check_api(config: &BotConfig) -> ExitCode {
    let outcome = probe::check_api(&config.api_base_url).await;
    if outcome.is_healthy() {
        println!("{}: healthy", config.api_base_url);
        ExitCode::SUCCESS
    } else {
        eprintln!("{}: {outcome}", config.api_base_url);
        ExitCode::FAILURE
    }
}

fn install_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, initiating shutdown"),
            _ = sigint.recv() => info!("Received SIGINT, initiating shutdown"),
        }
        shutdown.store(true, Ordering::SeqCst);
    });
    Ok(())
}

async fn run(config: BotConfig) -> Result<()> {
    let token = config
        .telegram_token
        .clone()
        .context("TELEGRAM_BOT_TOKEN is not set (use the environment or --telegram-token)")?;

    info!(api_base_url = %config.api_base_url, "Backend API");
    if let Some(ref path) = config.config_file_path {
        info!(config_path = ?path, "Config file");
    }

    let outcome = probe::check_api(&config.api_base_url).await;
    if !outcome.is_healthy() {
        warn!(outcome = %outcome, "Backend health probe failed, starting anyway");
    }

    let surface = TelegramSurface::new(&token).context("Failed to build Telegram client")?;
    let me = surface
        .get_me()
        .await
        .context("Telegram rejected the bot token")?;
    info!(
        bot_id = me.id,
        username = me.username.as_deref().unwrap_or("-"),
        "Connected to Telegram"
    );

    let backend = HttpVpnBackend::new(ApiGateway::new(
        config.api_base_url.clone(),
        config.timeouts,
    ));
    let conductor = Arc::new(Conductor::new(
        Arc::new(backend),
        Arc::new(surface),
        config.limits,
    ));

    let shutdown = Arc::new(AtomicBool::new(false));
    install_signal_handlers(Arc::clone(&shutdown))?;

    let mut server = BotServer::new(
        conductor,
        ServerConfig {
            poll_timeout: config.poll_timeout,
            max_concurrent_turns: config.max_concurrent_turns,
        },
    );
    server.run(shutdown).await
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    init_logging(&args.log_level);

    let config = resolve_config(&args)?;

    match args.command.unwrap_or(Command::Run) {
        Command::CheckApi => Ok(check_api(&config).await),
        Command::Run => {
            info!(version = env!("CARGO_PKG_VERSION"), "Hope VPN daemon starting");
            match run(config).await {
                Ok(()) => {
                    info!("Hope VPN daemon stopped cleanly");
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    error!(error = %e, "Daemon stopped with error");
                    Err(e)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_check_api_subcommand() {
        let args = Args::parse_from(["hopevpn-daemon", "--api-base-url", "http://x", "check-api"]);
        assert_eq!(args.command, Some(Command::CheckApi));
        assert_eq!(args.api_base_url.as_deref(), Some("http://x"));
    }
}
