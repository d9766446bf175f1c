//! Long-Polling Update Loop
//!
//! Pulls updates from the Bot API and hands each one to the conductor on its
//! own task:
//!
//! ```text
//!   getUpdates ──▶ classify ──▶ Semaphore permit ──▶ tokio::spawn(handle_turn)
//!        ▲                                                   │
//!        └──────────── offset = last update_id + 1 ◀─────────┘
//! ```
//!
//! Turns of the same user serialize on the session lock inside the
//! conductor; the semaphore only bounds total concurrency.
//!
//! On shutdown the loop stops polling and waits for in-flight turns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn, Instrument};

use hopevpn_conductor::{views, ChatSurface, Conductor, HttpVpnBackend};

use crate::telegram::{classify, Inbound, TelegramSurface, Update};

/// First wait after a failed poll
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Longest wait between failed polls
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// How often the shutdown flag is checked while waiting
const SHUTDOWN_TICK: Duration = Duration::from_millis(100);

/// Longest wait for in-flight turns at shutdown
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Conductor wired to the production backend and Telegram
pub type BotConductor = Conductor<HttpVpnBackend, TelegramSurface>;

/// Loop settings
#[derive(Clone, Copy, Debug)]
pub struct ServerConfig {
    /// Long-poll timeout passed to `getUpdates`
    pub poll_timeout: Duration,
    /// Upper bound on concurrently processed turns
    pub max_concurrent_turns: usize,
}

/// The polling server
pub struct BotServer {
    conductor: Arc<BotConductor>,
    surface: Arc<TelegramSurface>,
    config: ServerConfig,
    permits: Arc<Semaphore>,
    offset: i64,
}

impl BotServer {
    /// Create a server around a conductor
    pub fn new(conductor: Arc<BotConductor>, config: ServerConfig) -> Self {
        let surface = Arc::clone(conductor.surface());
        Self {
            conductor,
            surface,
            config,
            permits: Arc::new(Semaphore::new(config.max_concurrent_turns)),
            offset: 0,
        }
    }

    /// Poll until `shutdown` is set, then drain in-flight turns
    ///
    /// # Errors
    ///
    /// Returns an error only if the turn semaphore is closed, which does not
    /// happen while the server owns it.
    pub async fn run(&mut self, shutdown: Arc<AtomicBool>) -> Result<()> {
        let mut in_flight = JoinSet::new();
        let mut backoff = INITIAL_BACKOFF;

        info!(
            poll_timeout_secs = self.config.poll_timeout.as_secs(),
            max_concurrent_turns = self.config.max_concurrent_turns,
            "Polling for updates"
        );

        while !shutdown.load(Ordering::SeqCst) {
            // Reap finished turns so the set does not grow without bound
            while let Some(joined) = in_flight.try_join_next() {
                if let Err(e) = joined {
                    error!(error = %e, "Turn task panicked");
                }
            }

            let polled = tokio::select! {
                polled = self.surface.get_updates(self.offset, self.config.poll_timeout) => polled,
                () = wait_for_flag(&shutdown) => break,
            };

            let updates = match polled {
                Ok(updates) => {
                    backoff = INITIAL_BACKOFF;
                    updates
                }
                Err(e) => {
                    warn!(error = %e, retry_in_secs = backoff.as_secs(), "getUpdates failed");
                    tokio::select! {
                        () = tokio::time::sleep(backoff) => {}
                        () = wait_for_flag(&shutdown) => break,
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    continue;
                }
            };

            for update in updates {
                self.dispatch(update, &mut in_flight).await?;
            }
        }

        info!(in_flight = in_flight.len(), "Shutdown requested, draining turns");
        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            while let Some(joined) = in_flight.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "Turn task panicked");
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!(abandoned = in_flight.len(), "Drain timed out");
            in_flight.abort_all();
        }
        Ok(())
    }

    async fn dispatch(&mut self, update: Update, in_flight: &mut JoinSet<()>) -> Result<()> {
        let update_id = update.update_id;
        self.offset = self.offset.max(update_id + 1);

        let Some(inbound) = classify(update) else {
            debug!(update_id, "Ignoring update");
            return Ok(());
        };

        let permit = Arc::clone(&self.permits).acquire_owned().await?;
        match inbound {
            Inbound::Turn(turn) => {
                let conductor = Arc::clone(&self.conductor);
                in_flight.spawn(async move {
                    conductor.handle_turn(turn).await;
                    drop(permit);
                });
            }
            Inbound::Unroutable { callback_id } => {
                let surface = Arc::clone(&self.surface);
                in_flight.spawn(
                    async move {
                        if let Err(e) = surface
                            .answer_callback(&callback_id, Some(views::expired_notice()))
                            .await
                        {
                            debug!(error = %e, "Could not acknowledge callback");
                        }
                        drop(permit);
                    }
                    .instrument(tracing::info_span!("unroutable", update_id)),
                );
            }
        }
        Ok(())
    }
}

async fn wait_for_flag(flag: &AtomicBool) {
    while !flag.load(Ordering::SeqCst) {
        tokio::time::sleep(SHUTDOWN_TICK).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_for_flag_returns_once_set() {
        let flag = Arc::new(AtomicBool::new(false));
        let setter = Arc::clone(&flag);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            setter.store(true, Ordering::SeqCst);
        });
        tokio::time::timeout(Duration::from_secs(2), wait_for_flag(&flag))
            .await
            .expect("flag was set");
    }

    #[test]
    fn test_backoff_is_capped() {
        let mut backoff = INITIAL_BACKOFF;
        for _ in 0..10 {
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
        assert_eq!(backoff, MAX_BACKOFF);
    }
}
