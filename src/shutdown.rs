//! Signal handling and bounded draining for the HTTP server.
//!
//! SIGINT or SIGTERM flips the coordinator into the triggered state. The
//! server stops accepting connections, in-flight requests get
//! `drain_timeout` to finish, then shared state is flushed.

use crate::state::AppState;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
pub struct ShutdownConfig {
    pub drain_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_secs(30),
        }
    }
}

impl ShutdownConfig {
    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }
}

pub struct ShutdownCoordinator {
    config: ShutdownConfig,
    trigger: watch::Sender<bool>,
}

impl ShutdownCoordinator {
    pub fn new(config: ShutdownConfig) -> Self {
        let (trigger, _) = watch::channel(false);
        Self { config, trigger }
    }

    pub fn trigger(&self) {
        self.trigger.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.trigger.borrow()
    }

    /// Resolves once shutdown was triggered, by a signal or by `trigger`.
    pub fn triggered(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.trigger.subscribe();
        async move {
            // a closed channel means the coordinator is gone; stop as well
            let _ = rx.wait_for(|triggered| *triggered).await;
        }
    }

    /// Waits for SIGINT or SIGTERM, then triggers shutdown.
    pub async fn listen_for_signals(&self) {
        let ctrl_c = async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(err) => {
                    warn!(error = %err, "failed to listen for SIGTERM");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("received SIGINT, shutting down"),
            _ = terminate => info!("received SIGTERM, shutting down"),
            _ = self.triggered() => {}
        }
        self.trigger();
    }

    /// Runs `server` to completion, giving it at most `drain_timeout` after
    /// shutdown was triggered.
    pub async fn drain<F, T>(&self, server: F) -> Option<T>
    where
        F: Future<Output = T>,
    {
        tokio::pin!(server);
        tokio::select! {
            output = &mut server => Some(output),
            _ = self.triggered() => {
                match timeout(self.config.drain_timeout, &mut server).await {
                    Ok(output) => Some(output),
                    Err(_) => {
                        warn!(
                            timeout_secs = self.config.drain_timeout.as_secs(),
                            "in-flight requests did not finish before the drain timeout"
                        );
                        None
                    }
                }
            }
        }
    }
}

/// Final flush of shared state after the listener closed.
pub fn flush_state(state: &AppState) {
    let stats = state.cache_stats();
    info!(
        cache_size = stats.size,
        cache_capacity = stats.capacity,
        cache_hit_rate_pct = (stats.hit_rate() * 100.0).round(),
        "cache statistics at shutdown"
    );
    state.clear_cache();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_releases_waiters() {
        let coordinator = ShutdownCoordinator::new(ShutdownConfig::default());
        assert!(!coordinator.is_triggered());
        let waiter = tokio::spawn(coordinator.triggered());
        coordinator.trigger();
        waiter.await.unwrap();
        assert!(coordinator.is_triggered());
    }

    #[tokio::test]
    async fn drain_returns_server_output() {
        let coordinator = ShutdownCoordinator::new(ShutdownConfig::default());
        assert_eq!(coordinator.drain(async { 7 }).await, Some(7));
    }

    #[tokio::test]
    async fn drain_gives_up_after_timeout() {
        let coordinator = ShutdownCoordinator::new(
            ShutdownConfig::default().with_drain_timeout(Duration::from_millis(50)),
        );
        coordinator.trigger();
        let output = coordinator
            .drain(std::future::pending::<()>())
            .await;
        assert_eq!(output, None);
    }
}
