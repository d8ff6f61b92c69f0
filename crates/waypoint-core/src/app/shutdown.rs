//! Shutdown - シグナル受信と drain
//!
//! SIGINT / SIGTERM を受けたら watch channel に `true` を流す。
//! consumer が止まった後、tracker が空になるまで待つ（`drain`）。

use std::time::Duration;

use tokio::signal;
use tokio::sync::watch;

use super::tracker::TaskTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainConfig {
    pub poll_interval: Duration,
    /// `None` waits forever.
    pub max_wait: Option<Duration>,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            max_wait: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    Drained,
    TimedOut { remaining: usize },
}

/// Wait for SIGINT or SIGTERM, then flip `shutdown_tx` to `true`.
pub async fn wait_for_shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT, shutting down"),
        () = terminate => tracing::info!("received SIGTERM, shutting down"),
    }

    shutdown_tx.send_replace(true);
}

/// Block until every in-flight task has finished.
pub async fn drain(tracker: &TaskTracker, config: &DrainConfig) -> DrainOutcome {
    let started = tokio::time::Instant::now();
    let wait = tracker.wait_until_empty(config.poll_interval);

    let outcome = match config.max_wait {
        None => {
            wait.await;
            DrainOutcome::Drained
        }
        Some(limit) => match tokio::time::timeout(limit, wait).await {
            Ok(()) => DrainOutcome::Drained,
            Err(_) => DrainOutcome::TimedOut {
                remaining: tracker.count(),
            },
        },
    };

    match outcome {
        DrainOutcome::Drained => tracing::info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "all in-flight tasks finished"
        ),
        DrainOutcome::TimedOut { remaining } => tracing::warn!(
            remaining,
            tasks = ?tracker.snapshot(),
            "drain timed out with tasks still in flight"
        ),
    }
    outcome
}
