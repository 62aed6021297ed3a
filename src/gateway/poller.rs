//! Periodic background refresh
//!
//! Crawls every source once at startup, then again on every polling
//! interval until the cancellation token fires.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::Gateway;

/// Handle of a running poller
pub struct Poller {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

impl Poller {
    /// Start polling in a background task
    ///
    /// The first refresh runs immediately.
    pub fn spawn(gateway: Arc<Gateway>, interval: Duration, cancel: CancellationToken) -> Self {
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                info!("Refreshing all sources");
                let failed = gateway.refresh_all(&token).await;
                if token.is_cancelled() {
                    break;
                }
                if failed.is_empty() {
                    info!("Refresh complete");
                } else {
                    warn!(failed = ?failed, "Refresh completed with failures");
                }
            }
            info!("Poller stopped");
        });

        Self { handle, cancel }
    }

    /// Cancel polling and wait for the task to finish
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Poller task ended abnormally");
        }
    }
}
