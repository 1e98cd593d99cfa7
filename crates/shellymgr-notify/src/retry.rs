use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::dispatcher::NotificationDispatcher;

/// Cooperative task that re-enters delivery for failed history rows whose
/// `next_retry_at` has elapsed.
pub struct RetrySweeper {
    dispatcher: Arc<NotificationDispatcher>,
    interval: Duration,
}

impl RetrySweeper {
    pub fn new(dispatcher: Arc<NotificationDispatcher>, interval: Duration) -> Self {
        Self { dispatcher, interval }
    }

    /// Run until the shutdown signal flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    match self.dispatcher.retry_due(Utc::now()).await {
                        Ok(0) => {}
                        Ok(n) => debug!(retried = n, "retry sweep"),
                        Err(e) => warn!(error = %e, "retry sweep failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}
