use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::store::KeyValueStore;

/// Periodically drops expired claim and nonce records. Reads never see
/// expired values regardless; this only reclaims space.
pub struct ExpirySweeper {
    store: Arc<dyn KeyValueStore>,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(store: Arc<dyn KeyValueStore>, interval: Duration) -> Self {
        assert!(!interval.is_zero(), "Sweep interval must be positive");
        Self { store, interval }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting expiry sweeper for {} store every {:?}",
            self.store.backend_name(),
            self.interval
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    match changed {
                        Ok(_) => {
                            if *shutdown.borrow() {
                                info!("Sweeper shutdown signal received");
                                break;
                            }
                        }
                        Err(_) => {
                            warn!("Shutdown channel closed unexpectedly. Exiting sweeper loop");
                            break;
                        }
                    }
                }
                _ = sleep(self.interval) => {
                    self.tick().await;
                }
            }
        }
    }

    async fn tick(&self) -> u64 {
        match self.store.purge_expired().await {
            Ok(purged) => {
                debug!(purged, "Purged expired store entries");
                purged
            }
            Err(err) => {
                warn!("Failed to purge expired entries: {err}");
                0
            }
        }
    }
}
