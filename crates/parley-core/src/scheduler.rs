//! Periodic directory refresh.
//!
//! Each collection is refreshed once its last successful refresh is older
//! than the configured interval. Refreshes that find another one of the same
//! collection in flight are skipped and retried on the next check.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parley_directory::{Collection, MetadataCache, RefreshOutcome};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const MIN_CHECK_PERIOD: Duration = Duration::from_secs(1);

pub struct DirectoryScheduler {
    cache: Arc<MetadataCache>,
    interval: Option<Duration>,
    /// Last successful refresh per collection.
    last_refresh: HashMap<Collection, Instant>,
}

impl DirectoryScheduler {
    /// `interval` of `None` disables periodic refresh. The clock starts now,
    /// since startup warm-up covers the first load.
    pub fn new(cache: Arc<MetadataCache>, interval: Option<Duration>) -> Self {
        let now = Instant::now();
        Self {
            cache,
            interval,
            last_refresh: Collection::ALL.iter().map(|c| (*c, now)).collect(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.interval.is_some()
    }

    /// Collections whose refresh is due, in refresh order.
    pub fn due(&self) -> Vec<Collection> {
        let Some(interval) = self.interval else {
            return Vec::new();
        };
        let now = Instant::now();
        Collection::ALL
            .iter()
            .copied()
            .filter(|c| match self.last_refresh.get(c) {
                Some(last) => now.duration_since(*last) >= interval,
                None => true,
            })
            .collect()
    }

    /// Refresh every due collection. Returns how many were refreshed.
    pub async fn tick(&mut self, cancel: &CancellationToken) -> usize {
        let mut refreshed = 0;
        for collection in self.due() {
            if cancel.is_cancelled() {
                break;
            }
            match self.cache.refresh(collection, cancel).await {
                Ok(RefreshOutcome::Refreshed { entries }) => {
                    info!("[SCHEDULER] {} refreshed ({} entries)", collection, entries);
                    self.last_refresh.insert(collection, Instant::now());
                    refreshed += 1;
                }
                Ok(RefreshOutcome::AlreadyRunning) => {
                    debug!("[SCHEDULER] {} refresh already in flight", collection);
                }
                Err(e) => {
                    warn!("[SCHEDULER] {} refresh failed: {}", collection, e);
                }
            }
        }
        refreshed
    }

    /// Run until `cancel` fires. `None` when refresh is disabled.
    pub fn spawn(mut self, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        let interval = self.interval?;
        let period = (interval / 4).max(MIN_CHECK_PERIOD);
        info!(
            "[SCHEDULER] Refreshing directories every {}s",
            interval.as_secs()
        );
        Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(period) => {
                        self.tick(&cancel).await;
                    }
                }
            }
            debug!("[SCHEDULER] Stopped");
        }))
    }
}
