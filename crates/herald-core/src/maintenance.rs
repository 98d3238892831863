use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::cache::ContentCache;
use crate::error::AppError;
use crate::pool::SourcePoolManager;
use crate::traits::SourceStore;

/// Events emitted by the maintenance loop for monitoring/logging.
#[derive(Debug, Clone)]
pub enum MaintenanceEvent<'a> {
    Started {
        interval: Duration,
    },
    CacheSwept {
        removed: usize,
        remaining: usize,
    },
    PoolsRefreshed {
        filters: usize,
    },
    RefreshFailed {
        filter: &'a str,
        error: &'a AppError,
    },
    Stopped {
        ticks: u64,
    },
}

/// Trait for receiving maintenance events (decoupled logging).
pub trait MaintenanceReporter: Send + Sync {
    fn report(&self, event: MaintenanceEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMaintenanceReporter;

impl MaintenanceReporter for TracingMaintenanceReporter {
    fn report(&self, event: MaintenanceEvent<'_>) {
        match event {
            MaintenanceEvent::Started { interval } => {
                tracing::info!(interval_secs = interval.as_secs(), "Maintenance loop started");
            }
            MaintenanceEvent::CacheSwept { removed, remaining } => {
                if removed > 0 {
                    tracing::info!(%removed, %remaining, "Swept expired cache entries");
                } else {
                    tracing::debug!(%remaining, "No expired cache entries");
                }
            }
            MaintenanceEvent::PoolsRefreshed { filters } => {
                tracing::debug!(%filters, "Source pools checked");
            }
            MaintenanceEvent::RefreshFailed { filter, error } => {
                tracing::warn!(%filter, %error, "Pool refresh failed");
            }
            MaintenanceEvent::Stopped { ticks } => {
                tracing::info!(%ticks, "Maintenance loop stopped");
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    pub interval: Duration,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}

/// Result of one maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub cache_entries_removed: usize,
    pub pools_checked: usize,
    pub refresh_failures: usize,
}

/// Periodic housekeeping: expired-cache sweep and pool refresh for every
/// filter that has been requested so far.
pub struct MaintenanceService<S: SourceStore> {
    cache: ContentCache,
    pools: SourcePoolManager<S>,
    config: MaintenanceConfig,
}

impl<S: SourceStore> MaintenanceService<S> {
    pub fn new(cache: ContentCache, pools: SourcePoolManager<S>, config: MaintenanceConfig) -> Self {
        Self {
            cache,
            pools,
            config,
        }
    }

    /// Run one pass. Pools are only rebuilt when their refresh interval has
    /// elapsed.
    pub async fn run_once<R: MaintenanceReporter>(&self, reporter: &R) -> MaintenanceReport {
        let removed = self.cache.cleanup();
        reporter.report(MaintenanceEvent::CacheSwept {
            removed,
            remaining: self.cache.len(),
        });

        let filters = self.pools.tracked_filters();
        let mut failures = 0;
        for filter in &filters {
            if let Err(e) = self.pools.refresh_pools(filter, false).await {
                failures += 1;
                reporter.report(MaintenanceEvent::RefreshFailed {
                    filter: &filter.to_string(),
                    error: &e,
                });
            }
        }
        reporter.report(MaintenanceEvent::PoolsRefreshed {
            filters: filters.len(),
        });

        MaintenanceReport {
            cache_entries_removed: removed,
            pools_checked: filters.len(),
            refresh_failures: failures,
        }
    }

    /// Run the maintenance loop until cancellation.
    pub async fn run<R: MaintenanceReporter>(
        &self,
        cancel_token: CancellationToken,
        reporter: &R,
    ) -> Result<(), AppError> {
        reporter.report(MaintenanceEvent::Started {
            interval: self.config.interval,
        });

        let mut ticks = 0u64;
        loop {
            tokio::select! {
                () = tokio::time::sleep(self.config.interval) => {}
                () = cancel_token.cancelled() => break,
            }
            self.run_once(reporter).await;
            ticks += 1;
        }

        reporter.report(MaintenanceEvent::Stopped { ticks });
        Ok(())
    }
}
