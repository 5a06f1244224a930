//! Foreground sync loop for `sync --daemon`
//!
//! Runs a sync immediately and then once per configured interval until
//! Ctrl+C. Each pass goes through [`SyncEngine::run`], so it takes the same
//! lock as a manual sync and skips a tick when one is already in progress.

use crate::error::SyncError;
use crate::sync::{SyncEngine, SyncOptions, SyncSummary};
use anyhow::{anyhow, Result};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Counters for the lifetime of one daemon run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DaemonStats {
    pub total_syncs: u64,
    pub successful_syncs: u64,
    pub failed_syncs: u64,
    /// Ticks skipped because another sync held the lock
    pub skipped_syncs: u64,
}

pub struct Daemon {
    sync_engine: SyncEngine,
    options: SyncOptions,
    sync_interval: Duration,
    stats: DaemonStats,
}

impl Daemon {
    /// Create a daemon using the engine's configured frequency
    pub fn new(sync_engine: SyncEngine, options: SyncOptions) -> Result<Self> {
        let frequency = sync_engine.config().sync.frequency_seconds;
        if frequency == 0 {
            return Err(anyhow!(
                "Sync frequency is 0 (manual only). Set one with: mac-sync-wizard config --frequency <seconds>"
            ));
        }

        Ok(Self {
            sync_engine,
            options,
            sync_interval: Duration::from_secs(frequency),
            stats: DaemonStats::default(),
        })
    }

    pub fn with_interval(mut self, sync_interval: Duration) -> Self {
        self.sync_interval = sync_interval;
        self
    }

    pub fn stats(&self) -> &DaemonStats {
        &self.stats
    }

    /// Run until Ctrl+C
    pub async fn run(&mut self) -> Result<DaemonStats> {
        self.run_until(Self::wait_for_shutdown_signal()).await
    }

    /// Main daemon loop, stops when `shutdown` completes
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<DaemonStats>
    where
        F: Future<Output = ()>,
    {
        let mut interval_timer = interval(self.sync_interval);
        interval_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!("Daemon loop started with interval: {:?}", self.sync_interval);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown signal received in daemon loop");
                    break;
                }

                // The first tick completes immediately
                _ = interval_timer.tick() => {
                    debug!("Starting scheduled sync operation");
                    let sync_start = Instant::now();
                    let result = self.sync_engine.run(self.options).await;
                    self.record(result, sync_start.elapsed());
                }
            }
        }

        info!(
            "Daemon loop exiting after {} syncs ({} failed)",
            self.stats.total_syncs, self.stats.failed_syncs
        );
        Ok(self.stats.clone())
    }

    fn record(&mut self, result: Result<SyncSummary>, duration: Duration) {
        self.stats.total_syncs += 1;
        match result {
            Ok(summary) => {
                self.stats.successful_syncs += 1;
                info!(
                    "Sync completed in {:.2}s: {} utilities, {} failed",
                    duration.as_secs_f64(),
                    summary.utilities_synced(),
                    summary.failures.len()
                );
            }
            Err(e) if matches!(e.downcast_ref::<SyncError>(), Some(SyncError::AlreadySyncing(_))) => {
                self.stats.skipped_syncs += 1;
                warn!("Skipping scheduled sync: {}", e);
            }
            Err(e) => {
                self.stats.failed_syncs += 1;
                error!("Sync operation failed: {:#}", e);
            }
        }
    }

    async fn wait_for_shutdown_signal() {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        debug!("Ctrl+C received");
    }
}
