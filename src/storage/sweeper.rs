//! Background sweeper for abandoned upload sessions
//!
//! Chunk units of a session that never reaches `complete` would otherwise stay
//! in the transient directory forever. The sweeper runs periodically and
//! removes sessions (and crashed merge outputs) older than the retention window.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info};
use tokio::time;

use crate::config::SweepConfig;
use crate::error::MediaResult;
use crate::service::session_lock::SessionLocks;
use crate::storage::{MediaStorage, SessionClaim, SweepReport};

/// Background orphan sweeper
pub struct OrphanSweeper {
    storage: Arc<dyn MediaStorage>,
    locks: SessionLocks,
    sweep_interval: Duration,
    retention: Duration,
}

impl OrphanSweeper {
    pub fn new(storage: Arc<dyn MediaStorage>, locks: SessionLocks, config: &SweepConfig) -> Self {
        Self {
            storage,
            locks,
            sweep_interval: Duration::from_secs(config.interval_secs.max(1)),
            retention: Duration::from_secs(config.retention_secs),
        }
    }

    /// Start the sweeper (runs until the task is dropped)
    pub async fn start(self) {
        info!(
            "Starting orphan sweeper with {}s interval and {}s retention",
            self.sweep_interval.as_secs(),
            self.retention.as_secs()
        );

        let mut interval = time::interval(self.sweep_interval);
        loop {
            interval.tick().await;

            if let Err(e) = self.sweep_once().await {
                error!("Error sweeping abandoned uploads: {}", e);
            }
        }
    }

    /// Run a single sweep pass
    pub async fn sweep_once(&self) -> MediaResult<SweepReport> {
        let storage = Arc::clone(&self.storage);
        let locks = self.locks.clone();
        let retention = self.retention;

        let report = tokio::task::spawn_blocking(move || {
            storage.sweep_stale(retention, &|token| {
                locks
                    .try_acquire(token)
                    .map(|guard| Box::new(guard) as SessionClaim)
            })
        })
        .await??;

        if report.sessions_removed > 0 || report.partials_removed > 0 {
            info!(
                "Sweep removed {} abandoned sessions and {} partial artifacts",
                report.sessions_removed, report.partials_removed
            );
        } else {
            debug!("Sweep found nothing to remove");
        }
        Ok(report)
    }
}

/// Spawn the sweeper on the current runtime when enabled
pub fn spawn_sweeper(
    storage: Arc<dyn MediaStorage>,
    locks: SessionLocks,
    config: &SweepConfig,
) -> Option<tokio::task::JoinHandle<()>> {
    if !config.enabled {
        info!("Orphan sweeper disabled");
        return None;
    }
    let sweeper = OrphanSweeper::new(storage, locks, config);
    Some(tokio::spawn(sweeper.start()))
}
