//! # Reclaim Worker
//!
//! Background task returning expired reservations to `Available`.
//!
//! ```text
//! every reclaim.interval_secs
//!      │
//!      ▼
//! sequences().reclaim_expired(None)
//!      │  reserved AND expires_at <= now  →  available
//!      ▼
//! log the count, wait for the next tick or shutdown
//! ```
//!
//! Reserving in dense mode also reclaims its own scope first, so the worker
//! only bounds how long an abandoned number stays `Reserved`.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::{DbError, DbResult};
use crate::pool::Database;

/// Periodically reclaims expired reservations across every scope.
pub struct ReclaimWorker {
    db: Database,
    interval: Duration,
    shutdown_rx: mpsc::Receiver<()>,
}

/// Handle for stopping a running [`ReclaimWorker`].
#[derive(Clone)]
pub struct ReclaimWorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl ReclaimWorkerHandle {
    /// Triggers graceful shutdown.
    pub async fn shutdown(&self) -> DbResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| DbError::Internal("Reclaim shutdown channel closed".into()))
    }
}

impl ReclaimWorker {
    /// Creates a worker ticking at the configured `reclaim.interval_secs`.
    pub fn new(db: Database) -> (Self, ReclaimWorkerHandle) {
        let interval = Duration::from_secs(db.settings().reclaim.interval_secs);
        Self::with_interval(db, interval)
    }

    pub fn with_interval(db: Database, interval: Duration) -> (Self, ReclaimWorkerHandle) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let worker = ReclaimWorker {
            db,
            // tokio intervals cannot be zero
            interval: interval.max(Duration::from_millis(1)),
            shutdown_rx,
        };
        (worker, ReclaimWorkerHandle { shutdown_tx })
    }

    /// Spawns the worker unless `reclaim.enabled` is off.
    pub fn spawn(db: Database) -> Option<(JoinHandle<()>, ReclaimWorkerHandle)> {
        if !db.settings().reclaim.enabled {
            debug!("Reclaim worker disabled");
            return None;
        }
        let (worker, handle) = Self::new(db);
        Some((tokio::spawn(worker.run()), handle))
    }

    /// Runs until shut down. The first pass happens immediately.
    ///
    /// This should be spawned as a background task.
    pub async fn run(mut self) {
        info!(interval_secs = self.interval.as_secs(), "Reclaim worker starting");

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.reclaim_once().await {
                        error!(?e, "Failed to reclaim expired reservations");
                    }
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Reclaim worker shutting down");
                    break;
                }
            }
        }

        info!("Reclaim worker stopped");
    }

    /// One reclaim pass over every scope.
    pub async fn reclaim_once(&self) -> DbResult<u64> {
        let reclaimed = self.db.sequences().reclaim_expired(None).await?;
        if reclaimed > 0 {
            info!(reclaimed, "Reclaimed expired reservations");
        } else {
            debug!("No expired reservations");
        }
        Ok(reclaimed)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StockbookConfig;
    use crate::pool::DbConfig;
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::Arc;
    use stockbook_core::{Clock, Location, ManualClock, SequenceStatus};

    fn october() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap()
    }

    async fn setup() -> (Database, Arc<ManualClock>, Location) {
        let clock = Arc::new(ManualClock::new(october()));
        let db = Database::open(DbConfig::in_memory(), StockbookConfig::default(), clock.clone())
            .await
            .unwrap();
        let hq = db.locations().create_branch("HQ", "Head Office").await.unwrap();
        (db, clock, Location::Branch(hq.id))
    }

    #[tokio::test]
    async fn test_reclaim_once_only_touches_expired() {
        let (db, clock, hq) = setup().await;
        let sequences = db.sequences();

        let stale = sequences.reserve("Payment", hq, october(), "till-1").await.unwrap();
        clock.advance(chrono::Duration::seconds(600));
        let fresh = sequences.reserve("Payment", hq, clock.now(), "till-2").await.unwrap();
        clock.advance(chrono::Duration::seconds(301));

        let (worker, _handle) = ReclaimWorker::new(db.clone());
        assert_eq!(worker.reclaim_once().await.unwrap(), 1);
        assert_eq!(worker.reclaim_once().await.unwrap(), 0);

        assert_eq!(
            sequences.get(stale.reservation_id).await.unwrap().status,
            SequenceStatus::Available
        );
        assert_eq!(
            sequences.get(fresh.reservation_id).await.unwrap().status,
            SequenceStatus::Reserved
        );
    }

    #[tokio::test]
    async fn test_running_worker_reclaims_and_shuts_down() {
        let (db, clock, hq) = setup().await;
        let handle_to_expire = db
            .sequences()
            .reserve("Sales Order", hq, october(), "web")
            .await
            .unwrap();
        clock.advance(chrono::Duration::hours(1));

        let (worker, handle) = ReclaimWorker::with_interval(db.clone(), Duration::from_millis(20));
        let task = tokio::spawn(worker.run());

        let mut status = SequenceStatus::Reserved;
        for _ in 0..100 {
            status = db
                .sequences()
                .get(handle_to_expire.reservation_id)
                .await
                .unwrap()
                .status;
            if status == SequenceStatus::Available {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(status, SequenceStatus::Available);

        handle.shutdown().await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_spawn_respects_enabled_flag() {
        let mut settings = StockbookConfig::default();
        settings.reclaim.enabled = false;
        let db = Database::open(DbConfig::in_memory(), settings, Arc::new(ManualClock::new(october())))
            .await
            .unwrap();
        assert!(ReclaimWorker::spawn(db.clone()).is_none());

        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let (task, handle) = ReclaimWorker::spawn(db).unwrap();
        handle.shutdown().await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }
}
