//! # Unit of Work
//!
//! One SQLite transaction plus the in-process locks it was declared with.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  WorkPlan::new()                                                        │
//! │      .sequence(handle.scope)        ← sequence scopes sort first        │
//! │      .stock(7, Branch(1))           ← then (item, kind, id)             │
//! │      .stock(7, Warehouse(2))                                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  db.begin_work(plan)                                                    │
//! │       │  1. acquire every key in order (bounded wait, ScopeLocked)      │
//! │       │  2. take a pooled connection, BEGIN                             │
//! │       ▼                                                                 │
//! │  uow.confirm(&handle) / uow.apply_movement(..) / uow.transfer(..)      │
//! │       │  touching an undeclared key → LockNotHeld                       │
//! │       ▼                                                                 │
//! │  uow.commit()                                                           │
//! │       │  every referenced reservation confirmed? else ReferentialConflict│
//! │       ▼                                                                 │
//! │  COMMIT, then the locks are released                                    │
//! │                                                                         │
//! │  uow.abort()  → ROLLBACK + release attached reservations               │
//! │  drop(uow)    → ROLLBACK only; reservation waits for reclaim           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use tracing::{debug, info, warn};
use uuid::Uuid;

use stockbook_core::{
    Clock, CoreError, DocumentRef, Location, ReservationHandle, SequenceReservation,
    SequenceScope, SequenceStatus,
};

use crate::error::DbResult;
use crate::locks::{HeldLocks, LockKey};
use crate::pool::Database;
use crate::repository::sequence;

// =============================================================================
// Work Plan
// =============================================================================

/// The keys a unit of work will touch, declared before it starts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkPlan {
    keys: BTreeSet<LockKey>,
}

impl WorkPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a sequence scope (needed to confirm a reservation in it).
    pub fn sequence(mut self, scope: SequenceScope) -> Self {
        self.keys.insert(LockKey::Sequence(scope));
        self
    }

    /// Declares an (item, location) pair.
    pub fn stock(mut self, item_id: i64, location: Location) -> Self {
        self.keys.insert(LockKey::stock(item_id, location));
        self
    }

    pub fn key(mut self, key: LockKey) -> Self {
        self.keys.insert(key);
        self
    }

    /// Keys in acquisition order.
    pub fn keys(&self) -> impl Iterator<Item = &LockKey> {
        self.keys.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

// =============================================================================
// Unit of Work
// =============================================================================

/// An open transaction holding the locks of its [`WorkPlan`].
///
/// Ledger operations on it are defined in [`crate::ledger`].
pub struct UnitOfWork {
    id: String,
    tx: Transaction<'static, Sqlite>,
    locks: HeldLocks,
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    /// Reservations stamped on movements; all must be confirmed at commit.
    referenced: BTreeSet<i64>,
    /// Reservations released again if the unit of work is aborted.
    attached: Vec<ReservationHandle>,
}

impl fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("id", &self.id)
            .field("locks", &self.locks)
            .field("referenced", &self.referenced)
            .finish_non_exhaustive()
    }
}

impl UnitOfWork {
    pub(crate) async fn begin(db: &Database, plan: WorkPlan) -> DbResult<Self> {
        let wait = db.settings().locking.lock_wait();
        let locks = db.locks().acquire(plan.keys, wait).await?;
        let tx = db.pool().begin().await?;

        let id = Uuid::new_v4().to_string();
        debug!(work_unit_id = %id, keys = locks.keys().count(), "Unit of work started");

        Ok(UnitOfWork {
            id,
            tx,
            locks,
            pool: db.pool().clone(),
            clock: Arc::clone(db.clock()),
            referenced: BTreeSet::new(),
            attached: Vec::new(),
        })
    }

    /// Identifier stamped on every movement this unit writes.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn holds(&self, key: &LockKey) -> bool {
        self.locks.holds(key)
    }

    pub(crate) fn require(&self, key: &LockKey) -> DbResult<()> {
        Ok(self.locks.require(key)?)
    }

    pub(crate) fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    /// Confirms a reservation inside this transaction.
    ///
    /// The reservation is attached: [`abort`](Self::abort) releases it.
    pub async fn confirm(&mut self, handle: &ReservationHandle) -> DbResult<SequenceReservation> {
        self.require(&LockKey::Sequence(handle.scope))?;

        let now = self.now();
        let confirmed = sequence::confirm(&mut self.tx, handle, now).await?;

        self.referenced.insert(handle.reservation_id);
        if !self
            .attached
            .iter()
            .any(|h| h.reservation_id == handle.reservation_id)
        {
            self.attached.push(handle.clone());
        }

        info!(code = %handle.code, work_unit_id = %self.id, "Document number confirmed");
        Ok(confirmed)
    }

    /// Registers a reservation to release if this unit is aborted, without
    /// confirming it.
    pub fn attach(&mut self, handle: ReservationHandle) {
        self.attached.push(handle);
    }

    /// Checks the reservation a movement is stamped with.
    ///
    /// It must exist, carry the document's code and still be live
    /// (`reserved` or `confirmed`).
    pub(crate) async fn reference(&mut self, document: &DocumentRef) -> DbResult<()> {
        let Some(reservation_id) = document.reservation_id else {
            return Ok(());
        };

        let conflict = || CoreError::ReferentialConflict {
            code: document.code.clone(),
        };

        let row = sequence::get(&mut self.tx, reservation_id)
            .await?
            .ok_or_else(conflict)?;
        if row.code != document.code || row.status == SequenceStatus::Available {
            return Err(conflict().into());
        }

        self.referenced.insert(reservation_id);
        Ok(())
    }

    /// Commits if every referenced reservation is confirmed; otherwise rolls
    /// back and fails with `ReferentialConflict`.
    pub async fn commit(mut self) -> DbResult<()> {
        for reservation_id in &self.referenced {
            let row = sequence::get(&mut self.tx, *reservation_id).await?;
            let unconfirmed = match row {
                Some(row) if row.status == SequenceStatus::Confirmed => None,
                Some(row) => Some(row.code),
                None => Some(reservation_id.to_string()),
            };

            if let Some(code) = unconfirmed {
                warn!(work_unit_id = %self.id, %code, "Unconfirmed document reference, rolling back");
                self.tx.rollback().await?;
                return Err(CoreError::ReferentialConflict { code }.into());
            }
        }

        let UnitOfWork { id, tx, locks, .. } = self;
        tx.commit().await?;
        drop(locks);

        debug!(work_unit_id = %id, "Unit of work committed");
        Ok(())
    }

    /// Rolls back and returns attached reservations to `available`.
    ///
    /// Release failures are logged; the first one is returned after every
    /// reservation was tried.
    pub async fn abort(self) -> DbResult<()> {
        let UnitOfWork {
            id,
            tx,
            locks,
            pool,
            clock,
            attached,
            ..
        } = self;

        tx.rollback().await?;
        info!(work_unit_id = %id, released = attached.len(), "Unit of work aborted");

        let mut first_error = None;
        if !attached.is_empty() {
            let mut conn = pool.acquire().await?;
            for handle in &attached {
                if let Err(err) = sequence::release(&mut conn, handle, clock.now()).await {
                    warn!(code = %handle.code, error = %err, "Failed to release reservation");
                    first_error.get_or_insert(err);
                }
            }
        }
        drop(locks);

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use crate::pool::DbConfig;
    use chrono::TimeZone;
    use stockbook_core::Location;

    async fn setup() -> (Database, ReservationHandle) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let hq = db.locations().create_branch("HQ", "Head Office").await.unwrap();
        let when = Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap();
        let handle = db
            .sequences()
            .reserve("Goods Receipt", Location::Branch(hq.id), when, "clerk-1")
            .await
            .unwrap();
        (db, handle)
    }

    #[test]
    fn test_plan_orders_sequence_keys_first() {
        let scope = SequenceScope {
            prefix_id: 9,
            branch_id: 9,
            period: stockbook_core::Period { month: 12, year: 2030 },
        };
        let plan = WorkPlan::new()
            .stock(1, Location::Branch(1))
            .sequence(scope)
            .stock(1, Location::Branch(1));

        let keys: Vec<_> = plan.keys().copied().collect();
        assert_eq!(keys, vec![LockKey::Sequence(scope), LockKey::stock(1, Location::Branch(1))]);
    }

    #[tokio::test]
    async fn test_confirm_requires_declared_scope() {
        let (db, handle) = setup().await;

        let mut uow = db.begin_work(WorkPlan::new()).await.unwrap();
        assert!(matches!(
            uow.confirm(&handle).await,
            Err(DbError::Domain(CoreError::LockNotHeld { .. }))
        ));
    }

    #[tokio::test]
    async fn test_commit_confirms_and_releases_locks() {
        let (db, handle) = setup().await;

        let mut uow = db
            .begin_work(WorkPlan::new().sequence(handle.scope))
            .await
            .unwrap();
        assert!(uow.holds(&LockKey::Sequence(handle.scope)));
        uow.confirm(&handle).await.unwrap();
        uow.commit().await.unwrap();

        let row = db.sequences().get(handle.reservation_id).await.unwrap();
        assert_eq!(row.status, SequenceStatus::Confirmed);
        assert_eq!(db.locks().tracked(), 0);
    }

    #[tokio::test]
    async fn test_dropped_unit_rolls_back() {
        let (db, handle) = setup().await;

        {
            let mut uow = db
                .begin_work(WorkPlan::new().sequence(handle.scope))
                .await
                .unwrap();
            uow.confirm(&handle).await.unwrap();
        }

        let row = db.sequences().get(handle.reservation_id).await.unwrap();
        assert_eq!(row.status, SequenceStatus::Reserved);
    }

    #[tokio::test]
    async fn test_abort_releases_attached_reservations() {
        let (db, handle) = setup().await;

        let mut uow = db
            .begin_work(WorkPlan::new().sequence(handle.scope))
            .await
            .unwrap();
        uow.confirm(&handle).await.unwrap();
        uow.abort().await.unwrap();

        let row = db.sequences().get(handle.reservation_id).await.unwrap();
        assert_eq!(row.status, SequenceStatus::Available);
        assert!(row.released_at.is_some());
    }

    #[tokio::test]
    async fn test_reference_to_released_reservation_conflicts() {
        let (db, handle) = setup().await;
        db.sequences().release(&handle).await.unwrap();

        let mut uow = db.begin_work(WorkPlan::new()).await.unwrap();
        assert!(matches!(
            uow.reference(&handle.document_ref()).await,
            Err(DbError::Domain(CoreError::ReferentialConflict { .. }))
        ));
    }

    #[tokio::test]
    async fn test_commit_rejects_unconfirmed_reference() {
        let (db, handle) = setup().await;

        let mut uow = db.begin_work(WorkPlan::new()).await.unwrap();
        uow.reference(&handle.document_ref()).await.unwrap();
        assert!(matches!(
            uow.commit().await,
            Err(DbError::Domain(CoreError::ReferentialConflict { code })) if code == handle.code
        ));
    }
}
