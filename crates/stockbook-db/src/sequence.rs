//! # Sequence Allocator
//!
//! Issues document numbers per (prefix, branch, month, year).
//!
//! ## Reserve Flow
//! ```text
//! reserve("Goods Receipt", Warehouse(3), 2026-10-19, "clerk-7")
//!      │
//!      ├── prefix "Goods Receipt" → GR          (UnknownDocumentType)
//!      ├── Warehouse(3) → owning branch HQ      (UnknownLocation)
//!      │
//!      ▼   scope = (GR, HQ, 10, 2026)
//! ┌────────────────────────────────────────────┐
//! │ lock scope (bounded wait)                  │ ◄── retried with backoff
//! │ BEGIN                                      │     on ScopeLocked / busy
//! │   [dense] reclaim expired, reissue lowest  │
//! │   upsert counter RETURNING last_number     │
//! │   INSERT reservation (reserved, expiry)    │
//! │ COMMIT                                     │
//! └────────────────────────────────────────────┘
//!      │
//!      ▼
//! ReservationHandle { code: "GR-HQ-1026-0005", .. }
//! ```
//!
//! The reservation is confirmed later inside the unit of work that writes
//! the document ([`UnitOfWork::confirm`](crate::unit_of_work::UnitOfWork::confirm)),
//! or released if the document is abandoned.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use stockbook_core::validation::validate_holder;
use stockbook_core::{
    Branch, DocumentPrefix, Location, Period, ReservationHandle, SequenceReservation,
    SequenceScope,
};

use crate::error::{DbError, DbResult};
use crate::locks::LockKey;
use crate::pool::Database;
use crate::repository::{location, prefix, sequence};
use crate::retry::retry_transient;
use crate::unit_of_work::WorkPlan;

/// Document number allocator. Obtained from [`Database::sequences`].
#[derive(Debug, Clone)]
pub struct SequenceAllocator {
    db: Database,
}

impl SequenceAllocator {
    pub(crate) fn new(db: Database) -> Self {
        SequenceAllocator { db }
    }

    /// Resolves the prefix and the branch a location numbers under.
    async fn resolve_scope(
        &self,
        document_type: &str,
        location: Location,
        when: DateTime<Utc>,
    ) -> DbResult<(DocumentPrefix, Branch, SequenceScope)> {
        let mut conn = self.db.pool().acquire().await?;
        let prefix = prefix::by_document_type(&mut conn, document_type).await?;
        let resolved = location::resolve(&mut conn, location).await?;
        let branch = location::branch(&mut conn, resolved.branch_id).await?;

        let scope = SequenceScope {
            prefix_id: prefix.id,
            branch_id: branch.id,
            period: Period::of(when),
        };
        Ok((prefix, branch, scope))
    }

    /// The scope a document of this type, issued at `location` on `when`,
    /// numbers in.
    pub async fn scope_for(
        &self,
        document_type: &str,
        location: Location,
        when: DateTime<Utc>,
    ) -> DbResult<SequenceScope> {
        let (_, _, scope) = self.resolve_scope(document_type, location, when).await?;
        Ok(scope)
    }

    /// Reserves the next number of the scope.
    ///
    /// `when` selects the period; the expiry is measured from the clock.
    pub async fn reserve(
        &self,
        document_type: &str,
        location: Location,
        when: DateTime<Utc>,
        holder: &str,
    ) -> DbResult<ReservationHandle> {
        validate_holder(holder)?;
        let settings = self.db.settings();
        let format = settings.sequence.code_format()?;
        let ttl = settings.sequence.reservation_ttl();
        let dense = settings.sequence.reuse_released_numbers;

        let (prefix, branch, scope) = self.resolve_scope(document_type, location, when).await?;
        let holder = holder.trim();

        let db = &self.db;
        let prefix = &prefix;
        let branch = &branch;

        let reservation = retry_transient(&settings.locking, "reserve", move || async move {
            let _held = db
                .locks()
                .acquire([LockKey::Sequence(scope)], settings.locking.lock_wait())
                .await?;

            let now = db.clock().now();
            let expires_at = now + ttl;
            let mut tx = db.pool().begin().await?;

            let mut reissued = None;
            if dense {
                let reclaimed = sequence::reclaim_expired(&mut tx, Some(&scope), now).await?;
                if reclaimed > 0 {
                    debug!(%scope, reclaimed, "Reclaimed expired reservations before reserving");
                }
                if let Some(counter) = sequence::find_counter(&mut tx, &scope).await? {
                    if let Some(row) = sequence::lowest_available(&mut tx, counter.id).await? {
                        reissued = Some(sequence::reissue(&mut tx, row.id, holder, expires_at).await?);
                    }
                }
            }

            let reservation = match reissued {
                Some(row) => row,
                None => {
                    let counter = sequence::next_number(&mut tx, &scope, now).await?;
                    let code = format.render(&prefix.code, &branch.code, scope.period, counter.last_number);
                    sequence::insert_reservation(
                        &mut tx,
                        counter.id,
                        holder,
                        counter.last_number,
                        &code,
                        expires_at,
                        now,
                    )
                    .await?
                }
            };

            tx.commit().await?;
            Ok(reservation)
        })
        .await?;

        info!(
            code = %reservation.code,
            holder,
            reissued = reservation.reissue_count > 0,
            "Document number reserved"
        );

        let expires_at = reservation
            .expires_at
            .ok_or_else(|| DbError::Internal(format!("reservation {} has no expiry", reservation.id)))?;

        Ok(ReservationHandle {
            reservation_id: reservation.id,
            counter_id: reservation.counter_id,
            scope,
            document_type: prefix.document_type.clone(),
            number: reservation.number,
            code: reservation.code,
            holder: reservation.holder,
            expires_at,
            reissue_count: reservation.reissue_count,
        })
    }

    /// Confirms a reservation in a unit of work of its own.
    ///
    /// Documents written through a unit of work confirm there instead, so
    /// the number and the movements commit together.
    pub async fn confirm(&self, handle: &ReservationHandle) -> DbResult<SequenceReservation> {
        let db = &self.db;
        let plan = &WorkPlan::new().sequence(handle.scope);

        retry_transient(&db.settings().locking, "confirm", move || async move {
            let mut uow = db.begin_work(plan.clone()).await?;
            let confirmed = uow.confirm(handle).await?;
            uow.commit().await?;
            Ok(confirmed)
        })
        .await
    }

    /// Returns a reserved number to `available`.
    ///
    /// ## Returns
    /// `false` when there was nothing to release (already released or
    /// reclaimed, or reissued to another holder).
    pub async fn release(&self, handle: &ReservationHandle) -> DbResult<bool> {
        let db = &self.db;
        let settings = db.settings();

        let released = retry_transient(&settings.locking, "release", move || async move {
            let _held = db
                .locks()
                .acquire([LockKey::Sequence(handle.scope)], settings.locking.lock_wait())
                .await?;
            let mut conn = db.pool().acquire().await?;
            sequence::release(&mut conn, handle, db.clock().now()).await
        })
        .await?;

        if released {
            info!(code = %handle.code, "Document number released");
        }
        Ok(released)
    }

    /// Flips expired reservations to `available`, in one scope or everywhere.
    ///
    /// Counters are never decremented: in the default mode the numbers stay
    /// as gaps.
    pub async fn reclaim_expired(&self, scope: Option<SequenceScope>) -> DbResult<u64> {
        let db = &self.db;
        let settings = db.settings();
        let scope = scope.as_ref();

        let reclaimed = retry_transient(&settings.locking, "reclaim_expired", move || async move {
            let _held = match scope {
                Some(scope) => Some(
                    db.locks()
                        .acquire([LockKey::Sequence(*scope)], settings.locking.lock_wait())
                        .await?,
                ),
                None => None,
            };
            let mut conn = db.pool().acquire().await?;
            sequence::reclaim_expired(&mut conn, scope, db.clock().now()).await
        })
        .await?;

        if reclaimed > 0 {
            info!(reclaimed, "Expired reservations reclaimed");
        }
        Ok(reclaimed)
    }

    pub async fn get(&self, reservation_id: i64) -> DbResult<SequenceReservation> {
        let mut conn = self.db.pool().acquire().await?;
        sequence::get(&mut conn, reservation_id)
            .await?
            .ok_or_else(|| DbError::not_found("Reservation", reservation_id))
    }

    /// Every reservation of a scope, by number.
    pub async fn reservations(&self, scope: &SequenceScope) -> DbResult<Vec<SequenceReservation>> {
        let mut conn = self.db.pool().acquire().await?;
        sequence::list_for_scope(&mut conn, scope).await
    }

    /// Highest number ever drawn in the scope (0 if none).
    pub async fn last_number(&self, scope: &SequenceScope) -> DbResult<i64> {
        let mut conn = self.db.pool().acquire().await?;
        Ok(sequence::find_counter(&mut conn, scope)
            .await?
            .map_or(0, |counter| counter.last_number))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
