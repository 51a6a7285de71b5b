//! # Sequence Repository
//!
//! SQL for counters and reservations. Callers hold the scope lock and an
//! open transaction; nothing here locks on its own.
//!
//! ## Reservation Rows
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  sequence_counters                sequence_reservations                 │
//! │  ┌──────────────────────────┐     ┌───────────────────────────────────┐ │
//! │  │ GR / HQ / 10-2026        │     │ #1  confirmed                     │ │
//! │  │ last_number = 4          │──┬─►│ #2  available  (expired, gap)     │ │
//! │  └──────────────────────────┘  ├─►│ #3  confirmed                     │ │
//! │                                └─►│ #4  reserved   expires 09:15      │ │
//! │                                   └───────────────────────────────────┘ │
//! │                                                                         │
//! │  last_number never goes down; rows are never deleted.                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection};

use crate::error::{DbError, DbResult};
use stockbook_core::{
    CoreError, ReservationHandle, SequenceReservation, SequenceScope, SequenceStatus,
};

const RESERVATION_COLUMNS: &str = "id, counter_id, holder, number, code, status, expires_at, \
     created_at, confirmed_at, released_at, reissue_count";

/// A counter row as returned by the upsert.
#[derive(Debug, Clone, Copy, FromRow)]
pub(crate) struct CounterRow {
    pub id: i64,
    pub last_number: i64,
}

/// Atomically creates-or-increments the scope's counter.
///
/// One statement: the counter row is created at 1 in a new scope, otherwise
/// incremented, and the new value returned.
pub(crate) async fn next_number(
    conn: &mut SqliteConnection,
    scope: &SequenceScope,
    now: DateTime<Utc>,
) -> DbResult<CounterRow> {
    let row = sqlx::query_as::<_, CounterRow>(
        r#"
        INSERT INTO sequence_counters
            (prefix_id, branch_id, period_month, period_year, last_number, updated_at)
        VALUES (?1, ?2, ?3, ?4, 1, ?5)
        ON CONFLICT (prefix_id, branch_id, period_month, period_year)
        DO UPDATE SET last_number = last_number + 1, updated_at = excluded.updated_at
        RETURNING id, last_number
        "#,
    )
    .bind(scope.prefix_id)
    .bind(scope.branch_id)
    .bind(scope.period.month)
    .bind(scope.period.year)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;

    Ok(row)
}

/// The scope's counter, if any number was ever drawn in it.
pub(crate) async fn find_counter(
    conn: &mut SqliteConnection,
    scope: &SequenceScope,
) -> DbResult<Option<CounterRow>> {
    let row = sqlx::query_as::<_, CounterRow>(
        r#"
        SELECT id, last_number FROM sequence_counters
        WHERE prefix_id = ?1 AND branch_id = ?2 AND period_month = ?3 AND period_year = ?4
        "#,
    )
    .bind(scope.prefix_id)
    .bind(scope.branch_id)
    .bind(scope.period.month)
    .bind(scope.period.year)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row)
}

pub(crate) async fn insert_reservation(
    conn: &mut SqliteConnection,
    counter_id: i64,
    holder: &str,
    number: i64,
    code: &str,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> DbResult<SequenceReservation> {
    let sql = format!(
        "INSERT INTO sequence_reservations \
             (counter_id, holder, number, code, status, expires_at, created_at) \
         VALUES (?1, ?2, ?3, ?4, 'reserved', ?5, ?6) \
         RETURNING {}",
        RESERVATION_COLUMNS
    );
    let row = sqlx::query_as::<_, SequenceReservation>(&sql)
        .bind(counter_id)
        .bind(holder)
        .bind(number)
        .bind(code)
        .bind(expires_at)
        .bind(now)
        .fetch_one(&mut *conn)
        .await?;

    Ok(row)
}

pub(crate) async fn get(conn: &mut SqliteConnection, id: i64) -> DbResult<Option<SequenceReservation>> {
    let sql = format!("SELECT {} FROM sequence_reservations WHERE id = ?1", RESERVATION_COLUMNS);
    let row = sqlx::query_as::<_, SequenceReservation>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row)
}

async fn get_for_handle(
    conn: &mut SqliteConnection,
    handle: &ReservationHandle,
) -> DbResult<SequenceReservation> {
    get(conn, handle.reservation_id)
        .await?
        .ok_or_else(|| DbError::not_found("Reservation", handle.reservation_id))
}

/// `reserved → confirmed`.
///
/// Idempotent for a reservation this handle already confirmed. An expired,
/// released or reissued reservation fails with `ReservationExpired`.
pub(crate) async fn confirm(
    conn: &mut SqliteConnection,
    handle: &ReservationHandle,
    now: DateTime<Utc>,
) -> DbResult<SequenceReservation> {
    let row = get_for_handle(conn, handle).await?;
    let expired = || CoreError::ReservationExpired {
        code: handle.code.clone(),
    };

    if row.reissue_count != handle.reissue_count {
        return Err(expired().into());
    }

    match row.status {
        SequenceStatus::Confirmed => Ok(row),
        SequenceStatus::Available => Err(expired().into()),
        SequenceStatus::Reserved => {
            if row.expires_at.map_or(false, |at| at <= now) {
                return Err(expired().into());
            }

            let sql = format!(
                "UPDATE sequence_reservations \
                 SET status = 'confirmed', confirmed_at = ?1 \
                 WHERE id = ?2 AND status = 'reserved' AND reissue_count = ?3 \
                 RETURNING {}",
                RESERVATION_COLUMNS
            );
            let confirmed = sqlx::query_as::<_, SequenceReservation>(&sql)
                .bind(now)
                .bind(handle.reservation_id)
                .bind(handle.reissue_count)
                .fetch_optional(&mut *conn)
                .await?;

            Ok(confirmed.ok_or_else(expired)?)
        }
    }
}

/// `reserved → available`.
///
/// Returns `false` when there was nothing to release (already available, or
/// the number now belongs to a newer reservation). A confirmed reservation
/// fails with `ReservationAlreadyConfirmed`.
pub(crate) async fn release(
    conn: &mut SqliteConnection,
    handle: &ReservationHandle,
    now: DateTime<Utc>,
) -> DbResult<bool> {
    let row = get_for_handle(conn, handle).await?;

    if row.reissue_count != handle.reissue_count {
        return Ok(false);
    }

    match row.status {
        SequenceStatus::Confirmed => Err(CoreError::ReservationAlreadyConfirmed {
            code: handle.code.clone(),
        }
        .into()),
        SequenceStatus::Available => Ok(false),
        SequenceStatus::Reserved => {
            let result = sqlx::query(
                "UPDATE sequence_reservations \
                 SET status = 'available', released_at = ?1 \
                 WHERE id = ?2 AND status = 'reserved' AND reissue_count = ?3",
            )
            .bind(now)
            .bind(handle.reservation_id)
            .bind(handle.reissue_count)
            .execute(&mut *conn)
            .await?;
            Ok(result.rows_affected() == 1)
        }
    }
}

/// Flips expired `reserved` rows to `available`, optionally within one
/// scope. Counters are not touched.
pub(crate) async fn reclaim_expired(
    conn: &mut SqliteConnection,
    scope: Option<&SequenceScope>,
    now: DateTime<Utc>,
) -> DbResult<u64> {
    let result = match scope {
        None => {
            sqlx::query(
                "UPDATE sequence_reservations \
                 SET status = 'available', released_at = ?1 \
                 WHERE status = 'reserved' AND expires_at <= ?1",
            )
            .bind(now)
            .execute(&mut *conn)
            .await?
        }
        Some(scope) => {
            sqlx::query(
                r#"
                UPDATE sequence_reservations
                SET status = 'available', released_at = ?1
                WHERE status = 'reserved' AND expires_at <= ?1
                  AND counter_id IN (
                      SELECT id FROM sequence_counters
                      WHERE prefix_id = ?2 AND branch_id = ?3
                        AND period_month = ?4 AND period_year = ?5
                  )
                "#,
            )
            .bind(now)
            .bind(scope.prefix_id)
            .bind(scope.branch_id)
            .bind(scope.period.month)
            .bind(scope.period.year)
            .execute(&mut *conn)
            .await?
        }
    };

    Ok(result.rows_affected())
}

/// Lowest `available` number of a counter (dense mode).
pub(crate) async fn lowest_available(
    conn: &mut SqliteConnection,
    counter_id: i64,
) -> DbResult<Option<SequenceReservation>> {
    let sql = format!(
        "SELECT {} FROM sequence_reservations \
         WHERE counter_id = ?1 AND status = 'available' \
         ORDER BY number ASC LIMIT 1",
        RESERVATION_COLUMNS
    );
    let row = sqlx::query_as::<_, SequenceReservation>(&sql)
        .bind(counter_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row)
}

/// Hands an `available` row out again (dense mode).
pub(crate) async fn reissue(
    conn: &mut SqliteConnection,
    id: i64,
    holder: &str,
    expires_at: DateTime<Utc>,
) -> DbResult<SequenceReservation> {
    let sql = format!(
        "UPDATE sequence_reservations \
         SET status = 'reserved', holder = ?1, expires_at = ?2, \
             reissue_count = reissue_count + 1 \
         WHERE id = ?3 AND status = 'available' \
         RETURNING {}",
        RESERVATION_COLUMNS
    );
    let row = sqlx::query_as::<_, SequenceReservation>(&sql)
        .bind(holder)
        .bind(expires_at)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    row.ok_or_else(|| DbError::TransactionFailed(format!("reservation {} is no longer available", id)))
}

/// Every reservation of a scope, by number.
pub(crate) async fn list_for_scope(
    conn: &mut SqliteConnection,
    scope: &SequenceScope,
) -> DbResult<Vec<SequenceReservation>> {
    let sql = format!(
        r#"
        SELECT {} FROM sequence_reservations
        WHERE counter_id = (
            SELECT id FROM sequence_counters
            WHERE prefix_id = ?1 AND branch_id = ?2 AND period_month = ?3 AND period_year = ?4
        )
        ORDER BY number ASC
        "#,
        RESERVATION_COLUMNS
    );
    let rows = sqlx::query_as::<_, SequenceReservation>(&sql)
        .bind(scope.prefix_id)
        .bind(scope.branch_id)
        .bind(scope.period.month)
        .bind(scope.period.year)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows)
}
