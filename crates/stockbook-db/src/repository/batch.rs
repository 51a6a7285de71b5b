//! # Batch Store
//!
//! Cost-homogeneous lots of one item at one location.
//!
//! ## FIFO Contract
//! ```text
//! consumable(item 7, branch:1)
//!
//!   SELECT … WHERE remaining_quantity > 0
//!   ORDER BY received_at ASC, id ASC
//!            ───────────       ──
//!            oldest first      ties: insertion order
//! ```
//!
//! Only `remaining_quantity` is ever updated; the schema rejects changes to
//! any other column and rejects deletes.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};

use crate::error::{DbError, DbResult};
use stockbook_core::{ItemBatch, Location, LocationKind, Money};

const BATCH_COLUMNS: &str = "id, item_id, location_kind, location_id, received_at, unit_cost_cents, \
     opening_quantity, remaining_quantity, created_at";

#[derive(Debug, FromRow)]
struct BatchRow {
    id: i64,
    item_id: i64,
    location_kind: LocationKind,
    location_id: i64,
    received_at: DateTime<Utc>,
    unit_cost_cents: Money,
    opening_quantity: i64,
    remaining_quantity: i64,
    created_at: DateTime<Utc>,
}

impl From<BatchRow> for ItemBatch {
    fn from(row: BatchRow) -> Self {
        ItemBatch {
            id: row.id,
            item_id: row.item_id,
            location: Location::new(row.location_kind, row.location_id),
            received_at: row.received_at,
            unit_cost: row.unit_cost_cents,
            opening_quantity: row.opening_quantity,
            remaining_quantity: row.remaining_quantity,
            created_at: row.created_at,
        }
    }
}

/// Read access to batches outside a unit of work.
#[derive(Debug, Clone)]
pub struct BatchStore {
    pool: SqlitePool,
}

impl BatchStore {
    pub fn new(pool: SqlitePool) -> Self {
        BatchStore { pool }
    }

    pub async fn get(&self, id: i64) -> DbResult<ItemBatch> {
        let mut conn = self.pool.acquire().await?;
        get(&mut conn, id)
            .await?
            .ok_or_else(|| DbError::not_found("Batch", id))
    }

    /// Batches with stock left, oldest first.
    pub async fn consumable(&self, item_id: i64, location: Location) -> DbResult<Vec<ItemBatch>> {
        let mut conn = self.pool.acquire().await?;
        consumable(&mut conn, item_id, location).await
    }

    /// Every batch ever opened for the pair, exhausted ones included.
    pub async fn history(&self, item_id: i64, location: Location) -> DbResult<Vec<ItemBatch>> {
        let sql = format!(
            "SELECT {} FROM item_batches \
             WHERE item_id = ?1 AND location_kind = ?2 AND location_id = ?3 \
             ORDER BY received_at ASC, id ASC",
            BATCH_COLUMNS
        );
        let rows = sqlx::query_as::<_, BatchRow>(&sql)
            .bind(item_id)
            .bind(location.kind())
            .bind(location.id())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(ItemBatch::from).collect())
    }

    /// Unit cost of the most recently received batch at the location.
    pub async fn last_unit_cost(&self, item_id: i64, location: Location) -> DbResult<Option<Money>> {
        let mut conn = self.pool.acquire().await?;
        last_unit_cost(&mut conn, item_id, location).await
    }
}

pub(crate) async fn get(conn: &mut SqliteConnection, id: i64) -> DbResult<Option<ItemBatch>> {
    let sql = format!("SELECT {} FROM item_batches WHERE id = ?1", BATCH_COLUMNS);
    let row = sqlx::query_as::<_, BatchRow>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.map(ItemBatch::from))
}

pub(crate) async fn consumable(
    conn: &mut SqliteConnection,
    item_id: i64,
    location: Location,
) -> DbResult<Vec<ItemBatch>> {
    let sql = format!(
        "SELECT {} FROM item_batches \
         WHERE item_id = ?1 AND location_kind = ?2 AND location_id = ?3 \
           AND remaining_quantity > 0 \
         ORDER BY received_at ASC, id ASC",
        BATCH_COLUMNS
    );
    let rows = sqlx::query_as::<_, BatchRow>(&sql)
        .bind(item_id)
        .bind(location.kind())
        .bind(location.id())
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows.into_iter().map(ItemBatch::from).collect())
}

/// Opens a batch with `remaining = opening = quantity`.
pub(crate) async fn open(
    conn: &mut SqliteConnection,
    item_id: i64,
    location: Location,
    received_at: DateTime<Utc>,
    unit_cost: Money,
    quantity: i64,
    now: DateTime<Utc>,
) -> DbResult<ItemBatch> {
    let sql = format!(
        "INSERT INTO item_batches \
             (item_id, location_kind, location_id, received_at, unit_cost_cents, \
              opening_quantity, remaining_quantity, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?7) \
         RETURNING {}",
        BATCH_COLUMNS
    );
    let row = sqlx::query_as::<_, BatchRow>(&sql)
        .bind(item_id)
        .bind(location.kind())
        .bind(location.id())
        .bind(received_at)
        .bind(unit_cost)
        .bind(quantity)
        .bind(now)
        .fetch_one(&mut *conn)
        .await?;
    Ok(row.into())
}

/// Moves a batch's remaining quantity from `previous` to `after`.
///
/// The `previous` guard turns any drift between plan and row into an error
/// instead of a silent overwrite.
pub(crate) async fn set_remaining(
    conn: &mut SqliteConnection,
    id: i64,
    previous: i64,
    after: i64,
) -> DbResult<()> {
    let result = sqlx::query(
        "UPDATE item_batches SET remaining_quantity = ?1 \
         WHERE id = ?2 AND remaining_quantity = ?3",
    )
    .bind(after)
    .bind(id)
    .bind(previous)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() != 1 {
        return Err(DbError::TransactionFailed(format!(
            "batch {} no longer holds {} units",
            id, previous
        )));
    }
    Ok(())
}

pub(crate) async fn last_unit_cost(
    conn: &mut SqliteConnection,
    item_id: i64,
    location: Location,
) -> DbResult<Option<Money>> {
    let cost = sqlx::query_scalar::<_, Money>(
        "SELECT unit_cost_cents FROM item_batches \
         WHERE item_id = ?1 AND location_kind = ?2 AND location_id = ?3 \
         ORDER BY received_at DESC, id DESC LIMIT 1",
    )
    .bind(item_id)
    .bind(location.kind())
    .bind(location.id())
    .fetch_optional(&mut *conn)
    .await?;
    Ok(cost)
}

/// Σ remaining over the pair's batches.
pub(crate) async fn on_hand(
    conn: &mut SqliteConnection,
    item_id: i64,
    location: Location,
) -> DbResult<i64> {
    let total: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(remaining_quantity), 0) FROM item_batches \
         WHERE item_id = ?1 AND location_kind = ?2 AND location_id = ?3",
    )
    .bind(item_id)
    .bind(location.kind())
    .bind(location.id())
    .fetch_one(&mut *conn)
    .await?;
    Ok(total)
}
