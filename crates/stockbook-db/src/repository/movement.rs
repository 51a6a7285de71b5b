//! # Movement Log
//!
//! The append-only record of every ledger mutation. Rows are inserted by the
//! ledger inside a unit of work and read back for audit; the schema rejects
//! `UPDATE` and `DELETE`.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};

use crate::error::DbResult;
use stockbook_core::{Location, LocationKind, Money, MovementKind, StockMovement};

const MOVEMENT_COLUMNS: &str = "id, work_unit_id, batch_id, item_id, location_kind, location_id, kind, \
     previous_quantity, movement_quantity, after_quantity, unit_cost_cents, document_type, \
     document_code, reservation_id, occurred_at, recorded_at";

#[derive(Debug, FromRow)]
struct MovementRow {
    id: i64,
    work_unit_id: String,
    batch_id: i64,
    item_id: i64,
    location_kind: LocationKind,
    location_id: i64,
    kind: MovementKind,
    previous_quantity: i64,
    movement_quantity: i64,
    after_quantity: i64,
    unit_cost_cents: Money,
    document_type: String,
    document_code: String,
    reservation_id: Option<i64>,
    occurred_at: DateTime<Utc>,
    recorded_at: DateTime<Utc>,
}

impl From<MovementRow> for StockMovement {
    fn from(row: MovementRow) -> Self {
        StockMovement {
            id: row.id,
            work_unit_id: row.work_unit_id,
            batch_id: row.batch_id,
            item_id: row.item_id,
            location: Location::new(row.location_kind, row.location_id),
            kind: row.kind,
            previous_quantity: row.previous_quantity,
            movement_quantity: row.movement_quantity,
            after_quantity: row.after_quantity,
            unit_cost: row.unit_cost_cents,
            document_type: row.document_type,
            document_code: row.document_code,
            reservation_id: row.reservation_id,
            occurred_at: row.occurred_at,
            recorded_at: row.recorded_at,
        }
    }
}

/// A movement about to be appended.
#[derive(Debug, Clone)]
pub(crate) struct NewMovement<'a> {
    pub work_unit_id: &'a str,
    pub batch_id: i64,
    pub item_id: i64,
    pub location: Location,
    pub kind: MovementKind,
    pub previous_quantity: i64,
    pub movement_quantity: i64,
    pub after_quantity: i64,
    pub unit_cost: Money,
    pub document_type: &'a str,
    pub document_code: &'a str,
    pub reservation_id: Option<i64>,
    pub occurred_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
}

pub(crate) async fn append(conn: &mut SqliteConnection, movement: &NewMovement<'_>) -> DbResult<StockMovement> {
    let sql = format!(
        "INSERT INTO stock_movements \
             (work_unit_id, batch_id, item_id, location_kind, location_id, kind, \
              previous_quantity, movement_quantity, after_quantity, unit_cost_cents, \
              document_type, document_code, reservation_id, occurred_at, recorded_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15) \
         RETURNING {}",
        MOVEMENT_COLUMNS
    );
    let row = sqlx::query_as::<_, MovementRow>(&sql)
        .bind(movement.work_unit_id)
        .bind(movement.batch_id)
        .bind(movement.item_id)
        .bind(movement.location.kind())
        .bind(movement.location.id())
        .bind(movement.kind)
        .bind(movement.previous_quantity)
        .bind(movement.movement_quantity)
        .bind(movement.after_quantity)
        .bind(movement.unit_cost)
        .bind(movement.document_type)
        .bind(movement.document_code)
        .bind(movement.reservation_id)
        .bind(movement.occurred_at)
        .bind(movement.recorded_at)
        .fetch_one(&mut *conn)
        .await?;
    Ok(row.into())
}

pub(crate) async fn for_batch(conn: &mut SqliteConnection, batch_id: i64) -> DbResult<Vec<StockMovement>> {
    let sql = format!(
        "SELECT {} FROM stock_movements WHERE batch_id = ?1 ORDER BY id ASC",
        MOVEMENT_COLUMNS
    );
    let rows = sqlx::query_as::<_, MovementRow>(&sql)
        .bind(batch_id)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows.into_iter().map(StockMovement::from).collect())
}

/// Σ movement_quantity of the pair with `occurred_at <= at`.
pub(crate) async fn quantity_as_of(
    conn: &mut SqliteConnection,
    item_id: i64,
    location: Location,
    at: DateTime<Utc>,
) -> DbResult<i64> {
    let total: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(movement_quantity), 0) FROM stock_movements \
         WHERE item_id = ?1 AND location_kind = ?2 AND location_id = ?3 AND occurred_at <= ?4",
    )
    .bind(item_id)
    .bind(location.kind())
    .bind(location.id())
    .bind(at)
    .fetch_one(&mut *conn)
    .await?;
    Ok(total)
}

/// Read access to the movement log.
#[derive(Debug, Clone)]
pub struct MovementLog {
    pool: SqlitePool,
}

impl MovementLog {
    pub fn new(pool: SqlitePool) -> Self {
        MovementLog { pool }
    }

    /// Movements of one batch, in the order they were applied.
    pub async fn for_batch(&self, batch_id: i64) -> DbResult<Vec<StockMovement>> {
        let mut conn = self.pool.acquire().await?;
        for_batch(&mut conn, batch_id).await
    }

    /// Movements stamped with a document code.
    pub async fn for_document(&self, document_code: &str) -> DbResult<Vec<StockMovement>> {
        let sql = format!(
            "SELECT {} FROM stock_movements WHERE document_code = ?1 ORDER BY id ASC",
            MOVEMENT_COLUMNS
        );
        let rows = sqlx::query_as::<_, MovementRow>(&sql)
            .bind(document_code)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(StockMovement::from).collect())
    }

    /// Movements written by one unit of work.
    pub async fn for_work_unit(&self, work_unit_id: &str) -> DbResult<Vec<StockMovement>> {
        let sql = format!(
            "SELECT {} FROM stock_movements WHERE work_unit_id = ?1 ORDER BY id ASC",
            MOVEMENT_COLUMNS
        );
        let rows = sqlx::query_as::<_, MovementRow>(&sql)
            .bind(work_unit_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(StockMovement::from).collect())
    }

    /// Movements of an (item, location) pair, oldest first.
    pub async fn for_stock(&self, item_id: i64, location: Location) -> DbResult<Vec<StockMovement>> {
        let sql = format!(
            "SELECT {} FROM stock_movements \
             WHERE item_id = ?1 AND location_kind = ?2 AND location_id = ?3 \
             ORDER BY occurred_at ASC, id ASC",
            MOVEMENT_COLUMNS
        );
        let rows = sqlx::query_as::<_, MovementRow>(&sql)
            .bind(item_id)
            .bind(location.kind())
            .bind(location.id())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(StockMovement::from).collect())
    }

    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM stock_movements")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
