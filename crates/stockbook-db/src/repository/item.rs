//! # Item Repository
//!
//! Stock-keeping items. The ledger only needs to know that an item exists
//! and what its standard cost is.

use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use stockbook_core::validation::{validate_name, validate_sku, validate_unit_cost};
use stockbook_core::{CoreError, Item, Money};

/// Repository for items.
#[derive(Debug, Clone)]
pub struct ItemRepository {
    pool: SqlitePool,
}

impl ItemRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ItemRepository { pool }
    }

    pub async fn create(&self, sku: &str, name: &str, standard_cost: Money) -> DbResult<Item> {
        validate_sku(sku)?;
        validate_name("item name", name)?;
        validate_unit_cost(standard_cost.cents())?;

        let item = sqlx::query_as::<_, Item>(
            r#"
            INSERT INTO items (sku, name, standard_cost_cents)
            VALUES (?1, ?2, ?3)
            RETURNING id, sku, name, standard_cost_cents
            "#,
        )
        .bind(sku.trim())
        .bind(name.trim())
        .bind(standard_cost)
        .fetch_one(&self.pool)
        .await?;

        debug!(id = item.id, sku = %item.sku, "Item created");
        Ok(item)
    }

    pub async fn get(&self, id: i64) -> DbResult<Item> {
        let mut conn = self.pool.acquire().await?;
        get(&mut conn, id).await
    }

    pub async fn get_by_sku(&self, sku: &str) -> DbResult<Option<Item>> {
        let item = sqlx::query_as::<_, Item>(
            "SELECT id, sku, name, standard_cost_cents FROM items WHERE sku = ?1",
        )
        .bind(sku.trim())
        .fetch_optional(&self.pool)
        .await?;
        Ok(item)
    }
}

/// Fetches an item or fails with `UnknownItem`.
pub(crate) async fn get(conn: &mut SqliteConnection, id: i64) -> DbResult<Item> {
    let item = sqlx::query_as::<_, Item>(
        "SELECT id, sku, name, standard_cost_cents FROM items WHERE id = ?1",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(item.ok_or(CoreError::UnknownItem(id))?)
}

#[cfg(test)]
mod tests {
    use crate::error::DbError;
    use crate::pool::{Database, DbConfig};
    use stockbook_core::{CoreError, Money};

    #[tokio::test]
    async fn test_create_and_get_item() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let items = db.items();

        let bolt = items
            .create("BOLT-M8", "M8 hex bolt", Money::from_cents(45))
            .await
            .unwrap();
        assert_eq!(items.get(bolt.id).await.unwrap(), bolt);
        assert_eq!(items.get_by_sku("BOLT-M8").await.unwrap(), Some(bolt));

        assert!(matches!(
            items.get(999).await,
            Err(DbError::Domain(CoreError::UnknownItem(999)))
        ));
    }
}
