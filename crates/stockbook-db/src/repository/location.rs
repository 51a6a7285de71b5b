//! # Location Repository
//!
//! Branches, warehouses, and the Location Resolver.
//!
//! ## Resolution
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  resolve("warehouse", 4)                                               │
//! │       │                                                                 │
//! │       ├── kind not in {branch, warehouse} → UnknownLocationKind        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Location::Warehouse(4) ──► SELECT … FROM warehouses WHERE id = 4      │
//! │       │                                                                 │
//! │       ├── no row → UnknownLocation                                     │
//! │       ▼                                                                 │
//! │  LocationRef { location, code: "WH-EAST", name, branch_id: 1 }         │
//! │                                                                         │
//! │  The owning branch is what scopes document numbers issued there.      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use stockbook_core::validation::{validate_location_code, validate_name};
use stockbook_core::{Branch, CoreError, Location, LocationRef, Warehouse};

/// Repository for branches and warehouses.
#[derive(Debug, Clone)]
pub struct LocationRepository {
    pool: SqlitePool,
}

impl LocationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        LocationRepository { pool }
    }

    /// Resolves an untyped `(kind, id)` pair from a collaborator.
    pub async fn resolve(&self, kind: &str, id: i64) -> DbResult<LocationRef> {
        let location = Location::parse(kind, id)?;
        self.resolve_location(location).await
    }

    /// Resolves a typed location.
    pub async fn resolve_location(&self, location: Location) -> DbResult<LocationRef> {
        let mut conn = self.pool.acquire().await?;
        resolve(&mut conn, location).await
    }

    pub async fn create_branch(&self, code: &str, name: &str) -> DbResult<Branch> {
        validate_location_code(code)?;
        validate_name("branch name", name)?;

        let branch = sqlx::query_as::<_, Branch>(
            "INSERT INTO branches (code, name) VALUES (?1, ?2) RETURNING id, code, name",
        )
        .bind(code.trim())
        .bind(name.trim())
        .fetch_one(&self.pool)
        .await?;

        debug!(id = branch.id, code = %branch.code, "Branch created");
        Ok(branch)
    }

    pub async fn create_warehouse(&self, branch_id: i64, code: &str, name: &str) -> DbResult<Warehouse> {
        validate_location_code(code)?;
        validate_name("warehouse name", name)?;

        let warehouse = sqlx::query_as::<_, Warehouse>(
            r#"
            INSERT INTO warehouses (branch_id, code, name)
            VALUES (?1, ?2, ?3)
            RETURNING id, branch_id, code, name
            "#,
        )
        .bind(branch_id)
        .bind(code.trim())
        .bind(name.trim())
        .fetch_one(&self.pool)
        .await?;

        debug!(id = warehouse.id, branch_id, code = %warehouse.code, "Warehouse created");
        Ok(warehouse)
    }

    pub async fn branches(&self) -> DbResult<Vec<Branch>> {
        let branches = sqlx::query_as::<_, Branch>("SELECT id, code, name FROM branches ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(branches)
    }

    pub async fn warehouses(&self, branch_id: i64) -> DbResult<Vec<Warehouse>> {
        let warehouses = sqlx::query_as::<_, Warehouse>(
            "SELECT id, branch_id, code, name FROM warehouses WHERE branch_id = ?1 ORDER BY id",
        )
        .bind(branch_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(warehouses)
    }
}

/// Resolves `location` on an open connection or transaction.
pub(crate) async fn resolve(conn: &mut SqliteConnection, location: Location) -> DbResult<LocationRef> {
    let resolved = match location {
        Location::Branch(id) => sqlx::query_as::<_, Branch>(
            "SELECT id, code, name FROM branches WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .map(|b| LocationRef {
            location,
            code: b.code,
            name: b.name,
            branch_id: b.id,
        }),

        Location::Warehouse(id) => sqlx::query_as::<_, Warehouse>(
            "SELECT id, branch_id, code, name FROM warehouses WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .map(|w| LocationRef {
            location,
            code: w.code,
            name: w.name,
            branch_id: w.branch_id,
        }),
    };

    Ok(resolved.ok_or(CoreError::UnknownLocation(location))?)
}

/// The branch whose code goes into document numbers.
pub(crate) async fn branch(conn: &mut SqliteConnection, id: i64) -> DbResult<Branch> {
    let branch = sqlx::query_as::<_, Branch>("SELECT id, code, name FROM branches WHERE id = ?1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(branch.ok_or(CoreError::UnknownLocation(Location::Branch(id)))?)
}

#[cfg(test)]
mod tests {
    use crate::error::DbError;
    use crate::pool::{Database, DbConfig};
    use stockbook_core::{CoreError, Location};

    #[tokio::test]
    async fn test_resolve_branch_and_warehouse() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.locations();

        let hq = repo.create_branch("HQ", "Head Office").await.unwrap();
        let east = repo.create_warehouse(hq.id, "WH-EAST", "East Depot").await.unwrap();

        let branch_ref = repo.resolve("branch", hq.id).await.unwrap();
        assert_eq!(branch_ref.location, Location::Branch(hq.id));
        assert_eq!(branch_ref.branch_id, hq.id);
        assert_eq!(branch_ref.code, "HQ");

        let warehouse_ref = repo.resolve("Warehouse", east.id).await.unwrap();
        assert_eq!(warehouse_ref.location, Location::Warehouse(east.id));
        assert_eq!(warehouse_ref.branch_id, hq.id);
        assert_eq!(warehouse_ref.name, "East Depot");
    }

    #[tokio::test]
    async fn test_resolve_rejects_unknown_kind_and_id() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.locations();

        assert!(matches!(
            repo.resolve("shop", 1).await,
            Err(DbError::Domain(CoreError::UnknownLocationKind(_)))
        ));
        assert!(matches!(
            repo.resolve("branch", 99).await,
            Err(DbError::Domain(CoreError::UnknownLocation(Location::Branch(99))))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_branch_code() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.locations();

        repo.create_branch("HQ", "Head Office").await.unwrap();
        assert!(matches!(
            repo.create_branch("HQ", "Again").await,
            Err(DbError::UniqueViolation { .. })
        ));
    }
}
