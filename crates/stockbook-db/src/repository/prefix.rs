//! # Document Prefix Repository
//!
//! Maps document-type names to the short codes their numbers start with.
//! A prefix is written once; the schema rejects any later update.

use sqlx::{SqliteConnection, SqlitePool};
use tracing::{info, warn};

use crate::config::PrefixSetting;
use crate::error::DbResult;
use stockbook_core::validation::{validate_document_type, validate_prefix_code};
use stockbook_core::{CoreError, DocumentPrefix};

/// Repository for document prefixes.
#[derive(Debug, Clone)]
pub struct PrefixRepository {
    pool: SqlitePool,
}

impl PrefixRepository {
    pub fn new(pool: SqlitePool) -> Self {
        PrefixRepository { pool }
    }

    /// Registers a prefix unless the document type already has one.
    ///
    /// ## Returns
    /// The stored prefix. If the document type was registered earlier with a
    /// different code, the stored code wins and a warning is logged.
    pub async fn register(&self, document_type: &str, code: &str) -> DbResult<DocumentPrefix> {
        validate_document_type(document_type)?;
        validate_prefix_code(code)?;

        let document_type = document_type.trim();
        let code = code.trim();

        sqlx::query(
            "INSERT INTO document_prefixes (document_type, code) VALUES (?1, ?2) \
             ON CONFLICT(document_type) DO NOTHING",
        )
        .bind(document_type)
        .bind(code)
        .execute(&self.pool)
        .await?;

        let mut conn = self.pool.acquire().await?;
        let stored = by_document_type(&mut conn, document_type).await?;
        if stored.code != code {
            warn!(
                document_type,
                configured = code,
                stored = %stored.code,
                "Prefix already registered with another code; keeping the stored one"
            );
        }
        Ok(stored)
    }

    /// Registers every configured prefix.
    pub async fn register_all(&self, prefixes: &[PrefixSetting]) -> DbResult<Vec<DocumentPrefix>> {
        let mut stored = Vec::with_capacity(prefixes.len());
        for prefix in prefixes {
            stored.push(self.register(&prefix.document_type, &prefix.code).await?);
        }
        info!(count = stored.len(), "Document prefixes registered");
        Ok(stored)
    }

    pub async fn get(&self, document_type: &str) -> DbResult<DocumentPrefix> {
        let mut conn = self.pool.acquire().await?;
        by_document_type(&mut conn, document_type).await
    }

    pub async fn list(&self) -> DbResult<Vec<DocumentPrefix>> {
        let prefixes = sqlx::query_as::<_, DocumentPrefix>(
            "SELECT id, document_type, code FROM document_prefixes ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(prefixes)
    }
}

/// Looks a prefix up by document-type name, failing with
/// `UnknownDocumentType`.
pub(crate) async fn by_document_type(
    conn: &mut SqliteConnection,
    document_type: &str,
) -> DbResult<DocumentPrefix> {
    let prefix = sqlx::query_as::<_, DocumentPrefix>(
        "SELECT id, document_type, code FROM document_prefixes WHERE document_type = ?1",
    )
    .bind(document_type.trim())
    .fetch_optional(&mut *conn)
    .await?;

    Ok(prefix.ok_or_else(|| CoreError::UnknownDocumentType(document_type.to_string()))?)
}

#[cfg(test)]
mod tests {
    use crate::error::DbError;
    use crate::pool::{Database, DbConfig};
    use stockbook_core::CoreError;

    #[tokio::test]
    async fn test_default_prefixes_are_registered() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let prefix = db.prefixes().get("Goods Receipt").await.unwrap();
        assert_eq!(prefix.code, "GR");
        assert_eq!(db.prefixes().list().await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_registered_prefix_is_not_changed() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let prefixes = db.prefixes();

        let credit = prefixes.register("Credit Note", "CN").await.unwrap();
        let again = prefixes.register("Credit Note", "CR").await.unwrap();
        assert_eq!(again.id, credit.id);
        assert_eq!(again.code, "CN");
    }

    #[tokio::test]
    async fn test_unknown_document_type() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        assert!(matches!(
            db.prefixes().get("Delivery Note").await,
            Err(DbError::Domain(CoreError::UnknownDocumentType(_)))
        ));
    }

    #[tokio::test]
    async fn test_prefix_code_is_unique_across_types() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        assert!(matches!(
            db.prefixes().register("Goods Return", "GR").await,
            Err(DbError::UniqueViolation { .. })
        ));
    }
}
