//! # Document Posting
//!
//! The whole life of a stock document in one call: number it, write its
//! lines, and either commit both or keep neither.
//!
//! ## Flow
//! ```text
//! post_document(PostDocument { "Waybill", Branch(1), lines })
//!      │
//!      ▼
//! sequences().reserve(..)            → WB-HQ-1026-0007 (reserved)
//!      │
//!      ▼  retried on ScopeLocked / busy
//! ┌─────────────────────────────────────────────┐
//! │ begin_work(scope + every (item, location))  │
//! │ confirm(WB-HQ-1026-0007)                    │
//! │ apply line 1, line 2, ...                   │
//! │ commit                                      │
//! └─────────────────────────────────────────────┘
//!      │
//!      ├── Ok  → PostedDocument
//!      └── Err → release WB-HQ-1026-0007, return the error
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use stockbook_core::{Location, Money, MovementKind, ReservationHandle, ValidationError};

use crate::error::DbResult;
use crate::ledger::{
    BalanceOutcome, BalanceRequest, MovementOutcome, MovementRequest, TransferOutcome,
    TransferRequest,
};
use crate::pool::Database;
use crate::retry::retry_transient;
use crate::unit_of_work::{UnitOfWork, WorkPlan};

/// One line of a stock document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DocumentLine {
    Movement {
        item_id: i64,
        location: Location,
        kind: MovementKind,
        quantity: i64,
        unit_cost: Option<Money>,
    },
    Transfer {
        item_id: i64,
        from: Location,
        to: Location,
        quantity: i64,
    },
    Balance {
        item_id: i64,
        location: Location,
        physical_quantity: i64,
        unit_cost: Option<Money>,
    },
}

impl DocumentLine {
    fn add_keys(&self, plan: WorkPlan) -> WorkPlan {
        match *self {
            DocumentLine::Movement { item_id, location, .. }
            | DocumentLine::Balance { item_id, location, .. } => plan.stock(item_id, location),
            DocumentLine::Transfer { item_id, from, to, .. } => {
                plan.stock(item_id, from).stock(item_id, to)
            }
        }
    }
}

/// A document to number and post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostDocument {
    pub document_type: String,
    /// Where the document is issued; selects the numbering branch.
    pub location: Location,
    pub holder: String,
    /// Document date; defaults to now. Also the effective time of its lines.
    pub effective_at: Option<DateTime<Utc>>,
    pub lines: Vec<DocumentLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LineOutcome {
    Movement(MovementOutcome),
    Transfer(TransferOutcome),
    Balance(BalanceOutcome),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostedDocument {
    pub code: String,
    pub reservation_id: i64,
    pub work_unit_id: String,
    pub lines: Vec<LineOutcome>,
}

async fn apply_lines(
    uow: &mut UnitOfWork,
    handle: &ReservationHandle,
    request: &PostDocument,
    effective_at: DateTime<Utc>,
) -> DbResult<Vec<LineOutcome>> {
    uow.confirm(handle).await?;

    let document = handle.document_ref();
    let mut outcomes = Vec::with_capacity(request.lines.len());

    for line in &request.lines {
        let outcome = match *line {
            DocumentLine::Movement {
                item_id,
                location,
                kind,
                quantity,
                unit_cost,
            } => {
                let movement = MovementRequest {
                    item_id,
                    location,
                    kind,
                    quantity,
                    document: document.clone(),
                    unit_cost,
                    effective_at: Some(effective_at),
                };
                LineOutcome::Movement(uow.apply_movement(&movement).await?)
            }
            DocumentLine::Transfer {
                item_id,
                from,
                to,
                quantity,
            } => {
                let transfer = TransferRequest {
                    item_id,
                    from,
                    to,
                    quantity,
                    document: document.clone(),
                    effective_at: Some(effective_at),
                };
                LineOutcome::Transfer(uow.transfer(&transfer).await?)
            }
            DocumentLine::Balance {
                item_id,
                location,
                physical_quantity,
                unit_cost,
            } => {
                let balance = BalanceRequest {
                    item_id,
                    location,
                    physical_quantity,
                    document: document.clone(),
                    unit_cost,
                    effective_at: Some(effective_at),
                };
                LineOutcome::Balance(uow.balance(&balance).await?)
            }
        };
        outcomes.push(outcome);
    }

    Ok(outcomes)
}

impl Database {
    /// Numbers a document and posts its lines atomically.
    ///
    /// On failure nothing from the document is kept and its number is
    /// released.
    pub async fn post_document(&self, request: &PostDocument) -> DbResult<PostedDocument> {
        if request.lines.is_empty() {
            return Err(ValidationError::Required {
                field: "lines".to_string(),
            }
            .into());
        }

        let effective_at = request.effective_at.unwrap_or_else(|| self.clock().now());
        let handle = self
            .sequences()
            .reserve(&request.document_type, request.location, effective_at, &request.holder)
            .await?;

        let plan = request
            .lines
            .iter()
            .fold(WorkPlan::new().sequence(handle.scope), |plan, line| line.add_keys(plan));

        let db = self;
        let plan = &plan;
        let handle_ref = &handle;

        let posted = retry_transient(&self.settings().locking, "post_document", move || async move {
            let mut uow = db.begin_work(plan.clone()).await?;
            let lines = apply_lines(&mut uow, handle_ref, request, effective_at).await?;
            let work_unit_id = uow.id().to_string();
            uow.commit().await?;
            Ok(PostedDocument {
                code: handle_ref.code.clone(),
                reservation_id: handle_ref.reservation_id,
                work_unit_id,
                lines,
            })
        })
        .await;

        match posted {
            Ok(posted) => {
                info!(
                    code = %posted.code,
                    lines = posted.lines.len(),
                    work_unit_id = %posted.work_unit_id,
                    "Document posted"
                );
                Ok(posted)
            }
            Err(err) => {
                warn!(code = %handle.code, error = %err, "Document posting failed, releasing number");
                if let Err(release_err) = self.sequences().release(&handle).await {
                    warn!(code = %handle.code, error = %release_err, "Failed to release document number");
                }
                Err(err)
            }
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
    use stockbook_core::{CoreError, SequenceStatus};

    struct Shop {
        db: Database,
        item_id: i64,
        branch: Location,
        warehouse: Location,
    }

    async fn shop() -> Shop {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let hq = db.locations().create_branch("HQ", "Head Office").await.unwrap();
        let main = db
            .locations()
            .create_warehouse(hq.id, "MAIN", "Main store")
            .await
            .unwrap();
        let item = db
            .items()
            .create("TEA-900G", "Black tea 900g", Money::from_major_minor(750, 0))
            .await
            .unwrap();
        Shop {
            db,
            item_id: item.id,
            branch: Location::Branch(hq.id),
            warehouse: Location::Warehouse(main.id),
        }
    }

    fn october() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap()
    }

    fn goods_receipt(s: &Shop, quantity: i64) -> PostDocument {
        PostDocument {
            document_type: "Goods Receipt".into(),
            location: s.warehouse,
            holder: "clerk-1".into(),
            effective_at: Some(october()),
            lines: vec![DocumentLine::Movement {
                item_id: s.item_id,
                location: s.warehouse,
                kind: MovementKind::In,
                quantity,
                unit_cost: Some(Money::from_major_minor(700, 0)),
            }],
        }
    }

    #[tokio::test]
    async fn test_posted_document_confirms_number_and_stamps_movements() {
        let s = shop().await;

        let posted = s.db.post_document(&goods_receipt(&s, 12)).await.unwrap();
        assert_eq!(posted.code, "GR-HQ-1026-0001");

        let reservation = s.db.sequences().get(posted.reservation_id).await.unwrap();
        assert_eq!(reservation.status, SequenceStatus::Confirmed);

        let movements = s.db.movements().for_document(&posted.code).await.unwrap();
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].reservation_id, Some(posted.reservation_id));
        assert_eq!(movements[0].work_unit_id, posted.work_unit_id);
        assert_eq!(movements[0].occurred_at, october());
        assert_eq!(s.db.ledger().current_stock(s.item_id, s.warehouse).await.unwrap(), 12);
    }

    #[tokio::test]
    async fn test_mixed_lines_post_together() {
        let s = shop().await;
        s.db.post_document(&goods_receipt(&s, 12)).await.unwrap();

        let transfer = PostDocument {
            document_type: "Stock Transfer".into(),
            location: s.branch,
            holder: "clerk-2".into(),
            effective_at: Some(october()),
            lines: vec![
                DocumentLine::Transfer {
                    item_id: s.item_id,
                    from: s.warehouse,
                    to: s.branch,
                    quantity: 5,
                },
                DocumentLine::Balance {
                    item_id: s.item_id,
                    location: s.warehouse,
                    physical_quantity: 6,
                    unit_cost: None,
                },
            ],
        };
        let posted = s.db.post_document(&transfer).await.unwrap();

        assert_eq!(posted.code, "ST-HQ-1026-0001");
        assert!(matches!(posted.lines[0], LineOutcome::Transfer(_)));
        match &posted.lines[1] {
            LineOutcome::Balance(outcome) => assert_eq!(outcome.discrepancy, -1),
            other => panic!("unexpected outcome {:?}", other),
        }

        let ledger = s.db.ledger();
        assert_eq!(ledger.current_stock(s.item_id, s.branch).await.unwrap(), 5);
        assert_eq!(ledger.current_stock(s.item_id, s.warehouse).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_failed_posting_releases_number_and_writes_nothing() {
        let s = shop().await;
        s.db.post_document(&goods_receipt(&s, 3)).await.unwrap();

        let waybill = PostDocument {
            document_type: "Waybill".into(),
            location: s.warehouse,
            holder: "driver-4".into(),
            effective_at: Some(october() + chrono::Duration::hours(1)),
            lines: vec![
                DocumentLine::Movement {
                    item_id: s.item_id,
                    location: s.warehouse,
                    kind: MovementKind::Out,
                    quantity: -2,
                    unit_cost: None,
                },
                DocumentLine::Movement {
                    item_id: s.item_id,
                    location: s.warehouse,
                    kind: MovementKind::Out,
                    quantity: -2,
                    unit_cost: None,
                },
            ],
        };

        let result = s.db.post_document(&waybill).await;
        assert!(matches!(
            result,
            Err(DbError::Domain(CoreError::InsufficientStock { available: 1, requested: 2, .. }))
        ));

        assert_eq!(s.db.ledger().current_stock(s.item_id, s.warehouse).await.unwrap(), 3);
        assert!(s.db.movements().for_document("WB-HQ-1026-0001").await.unwrap().is_empty());

        let scope = s
            .db
            .sequences()
            .scope_for("Waybill", s.warehouse, october())
            .await
            .unwrap();
        let rows = s.db.sequences().reservations(&scope).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, SequenceStatus::Available);
    }

    #[tokio::test]
    async fn test_empty_document_is_rejected_before_numbering() {
        let s = shop().await;
        let mut empty = goods_receipt(&s, 1);
        empty.lines.clear();

        assert!(matches!(
            s.db.post_document(&empty).await,
            Err(DbError::Domain(CoreError::Validation(ValidationError::Required { .. })))
        ));
        let scope = s
            .db
            .sequences()
            .scope_for("Goods Receipt", s.warehouse, october())
            .await
            .unwrap();
        assert_eq!(s.db.sequences().last_number(&scope).await.unwrap(), 0);
    }

    #[test]
    fn test_lines_serialize_with_type_tag() {
        let line = DocumentLine::Transfer {
            item_id: 1,
            from: Location::Warehouse(2),
            to: Location::Branch(1),
            quantity: 3,
        };
        let json = serde_json::to_value(&line).unwrap();
        assert_eq!(json["type"], "transfer");
        assert_eq!(json["from"]["kind"], "warehouse");
    }
}
