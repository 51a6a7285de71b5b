//! # Ledger / Cost Engine
//!
//! Applies stock movements to batches and records every change in the
//! movement log.
//!
//! ## Movement Paths
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  MovementRequest { item 7, Branch(1), Δ, kind, document }               │
//! │       │                                                                 │
//! │       ├── kind/sign check ───────────────► NonPositiveQuantity          │
//! │       ├── lock (item 7, Branch(1)) held? ► LockNotHeld                  │
//! │       ├── item, location exist? ─────────► UnknownItem/UnknownLocation  │
//! │       ├── document reservation live? ────► ReferentialConflict          │
//! │       │                                                                 │
//! │       ├── Δ > 0  INBOUND                                                │
//! │       │     open batch (cost: request → last batch → standard cost)    │
//! │       │     movement { prev 0, +Δ, after Δ }                            │
//! │       │                                                                 │
//! │       └── Δ < 0  OUTBOUND                                               │
//! │             consumable batches, oldest first                           │
//! │             plan_consumption ────────────► InsufficientStock            │
//! │             per draw: remaining prev → after, movement { prev, −n, after }│
//! │             weighted unit cost = Σ cost / |Δ|                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The operations exist twice: on [`UnitOfWork`], for callers composing a
//! document out of several lines, and on [`Ledger`], each in a unit of work
//! of its own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use stockbook_core::fifo::{check_movement, decide_balance, plan_consumption, BalanceAction, Direction};
use stockbook_core::validation::{validate_physical_count, validate_quantity, validate_unit_cost};
use stockbook_core::{
    CoreError, DocumentRef, Item, ItemBatch, Location, Money, MovementKind, StockMovement,
    ValidationError,
};

use crate::error::{DbError, DbResult};
use crate::locks::LockKey;
use crate::pool::Database;
use crate::repository::movement::NewMovement;
use crate::repository::{batch, item, location, movement};
use crate::retry::retry_transient;
use crate::unit_of_work::{UnitOfWork, WorkPlan};

// =============================================================================
// Requests & Outcomes
// =============================================================================

/// One signed quantity change of an item at a location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRequest {
    pub item_id: i64,
    pub location: Location,
    pub kind: MovementKind,
    /// Positive adds stock, negative consumes it.
    pub quantity: i64,
    pub document: DocumentRef,
    /// Cost of inbound units; ignored for outbound.
    pub unit_cost: Option<Money>,
    /// Effective time; defaults to now. Outbound movements may not predate
    /// the batches they draw from.
    pub effective_at: Option<DateTime<Utc>>,
}

impl MovementRequest {
    pub fn new(
        item_id: i64,
        location: Location,
        kind: MovementKind,
        quantity: i64,
        document: DocumentRef,
    ) -> Self {
        MovementRequest {
            item_id,
            location,
            kind,
            quantity,
            document,
            unit_cost: None,
            effective_at: None,
        }
    }

    pub fn with_unit_cost(mut self, unit_cost: Money) -> Self {
        self.unit_cost = Some(unit_cost);
        self
    }

    pub fn at(mut self, effective_at: DateTime<Utc>) -> Self {
        self.effective_at = Some(effective_at);
        self
    }
}

/// What one movement request wrote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementOutcome {
    pub work_unit_id: String,
    /// One per batch touched, in consumption order.
    pub movements: Vec<StockMovement>,
    /// Signed quantity applied.
    pub quantity: i64,
    /// Exact cost of the units moved.
    pub total_cost: Money,
    /// `total_cost / |quantity|`, rounded half-up.
    pub weighted_unit_cost: Money,
    /// Batch opened by an inbound movement.
    pub opened_batch: Option<i64>,
}

/// Moves stock between two locations at the cost it left the source with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub item_id: i64,
    pub from: Location,
    pub to: Location,
    /// Units to move, positive.
    pub quantity: i64,
    pub document: DocumentRef,
    pub effective_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOutcome {
    pub outbound: MovementOutcome,
    pub inbound: MovementOutcome,
    /// Cost per unit of the batch opened at the destination.
    pub unit_cost: Money,
}

/// A stock audit line: the physical count of an item at a location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceRequest {
    pub item_id: i64,
    pub location: Location,
    pub physical_quantity: i64,
    pub document: DocumentRef,
    /// Cost of surplus units; defaults to the last known cost.
    pub unit_cost: Option<Money>,
    pub effective_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceOutcome {
    pub system_quantity: i64,
    pub physical_quantity: i64,
    /// physical − system
    pub discrepancy: i64,
    /// `None` when the count matched.
    pub movement: Option<MovementOutcome>,
}

/// Batch remaining quantity checked against its movement history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub batch_id: i64,
    pub opening_quantity: i64,
    pub remaining_quantity: i64,
    /// Σ movement_quantity, opening movement included.
    pub movement_sum: i64,
    pub movement_count: usize,
    /// Each movement starts where the previous one ended.
    pub chain_intact: bool,
}

impl ReconcileReport {
    pub fn is_consistent(&self) -> bool {
        self.chain_intact && self.movement_sum == self.remaining_quantity
    }
}

// =============================================================================
// Operations inside a unit of work
// =============================================================================

impl UnitOfWork {
    /// Applies one movement.
    ///
    /// All-or-nothing for this request: an outbound movement that cannot be
    /// covered fails before anything is written.
    pub async fn apply_movement(&mut self, request: &MovementRequest) -> DbResult<MovementOutcome> {
        validate_quantity(request.quantity)?;
        let direction = check_movement(request.kind, request.quantity)?;
        if let Some(cost) = request.unit_cost {
            validate_unit_cost(cost.cents())?;
        }
        self.require(&LockKey::stock(request.item_id, request.location))?;

        let item = item::get(self.conn(), request.item_id).await?;
        location::resolve(self.conn(), request.location).await?;
        self.reference(&request.document).await?;

        let occurred_at = request.effective_at.unwrap_or_else(|| self.now());
        let outcome = match direction {
            Direction::Inbound(quantity) => self.receive(&item, request, quantity, occurred_at).await?,
            Direction::Outbound(quantity) => self.consume(request, quantity, occurred_at).await?,
        };

        debug!(
            work_unit_id = %outcome.work_unit_id,
            item_id = request.item_id,
            location = %request.location,
            kind = %request.kind,
            quantity = outcome.quantity,
            batches = outcome.movements.len(),
            "Movement applied"
        );
        Ok(outcome)
    }

    async fn receive(
        &mut self,
        item: &Item,
        request: &MovementRequest,
        quantity: i64,
        occurred_at: DateTime<Utc>,
    ) -> DbResult<MovementOutcome> {
        let unit_cost = match request.unit_cost {
            Some(cost) => cost,
            None => batch::last_unit_cost(self.conn(), item.id, request.location)
                .await?
                .unwrap_or(item.standard_cost),
        };
        let total_cost = unit_cost.checked_multiply_quantity(quantity).ok_or_else(|| {
            ValidationError::OutOfRange {
                field: "total cost".to_string(),
                min: 0,
                max: i64::MAX,
            }
        })?;

        let work_unit_id = self.id().to_string();
        let recorded_at = self.now();

        let opened = batch::open(
            self.conn(),
            item.id,
            request.location,
            occurred_at,
            unit_cost,
            quantity,
            recorded_at,
        )
        .await?;

        let recorded = movement::append(
            self.conn(),
            &NewMovement {
                work_unit_id: &work_unit_id,
                batch_id: opened.id,
                item_id: item.id,
                location: request.location,
                kind: request.kind,
                previous_quantity: 0,
                movement_quantity: quantity,
                after_quantity: quantity,
                unit_cost,
                document_type: &request.document.document_type,
                document_code: &request.document.code,
                reservation_id: request.document.reservation_id,
                occurred_at,
                recorded_at,
            },
        )
        .await?;

        Ok(MovementOutcome {
            work_unit_id,
            movements: vec![recorded],
            quantity,
            total_cost,
            weighted_unit_cost: unit_cost,
            opened_batch: Some(opened.id),
        })
    }

    async fn consume(
        &mut self,
        request: &MovementRequest,
        quantity: i64,
        occurred_at: DateTime<Utc>,
    ) -> DbResult<MovementOutcome> {
        let batches = batch::consumable(self.conn(), request.item_id, request.location).await?;
        let plan = plan_consumption(request.item_id, request.location, &batches, quantity)?;

        // A batch cannot be drawn before its receipt or its latest movement.
        for draw in &plan.draws {
            let latest = movement::for_batch(self.conn(), draw.batch_id)
                .await?
                .into_iter()
                .map(|m| m.occurred_at)
                .max();
            if let Some(latest) = latest.filter(|latest| occurred_at < *latest) {
                return Err(ValidationError::TooEarly {
                    field: "movement time".to_string(),
                    earliest: latest.to_rfc3339(),
                }
                .into());
            }
        }

        let work_unit_id = self.id().to_string();
        let recorded_at = self.now();
        let mut movements = Vec::with_capacity(plan.draws.len());

        for draw in &plan.draws {
            batch::set_remaining(self.conn(), draw.batch_id, draw.previous_quantity, draw.after_quantity)
                .await?;
            let recorded = movement::append(
                self.conn(),
                &NewMovement {
                    work_unit_id: &work_unit_id,
                    batch_id: draw.batch_id,
                    item_id: request.item_id,
                    location: request.location,
                    kind: request.kind,
                    previous_quantity: draw.previous_quantity,
                    movement_quantity: -draw.consumed,
                    after_quantity: draw.after_quantity,
                    unit_cost: draw.unit_cost,
                    document_type: &request.document.document_type,
                    document_code: &request.document.code,
                    reservation_id: request.document.reservation_id,
                    occurred_at,
                    recorded_at,
                },
            )
            .await?;
            movements.push(recorded);
        }

        Ok(MovementOutcome {
            work_unit_id,
            movements,
            quantity: -quantity,
            total_cost: plan.total_cost,
            weighted_unit_cost: plan.weighted_unit_cost(),
            opened_batch: None,
        })
    }

    /// Out of the source, into the destination at the consumed weighted cost.
    pub async fn transfer(&mut self, request: &TransferRequest) -> DbResult<TransferOutcome> {
        if request.from == request.to {
            return Err(ValidationError::MustDiffer {
                field: "transfer locations".to_string(),
                reason: format!("cannot transfer from {} to itself", request.from),
            }
            .into());
        }
        if request.quantity <= 0 {
            return Err(CoreError::NonPositiveQuantity {
                kind: "transfer".to_string(),
                quantity: request.quantity,
            }
            .into());
        }

        let mut outbound = MovementRequest::new(
            request.item_id,
            request.from,
            MovementKind::Out,
            -request.quantity,
            request.document.clone(),
        );
        outbound.effective_at = request.effective_at;
        let outbound = self.apply_movement(&outbound).await?;

        let unit_cost = outbound.weighted_unit_cost;
        let mut inbound = MovementRequest::new(
            request.item_id,
            request.to,
            MovementKind::In,
            request.quantity,
            request.document.clone(),
        )
        .with_unit_cost(unit_cost);
        inbound.effective_at = request.effective_at;
        let inbound = self.apply_movement(&inbound).await?;

        info!(
            item_id = request.item_id,
            from = %request.from,
            to = %request.to,
            quantity = request.quantity,
            unit_cost = %unit_cost,
            "Stock transferred"
        );

        Ok(TransferOutcome {
            outbound,
            inbound,
            unit_cost,
        })
    }

    /// Brings the system quantity in line with a physical count.
    pub async fn balance(&mut self, request: &BalanceRequest) -> DbResult<BalanceOutcome> {
        validate_physical_count(request.physical_quantity)?;
        self.require(&LockKey::stock(request.item_id, request.location))?;

        item::get(self.conn(), request.item_id).await?;
        location::resolve(self.conn(), request.location).await?;

        let system_quantity = batch::on_hand(self.conn(), request.item_id, request.location).await?;
        let action = decide_balance(system_quantity, request.physical_quantity)?;

        let quantity = match action {
            BalanceAction::NoChange => None,
            BalanceAction::Receive(q) => Some(q),
            BalanceAction::Consume(q) => Some(-q),
        };

        let movement = match quantity {
            None => None,
            Some(quantity) => {
                let correction = MovementRequest {
                    item_id: request.item_id,
                    location: request.location,
                    kind: MovementKind::Balanced,
                    quantity,
                    document: request.document.clone(),
                    unit_cost: request.unit_cost,
                    effective_at: request.effective_at,
                };
                Some(self.apply_movement(&correction).await?)
            }
        };

        info!(
            item_id = request.item_id,
            location = %request.location,
            system = system_quantity,
            physical = request.physical_quantity,
            "Stock balanced"
        );

        Ok(BalanceOutcome {
            system_quantity,
            physical_quantity: request.physical_quantity,
            discrepancy: action.discrepancy(),
            movement,
        })
    }
}

// =============================================================================
// Ledger
// =============================================================================

/// Standalone ledger operations and stock queries. Obtained from
/// [`Database::ledger`].
#[derive(Debug, Clone)]
pub struct Ledger {
    db: Database,
}

impl Ledger {
    pub(crate) fn new(db: Database) -> Self {
        Ledger { db }
    }

    /// Applies one movement in its own unit of work.
    pub async fn apply_movement(&self, request: &MovementRequest) -> DbResult<MovementOutcome> {
        let db = &self.db;
        let plan = &WorkPlan::new().stock(request.item_id, request.location);

        retry_transient(&db.settings().locking, "apply_movement", move || async move {
            let mut uow = db.begin_work(plan.clone()).await?;
            let outcome = uow.apply_movement(request).await?;
            uow.commit().await?;
            Ok(outcome)
        })
        .await
    }

    pub async fn transfer(&self, request: &TransferRequest) -> DbResult<TransferOutcome> {
        let db = &self.db;
        let plan = &WorkPlan::new()
            .stock(request.item_id, request.from)
            .stock(request.item_id, request.to);

        retry_transient(&db.settings().locking, "transfer", move || async move {
            let mut uow = db.begin_work(plan.clone()).await?;
            let outcome = uow.transfer(request).await?;
            uow.commit().await?;
            Ok(outcome)
        })
        .await
    }

    pub async fn balance(&self, request: &BalanceRequest) -> DbResult<BalanceOutcome> {
        let db = &self.db;
        let plan = &WorkPlan::new().stock(request.item_id, request.location);

        retry_transient(&db.settings().locking, "balance", move || async move {
            let mut uow = db.begin_work(plan.clone()).await?;
            let outcome = uow.balance(request).await?;
            uow.commit().await?;
            Ok(outcome)
        })
        .await
    }

    /// Σ remaining over the pair's batches.
    pub async fn current_stock(&self, item_id: i64, location: Location) -> DbResult<i64> {
        let mut conn = self.db.pool().acquire().await?;
        item::get(&mut conn, item_id).await?;
        location::resolve(&mut conn, location).await?;
        batch::on_hand(&mut conn, item_id, location).await
    }

    /// Quantity on hand at `at`, from the movement log.
    pub async fn stock_as_of(&self, item_id: i64, location: Location, at: DateTime<Utc>) -> DbResult<i64> {
        let mut conn = self.db.pool().acquire().await?;
        item::get(&mut conn, item_id).await?;
        location::resolve(&mut conn, location).await?;
        movement::quantity_as_of(&mut conn, item_id, location, at).await
    }

    /// Batches with stock left, oldest first.
    pub async fn consumable_batches(&self, item_id: i64, location: Location) -> DbResult<Vec<ItemBatch>> {
        self.db.batches().consumable(item_id, location).await
    }

    pub async fn reconcile_batch(&self, batch_id: i64) -> DbResult<ReconcileReport> {
        let mut conn = self.db.pool().acquire().await?;
        let batch = batch::get(&mut conn, batch_id)
            .await?
            .ok_or_else(|| DbError::not_found("Batch", batch_id))?;
        let movements = movement::for_batch(&mut conn, batch_id).await?;

        let mut expected_previous = 0;
        let mut chain_intact = true;
        for m in &movements {
            chain_intact &= m.is_consistent() && m.previous_quantity == expected_previous;
            expected_previous = m.after_quantity;
        }

        Ok(ReconcileReport {
            batch_id,
            opening_quantity: batch.opening_quantity,
            remaining_quantity: batch.remaining_quantity,
            movement_sum: movements.iter().map(|m| m.movement_quantity).sum(),
            movement_count: movements.len(),
            chain_intact: chain_intact && expected_previous == batch.remaining_quantity,
        })
    }

    pub async fn movements_for_batch(&self, batch_id: i64) -> DbResult<Vec<StockMovement>> {
        self.db.movements().for_batch(batch_id).await
    }

    pub async fn movements_for_document(&self, document_code: &str) -> DbResult<Vec<StockMovement>> {
        self.db.movements().for_document(document_code).await
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
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;
    use stockbook_core::{Clock, ManualClock};

    struct Fixture {
        db: Database,
        clock: Arc<ManualClock>,
        item_id: i64,
        branch: Location,
        warehouse: Location,
    }

    fn day(month: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, month, d, 8, 0, 0).unwrap()
    }

    async fn fixture() -> Fixture {
        fixture_with(DbConfig::in_memory()).await
    }

    async fn fixture_with(config: DbConfig) -> Fixture {
        let clock = Arc::new(ManualClock::new(day(10, 19)));
        let db = Database::open(config, StockbookConfig::default(), clock.clone())
            .await
            .unwrap();
        let hq = db.locations().create_branch("HQ", "Head Office").await.unwrap();
        let main = db
            .locations()
            .create_warehouse(hq.id, "MAIN", "Main store")
            .await
            .unwrap();
        let item = db
            .items()
            .create("RICE-5KG", "Basmati rice 5kg", Money::from_major_minor(90, 0))
            .await
            .unwrap();

        Fixture {
            db,
            clock,
            item_id: item.id,
            branch: Location::Branch(hq.id),
            warehouse: Location::Warehouse(main.id),
        }
    }

    fn receipt(code: &str) -> DocumentRef {
        DocumentRef::new("Goods Receipt", code)
    }

    async fn receive(f: &Fixture, quantity: i64, cost: i64, at: DateTime<Utc>) -> MovementOutcome {
        let request = MovementRequest::new(f.item_id, f.branch, MovementKind::In, quantity, receipt("GR-IMPORT"))
            .with_unit_cost(Money::from_major_minor(cost, 0))
            .at(at);
        f.db.ledger().apply_movement(&request).await.unwrap()
    }

    #[tokio::test]
    async fn test_fifo_outbound_across_two_batches() {
        let f = fixture().await;
        let b1 = receive(&f, 10, 100, day(1, 1)).await.opened_batch.unwrap();
        let b2 = receive(&f, 10, 120, day(2, 1)).await.opened_batch.unwrap();

        let waybill = MovementRequest::new(
            f.item_id,
            f.branch,
            MovementKind::Out,
            -15,
            DocumentRef::new("Waybill", "WB-HQ-1026-0001"),
        );
        let outcome = f.db.ledger().apply_movement(&waybill).await.unwrap();

        assert_eq!(outcome.quantity, -15);
        assert_eq!(outcome.total_cost, Money::from_major_minor(1600, 0));
        assert_eq!(outcome.weighted_unit_cost.cents(), 10_667);

        let touched: Vec<_> = outcome
            .movements
            .iter()
            .map(|m| (m.batch_id, m.previous_quantity, m.movement_quantity, m.after_quantity))
            .collect();
        assert_eq!(touched, vec![(b1, 10, -10, 0), (b2, 10, -5, 5)]);
        assert!(outcome.movements.iter().all(|m| m.work_unit_id == outcome.work_unit_id));

        let open = f.db.ledger().consumable_batches(f.item_id, f.branch).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, b2);
        assert_eq!(f.db.ledger().current_stock(f.item_id, f.branch).await.unwrap(), 5);

        // Exhausted batches are kept.
        let exhausted = f.db.batches().get(b1).await.unwrap();
        assert_eq!(exhausted.remaining_quantity, 0);
        assert_eq!(exhausted.opening_quantity, 10);
    }

    #[tokio::test]
    async fn test_insufficient_stock_writes_nothing() {
        let f = fixture().await;
        receive(&f, 10, 100, day(1, 1)).await;
        receive(&f, 10, 120, day(2, 1)).await;
        let before = f.db.batches().history(f.item_id, f.branch).await.unwrap();
        let logged = f.db.movements().count().await.unwrap();

        let request = MovementRequest::new(
            f.item_id,
            f.branch,
            MovementKind::Out,
            -25,
            DocumentRef::new("Waybill", "WB-HQ-1026-0002"),
        );
        let result = f.db.ledger().apply_movement(&request).await;

        assert!(matches!(
            result,
            Err(DbError::Domain(CoreError::InsufficientStock { available: 20, requested: 25, .. }))
        ));
        assert_eq!(f.db.batches().history(f.item_id, f.branch).await.unwrap(), before);
        assert_eq!(f.db.movements().count().await.unwrap(), logged);
    }

    #[tokio::test]
    async fn test_kind_and_sign_must_agree() {
        let f = fixture().await;
        let ledger = f.db.ledger();

        for (kind, quantity) in [
            (MovementKind::Out, 5),
            (MovementKind::In, -5),
            (MovementKind::Increased, 0),
            (MovementKind::Balanced, 0),
        ] {
            let request = MovementRequest::new(f.item_id, f.branch, kind, quantity, receipt("X"));
            assert!(matches!(
                ledger.apply_movement(&request).await,
                Err(DbError::Domain(CoreError::NonPositiveQuantity { .. }))
            ));
        }
    }

    #[tokio::test]
    async fn test_unknown_item_and_location() {
        let f = fixture().await;
        let ledger = f.db.ledger();

        let request = MovementRequest::new(999, f.branch, MovementKind::In, 1, receipt("X"));
        assert!(matches!(
            ledger.apply_movement(&request).await,
            Err(DbError::Domain(CoreError::UnknownItem(999)))
        ));

        let request = MovementRequest::new(f.item_id, Location::Warehouse(77), MovementKind::In, 1, receipt("X"));
        assert!(matches!(
            ledger.apply_movement(&request).await,
            Err(DbError::Domain(CoreError::UnknownLocation(_)))
        ));
    }

    #[tokio::test]
    async fn test_inbound_cost_fallbacks() {
        let f = fixture().await;
        let ledger = f.db.ledger();
        let uncosted = || MovementRequest::new(f.item_id, f.branch, MovementKind::Increased, 2, receipt("SA-1"));

        let first = ledger.apply_movement(&uncosted()).await.unwrap();
        assert_eq!(first.weighted_unit_cost, Money::from_major_minor(90, 0));

        f.clock.advance(Duration::hours(1));
        receive(&f, 5, 110, f.clock.now()).await;
        let later = ledger.apply_movement(&uncosted()).await.unwrap();
        assert_eq!(later.weighted_unit_cost, Money::from_major_minor(110, 0));
    }

    #[tokio::test]
    async fn test_reconcile_batch() {
        let f = fixture().await;
        let batch_id = receive(&f, 10, 100, day(1, 1)).await.opened_batch.unwrap();
        for quantity in [-3, -4] {
            let request = MovementRequest::new(
                f.item_id,
                f.branch,
                MovementKind::Decreased,
                quantity,
                DocumentRef::new("Stock Adjustment", "SA-1"),
            );
            f.db.ledger().apply_movement(&request).await.unwrap();
        }

        let report = f.db.ledger().reconcile_batch(batch_id).await.unwrap();
        assert_eq!(report.opening_quantity, 10);
        assert_eq!(report.remaining_quantity, 3);
        assert_eq!(report.movement_sum, 3);
        assert_eq!(report.movement_count, 3);
        assert!(report.is_consistent());

        let history = f.db.ledger().movements_for_batch(batch_id).await.unwrap();
        assert!(history.iter().all(StockMovement::is_consistent));
        assert_eq!(history.last().unwrap().after_quantity, 3);
    }

    #[tokio::test]
    async fn test_transfer_round_trip_keeps_cost() {
        let f = fixture().await;
        receive(&f, 10, 100, day(1, 1)).await;
        let ledger = f.db.ledger();

        let out = TransferRequest {
            item_id: f.item_id,
            from: f.branch,
            to: f.warehouse,
            quantity: 4,
            document: DocumentRef::new("Stock Transfer", "ST-HQ-1026-0001"),
            effective_at: None,
        };
        let outcome = ledger.transfer(&out).await.unwrap();
        assert_eq!(outcome.unit_cost, Money::from_major_minor(100, 0));
        assert_eq!(outcome.outbound.quantity, -4);
        assert_eq!(outcome.inbound.quantity, 4);
        assert_eq!(outcome.outbound.work_unit_id, outcome.inbound.work_unit_id);

        let back = TransferRequest {
            from: f.warehouse,
            to: f.branch,
            document: DocumentRef::new("Stock Transfer", "ST-HQ-1026-0002"),
            ..out.clone()
        };
        let returned = ledger.transfer(&back).await.unwrap();
        assert_eq!(returned.unit_cost, Money::from_major_minor(100, 0));

        assert_eq!(ledger.current_stock(f.item_id, f.branch).await.unwrap(), 10);
        assert_eq!(ledger.current_stock(f.item_id, f.warehouse).await.unwrap(), 0);
        let batches = ledger.consumable_batches(f.item_id, f.branch).await.unwrap();
        assert!(batches.iter().all(|b| b.unit_cost == Money::from_major_minor(100, 0)));
        assert_eq!(
            ledger.movements_for_document("ST-HQ-1026-0001").await.unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn test_transfer_to_same_location_is_rejected() {
        let f = fixture().await;
        receive(&f, 10, 100, day(1, 1)).await;

        let request = TransferRequest {
            item_id: f.item_id,
            from: f.branch,
            to: f.branch,
            quantity: 1,
            document: DocumentRef::new("Stock Transfer", "ST-1"),
            effective_at: None,
        };
        assert!(matches!(
            f.db.ledger().transfer(&request).await,
            Err(DbError::Domain(CoreError::Validation(ValidationError::MustDiffer { .. })))
        ));
    }

    #[tokio::test]
    async fn test_balanced_audit_records_shortage() {
        let f = fixture().await;
        receive(&f, 10, 100, day(1, 1)).await;
        let audit = DocumentRef::new("Stock Audit", "AU-HQ-1026-0001");

        let request = BalanceRequest {
            item_id: f.item_id,
            location: f.branch,
            physical_quantity: 8,
            document: audit.clone(),
            unit_cost: None,
            effective_at: None,
        };
        let outcome = f.db.ledger().balance(&request).await.unwrap();

        assert_eq!(outcome.system_quantity, 10);
        assert_eq!(outcome.discrepancy, -2);
        let movement = outcome.movement.unwrap();
        assert_eq!(movement.quantity, -2);
        assert!(movement.movements.iter().all(|m| m.kind == MovementKind::Balanced));
        assert_eq!(f.db.ledger().current_stock(f.item_id, f.branch).await.unwrap(), 8);

        // A matching count writes nothing.
        let again = f.db.ledger().balance(&request).await.unwrap();
        assert_eq!(again.discrepancy, 0);
        assert!(again.movement.is_none());
    }

    #[tokio::test]
    async fn test_balanced_audit_receives_surplus_at_last_cost() {
        let f = fixture().await;
        receive(&f, 10, 100, day(1, 1)).await;

        let request = BalanceRequest {
            item_id: f.item_id,
            location: f.branch,
            physical_quantity: 13,
            document: DocumentRef::new("Stock Audit", "AU-1"),
            unit_cost: None,
            effective_at: None,
        };
        let outcome = f.db.ledger().balance(&request).await.unwrap();
        let movement = outcome.movement.unwrap();

        assert_eq!(outcome.discrepancy, 3);
        assert_eq!(movement.weighted_unit_cost, Money::from_major_minor(100, 0));
        assert_eq!(movement.movements[0].kind, MovementKind::Balanced);
    }

    #[tokio::test]
    async fn test_stock_as_of_replays_movements() {
        let f = fixture().await;
        receive(&f, 10, 100, day(10, 1)).await;
        let sale = MovementRequest::new(
            f.item_id,
            f.branch,
            MovementKind::Out,
            -3,
            DocumentRef::new("Sales Invoice", "SI-1"),
        )
        .at(day(10, 5));
        f.db.ledger().apply_movement(&sale).await.unwrap();

        let ledger = f.db.ledger();
        assert_eq!(ledger.stock_as_of(f.item_id, f.branch, day(9, 30)).await.unwrap(), 0);
        assert_eq!(ledger.stock_as_of(f.item_id, f.branch, day(10, 3)).await.unwrap(), 10);
        assert_eq!(ledger.stock_as_of(f.item_id, f.branch, day(10, 5)).await.unwrap(), 7);
        assert_eq!(
            ledger.stock_as_of(f.item_id, f.branch, f.clock.now() + Duration::days(1)).await.unwrap(),
            ledger.current_stock(f.item_id, f.branch).await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_undeclared_stock_key_is_rejected() {
        let f = fixture().await;
        let mut uow = f.db.begin_work(WorkPlan::new().stock(f.item_id, f.warehouse)).await.unwrap();

        let request = MovementRequest::new(f.item_id, f.branch, MovementKind::In, 1, receipt("X"));
        assert!(matches!(
            uow.apply_movement(&request).await,
            Err(DbError::Domain(CoreError::LockNotHeld { .. }))
        ));
    }

    #[tokio::test]
    async fn test_movement_log_is_append_only() {
        let f = fixture().await;
        let outcome = receive(&f, 10, 100, day(1, 1)).await;
        let id = outcome.movements[0].id;

        let update = sqlx::query("UPDATE stock_movements SET movement_quantity = 99 WHERE id = ?1")
            .bind(id)
            .execute(f.db.pool())
            .await;
        assert!(matches!(update.map_err(DbError::from), Err(DbError::QueryFailed(_))));

        let delete = sqlx::query("DELETE FROM stock_movements WHERE id = ?1")
            .bind(id)
            .execute(f.db.pool())
            .await;
        assert!(matches!(delete.map_err(DbError::from), Err(DbError::QueryFailed(_))));

        let batch_delete = sqlx::query("DELETE FROM item_batches")
            .execute(f.db.pool())
            .await;
        assert!(batch_delete.is_err());
    }

    #[tokio::test]
    async fn test_cost_beyond_limit_is_rejected() {
        let f = fixture().await;
        let request = MovementRequest::new(f.item_id, f.branch, MovementKind::In, 1_000_000, receipt("GR-1"))
            .with_unit_cost(Money::from_cents(10_000_000_000_000));

        assert!(matches!(
            f.db.ledger().apply_movement(&request).await,
            Err(DbError::Domain(CoreError::Validation(ValidationError::OutOfRange { .. })))
        ));
        assert_eq!(f.db.ledger().current_stock(f.item_id, f.branch).await.unwrap(), 0);

        let largest = MovementRequest::new(
            f.item_id,
            f.branch,
            MovementKind::In,
            stockbook_core::MAX_MOVEMENT_QUANTITY,
            receipt("GR-2"),
        )
        .with_unit_cost(Money::from_cents(stockbook_core::MAX_UNIT_COST_CENTS));
        let outcome = f.db.ledger().apply_movement(&largest).await.unwrap();
        assert_eq!(
            outcome.total_cost.cents(),
            stockbook_core::MAX_UNIT_COST_CENTS * stockbook_core::MAX_MOVEMENT_QUANTITY
        );

        assert!(f
            .db
            .items()
            .create("GOLD-1KG", "Gold bar", Money::from_cents(stockbook_core::MAX_UNIT_COST_CENTS + 1))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_extreme_negative_quantity_is_rejected() {
        let f = fixture().await;
        let request = MovementRequest::new(f.item_id, f.branch, MovementKind::Out, i64::MIN, receipt("WB-1"));

        assert!(matches!(
            f.db.ledger().apply_movement(&request).await,
            Err(DbError::Domain(CoreError::Validation(ValidationError::OutOfRange { .. })))
        ));
    }

    #[tokio::test]
    async fn test_outbound_cannot_predate_its_batches() {
        let f = fixture().await;
        let batch_id = receive(&f, 10, 100, day(10, 10)).await.opened_batch.unwrap();
        let ledger = f.db.ledger();

        let backdated = MovementRequest::new(
            f.item_id,
            f.branch,
            MovementKind::Out,
            -4,
            DocumentRef::new("Waybill", "WB-1"),
        )
        .at(day(10, 1));
        assert!(matches!(
            ledger.apply_movement(&backdated).await,
            Err(DbError::Domain(CoreError::Validation(ValidationError::TooEarly { .. })))
        ));
        assert_eq!(ledger.current_stock(f.item_id, f.branch).await.unwrap(), 10);
        assert_eq!(ledger.stock_as_of(f.item_id, f.branch, day(10, 5)).await.unwrap(), 0);

        let sale = MovementRequest::new(
            f.item_id,
            f.branch,
            MovementKind::Out,
            -2,
            DocumentRef::new("Sales Invoice", "SI-1"),
        )
        .at(day(10, 15));
        ledger.apply_movement(&sale).await.unwrap();

        let earlier_sale = sale.clone().at(day(10, 12));
        assert!(ledger.apply_movement(&earlier_sale).await.is_err());

        let same_instant = sale.at(day(10, 15));
        ledger.apply_movement(&same_instant).await.unwrap();
        assert!(ledger.reconcile_batch(batch_id).await.unwrap().is_consistent());
        assert_eq!(ledger.stock_as_of(f.item_id, f.branch, day(10, 16)).await.unwrap(), 6);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_outbound_never_oversells() {
        let dir = tempfile::tempdir().unwrap();
        let f = fixture_with(DbConfig::new(dir.path().join("stockbook.db")).max_connections(5)).await;
        let mut batch_ids = Vec::new();
        for (d, cost) in [(1, 100), (2, 110), (3, 120)] {
            batch_ids.push(receive(&f, 10, cost, day(10, d)).await.opened_batch.unwrap());
        }

        let mut tasks = Vec::new();
        for i in 0..20 {
            let ledger = f.db.ledger();
            let request = MovementRequest::new(
                f.item_id,
                f.branch,
                MovementKind::Out,
                -2,
                DocumentRef::new("Sales Invoice", format!("SI-{}", i)),
            );
            tasks.push(tokio::spawn(async move { ledger.apply_movement(&request).await }));
        }

        let mut sold = 0;
        let mut refused = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(outcome) => sold -= outcome.quantity,
                Err(DbError::Domain(CoreError::InsufficientStock { .. })) => refused += 1,
                Err(other) => panic!("unexpected error {:?}", other),
            }
        }

        assert_eq!(sold, 30);
        assert_eq!(refused, 5);

        let ledger = f.db.ledger();
        assert_eq!(ledger.current_stock(f.item_id, f.branch).await.unwrap(), 0);
        for batch_id in batch_ids {
            let report = ledger.reconcile_batch(batch_id).await.unwrap();
            assert!(report.is_consistent());
            assert_eq!(report.remaining_quantity, 0);
        }
    }
}
