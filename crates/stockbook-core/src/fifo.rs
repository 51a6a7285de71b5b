//! # FIFO Planner
//!
//! Pure consumption planning over a set of batches. The database layer fetches
//! the consumable batches under the (item, location) lock, asks this module
//! what to draw, and then writes exactly what the plan says.
//!
//! ## Consumption Walk
//! ```text
//!   requested: 15
//!
//!   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!   │ B1  Jan 01   │   │ B2  Feb 01   │   │ B3  Mar 01   │
//!   │ 10 @ 100.00  │──►│ 10 @ 120.00  │──►│  4 @ 130.00  │
//!   └──────┬───────┘   └──────┬───────┘   └──────────────┘
//!          │ take 10          │ take 5          (untouched)
//!          ▼                  ▼
//!   Draw{B1, 10→0}     Draw{B2, 10→5}
//!
//!   total_cost = 10 × 100.00 + 5 × 120.00 = 1600.00
//!   weighted   = 1600.00 / 15            =  106.67
//! ```
//!
//! The plan is all-or-nothing: if the batches cannot cover the request the
//! planner returns `InsufficientStock` and no draw is produced.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::types::{ItemBatch, Location, MovementKind};
use crate::MAX_MOVEMENT_QUANTITY;

// =============================================================================
// Consumption Plan
// =============================================================================

/// One batch's share of an outbound movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draw {
    pub batch_id: i64,
    pub previous_quantity: i64,
    /// Always positive; the movement row stores it negated.
    pub consumed: i64,
    pub after_quantity: i64,
    pub unit_cost: Money,
}

impl Draw {
    /// `None` when the product does not fit in minor units.
    pub fn cost(&self) -> Option<Money> {
        self.unit_cost.checked_multiply_quantity(self.consumed)
    }
}

fn cost_overflow() -> CoreError {
    ValidationError::OutOfRange {
        field: "total cost".to_string(),
        min: 0,
        max: i64::MAX,
    }
    .into()
}

/// The full set of draws satisfying one outbound request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumptionPlan {
    /// In FIFO order.
    pub draws: Vec<Draw>,
    /// Quantity satisfied (equals the requested quantity).
    pub quantity: i64,
    /// Exact Σ consumed × unit cost.
    pub total_cost: Money,
}

impl ConsumptionPlan {
    /// COGS per unit across every batch drawn, rounded half-up.
    pub fn weighted_unit_cost(&self) -> Money {
        Money::weighted_unit(self.total_cost, self.quantity)
    }
}

/// FIFO order: oldest `received_at` first, ties broken by batch id.
pub fn fifo_order(a: &ItemBatch, b: &ItemBatch) -> Ordering {
    a.received_at
        .cmp(&b.received_at)
        .then_with(|| a.id.cmp(&b.id))
}

/// Sorts batches into consumption order in place.
pub fn sort_fifo(batches: &mut [ItemBatch]) {
    batches.sort_by(fifo_order);
}

/// Plans the consumption of `quantity` units of `item_id` at `location`.
///
/// `batches` may arrive in any order and may include exhausted batches or
/// batches of other items/locations; those are skipped. Returns
/// `NonPositiveQuantity` for `quantity <= 0`, `InsufficientStock` when the
/// open batches hold less than `quantity`, and an out-of-range validation
/// error when the total cost overflows.
///
/// ## Example
/// ```rust
/// use stockbook_core::fifo::plan_consumption;
/// use stockbook_core::{ItemBatch, Location, Money, CoreError};
/// use chrono::Utc;
///
/// let now = Utc::now();
/// let batches = vec![ItemBatch::new(1, 3, Location::Branch(1), now, Money::from_cents(500), 2)];
///
/// let err = plan_consumption(3, Location::Branch(1), &batches, 5).unwrap_err();
/// assert!(matches!(err, CoreError::InsufficientStock { available: 2, requested: 5, .. }));
/// ```
pub fn plan_consumption(
    item_id: i64,
    location: Location,
    batches: &[ItemBatch],
    quantity: i64,
) -> CoreResult<ConsumptionPlan> {
    if quantity <= 0 {
        return Err(CoreError::NonPositiveQuantity {
            kind: MovementKind::Out.to_string(),
            quantity,
        });
    }

    let mut open: Vec<&ItemBatch> = batches
        .iter()
        .filter(|b| b.item_id == item_id && b.location == location && b.remaining_quantity > 0)
        .collect();
    open.sort_by(|a, b| fifo_order(a, b));

    let available: i64 = open.iter().map(|b| b.remaining_quantity).sum();
    if available < quantity {
        return Err(CoreError::InsufficientStock {
            item_id,
            location,
            available,
            requested: quantity,
        });
    }

    let mut still_needed = quantity;
    let mut draws = Vec::new();
    let mut total_cost = Money::zero();

    for batch in open {
        if still_needed == 0 {
            break;
        }
        let consumed = batch.remaining_quantity.min(still_needed);
        let draw = Draw {
            batch_id: batch.id,
            previous_quantity: batch.remaining_quantity,
            consumed,
            after_quantity: batch.remaining_quantity - consumed,
            unit_cost: batch.unit_cost,
        };
        total_cost = draw
            .cost()
            .and_then(|cost| total_cost.checked_add(cost))
            .ok_or_else(cost_overflow)?;
        still_needed -= consumed;
        draws.push(draw);
    }

    Ok(ConsumptionPlan {
        draws,
        quantity,
        total_cost,
    })
}

// =============================================================================
// Movement Direction
// =============================================================================

/// Which way a validated movement goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Opens a batch of this many units.
    Inbound(i64),
    /// Consumes this many units FIFO.
    Outbound(i64),
}

/// Checks a signed quantity against its kind and resolves the direction.
pub fn check_movement(kind: MovementKind, quantity: i64) -> CoreResult<Direction> {
    if !kind.accepts(quantity) {
        return Err(CoreError::NonPositiveQuantity {
            kind: kind.to_string(),
            quantity,
        });
    }
    if quantity > 0 {
        return Ok(Direction::Inbound(quantity));
    }
    quantity
        .checked_neg()
        .map(Direction::Outbound)
        .ok_or_else(|| {
            ValidationError::OutOfRange {
                field: "quantity".to_string(),
                min: -MAX_MOVEMENT_QUANTITY,
                max: MAX_MOVEMENT_QUANTITY,
            }
            .into()
        })
}

// =============================================================================
// Audit Balancing
// =============================================================================

/// What a stock audit line has to do to make the books match the shelf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BalanceAction {
    /// Physical exceeds system: open a batch of this many units.
    Receive(i64),
    /// System exceeds physical: consume this many units FIFO.
    Consume(i64),
    NoChange,
}

impl BalanceAction {
    /// Signed discrepancy (physical − system).
    pub fn discrepancy(&self) -> i64 {
        match self {
            BalanceAction::Receive(q) => *q,
            BalanceAction::Consume(q) => -*q,
            BalanceAction::NoChange => 0,
        }
    }
}

/// Compares a physical count to the system quantity.
pub fn decide_balance(system: i64, physical: i64) -> CoreResult<BalanceAction> {
    if physical < 0 {
        return Err(CoreError::NonPositiveQuantity {
            kind: MovementKind::Balanced.to_string(),
            quantity: physical,
        });
    }
    Ok(match physical - system {
        0 => BalanceAction::NoChange,
        d if d > 0 => BalanceAction::Receive(d),
        d => BalanceAction::Consume(-d),
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
