//! # Domain Types
//!
//! Core domain records shared by the allocator and the ledger.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │   ItemBatch     │   │  StockMovement  │   │   Reservation   │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  item, location │◄──│  batch_id (FK)  │   │  counter (FK)   │       │
//! │  │  received_at    │   │  previous       │   │  number, code   │       │
//! │  │  unit_cost      │   │  movement       │   │  status         │       │
//! │  │  remaining ≥ 0  │   │  after          │   │  expires_at     │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Location     │   │  MovementKind   │   │ SequenceStatus  │       │
//! │  │  Branch(id)     │   │  in / out       │   │  available      │       │
//! │  │  Warehouse(id)  │   │  increased      │   │  reserved       │       │
//! │  └─────────────────┘   │  decreased      │   │  confirmed      │       │
//! │                        │  balanced       │   └─────────────────┘       │
//! │                        └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Identity
//! Ledger rows (batches, movements, reservations) use integer identities
//! assigned by the database in insertion order. FIFO tie-breaking relies on
//! that order, so identities are never reused.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

use crate::error::CoreError;
use crate::money::Money;

// =============================================================================
// Locations
// =============================================================================

/// The closed set of location kinds a batch can live at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum LocationKind {
    Branch,
    Warehouse,
}

impl LocationKind {
    /// Stable lowercase name, as persisted.
    pub fn as_str(&self) -> &'static str {
        match self {
            LocationKind::Branch => "branch",
            LocationKind::Warehouse => "warehouse",
        }
    }
}

impl fmt::Display for LocationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LocationKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "branch" => Ok(LocationKind::Branch),
            "warehouse" => Ok(LocationKind::Warehouse),
            other => Err(CoreError::UnknownLocationKind(other.to_string())),
        }
    }
}

/// A stock location: a branch or a warehouse.
///
/// Adding a third kind is a compile-time change: every `match` on this enum
/// has to be revisited.
///
/// The derived ordering (branches before warehouses, then by id) is the
/// order in which (item, location) locks are acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Location {
    Branch(i64),
    Warehouse(i64),
}

impl Location {
    /// Builds a location from its persisted (kind, id) pair.
    pub fn new(kind: LocationKind, id: i64) -> Self {
        match kind {
            LocationKind::Branch => Location::Branch(id),
            LocationKind::Warehouse => Location::Warehouse(id),
        }
    }

    /// Parses an untyped kind name coming from a collaborator.
    pub fn parse(kind: &str, id: i64) -> Result<Self, CoreError> {
        Ok(Location::new(kind.parse()?, id))
    }

    pub fn kind(&self) -> LocationKind {
        match self {
            Location::Branch(_) => LocationKind::Branch,
            Location::Warehouse(_) => LocationKind::Warehouse,
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            Location::Branch(id) | Location::Warehouse(id) => *id,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

/// A resolved location with its human-facing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LocationRef {
    pub location: Location,
    /// Short code (e.g. "HQ", "WH-EAST").
    pub code: String,
    pub name: String,
    /// Branch that owns the location; a branch owns itself.
    pub branch_id: i64,
}

// =============================================================================
// Master Data
// =============================================================================

/// A stock-keeping item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Item {
    pub id: i64,
    pub sku: String,
    pub name: String,
    /// Fallback cost for inbound movements with no supplied or prior cost.
    #[cfg_attr(feature = "sqlx", sqlx(rename = "standard_cost_cents"))]
    pub standard_cost: Money,
}

/// A branch: both a stock location and the scope of document numbering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Branch {
    pub id: i64,
    pub code: String,
    pub name: String,
}

/// A warehouse, always owned by one branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Warehouse {
    pub id: i64,
    pub branch_id: i64,
    pub code: String,
    pub name: String,
}

/// A document type and its short code prefix ("Purchase Order" → "PO").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct DocumentPrefix {
    pub id: i64,
    pub document_type: String,
    pub code: String,
}

// =============================================================================
// Movement Kind
// =============================================================================

/// The kind of a ledger movement.
///
/// ## Sign Rules
/// | Kind | Quantity sign |
/// |---|---|
/// | `In`, `Increased` | positive |
/// | `Out`, `Decreased` | negative |
/// | `Balanced` | either (audit correction) |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    /// Ordinary inbound trade movement (receipt, transfer arrival).
    In,
    /// Ordinary outbound trade movement (waybill, transfer dispatch).
    Out,
    /// Positive stock adjustment.
    Increased,
    /// Negative stock adjustment.
    Decreased,
    /// Stock audit correction, either direction.
    Balanced,
}

impl MovementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementKind::In => "in",
            MovementKind::Out => "out",
            MovementKind::Increased => "increased",
            MovementKind::Decreased => "decreased",
            MovementKind::Balanced => "balanced",
        }
    }

    /// Whether a signed quantity is acceptable for this kind.
    pub fn accepts(&self, quantity: i64) -> bool {
        match self {
            MovementKind::In | MovementKind::Increased => quantity > 0,
            MovementKind::Out | MovementKind::Decreased => quantity < 0,
            MovementKind::Balanced => quantity != 0,
        }
    }
}

impl fmt::Display for MovementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Batches
// =============================================================================

/// Lifecycle of a batch for consumption purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    /// remaining > 0
    Open,
    /// remaining = 0; terminal but retained for audit.
    Exhausted,
}

/// A cost-homogeneous lot of one item at one location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ItemBatch {
    pub id: i64,
    pub item_id: i64,
    pub location: Location,
    /// FIFO ordering key.
    #[ts(as = "String")]
    pub received_at: DateTime<Utc>,
    pub unit_cost: Money,
    /// Quantity the batch was opened with.
    pub opening_quantity: i64,
    /// The only mutable field. Never negative.
    pub remaining_quantity: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl ItemBatch {
    /// Builds an in-memory batch (planning and tests).
    pub fn new(
        id: i64,
        item_id: i64,
        location: Location,
        received_at: DateTime<Utc>,
        unit_cost: Money,
        quantity: i64,
    ) -> Self {
        ItemBatch {
            id,
            item_id,
            location,
            received_at,
            unit_cost,
            opening_quantity: quantity,
            remaining_quantity: quantity,
            created_at: received_at,
        }
    }

    pub fn state(&self) -> BatchState {
        if self.remaining_quantity > 0 {
            BatchState::Open
        } else {
            BatchState::Exhausted
        }
    }

    /// Cost of what is still on hand in this batch.
    pub fn remaining_value(&self) -> Money {
        self.unit_cost.multiply_quantity(self.remaining_quantity)
    }
}

// =============================================================================
// Movements
// =============================================================================

/// The document a movement belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DocumentRef {
    /// Document type name ("Goods Receipt").
    pub document_type: String,
    /// Rendered document code ("GR-HQ-1026-0001").
    pub code: String,
    /// Reservation backing the code, when the code came from the allocator.
    pub reservation_id: Option<i64>,
}

impl DocumentRef {
    /// A reference without a backing reservation (imports, opening stock).
    pub fn new(document_type: impl Into<String>, code: impl Into<String>) -> Self {
        DocumentRef {
            document_type: document_type.into(),
            code: code.into(),
            reservation_id: None,
        }
    }
}

/// An immutable ledger fact: one quantity change to one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StockMovement {
    pub id: i64,
    /// Groups every movement written by one unit of work.
    pub work_unit_id: String,
    pub batch_id: i64,
    pub item_id: i64,
    pub location: Location,
    pub kind: MovementKind,
    pub previous_quantity: i64,
    /// Signed.
    pub movement_quantity: i64,
    pub after_quantity: i64,
    /// Unit cost of the batch touched.
    pub unit_cost: Money,
    pub document_type: String,
    pub document_code: String,
    pub reservation_id: Option<i64>,
    /// Effective (document) time; drives `StockAsOf`.
    #[ts(as = "String")]
    pub occurred_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub recorded_at: DateTime<Utc>,
}

impl StockMovement {
    /// `previous + movement = after`, and nothing goes below zero.
    pub fn is_consistent(&self) -> bool {
        self.previous_quantity >= 0
            && self.after_quantity >= 0
            && self.previous_quantity + self.movement_quantity == self.after_quantity
    }

    /// Cost carried by this movement (negative for outbound).
    pub fn value(&self) -> Money {
        self.unit_cost.multiply_quantity(self.movement_quantity)
    }
}

// =============================================================================
// Sequences
// =============================================================================

/// Lifecycle of an issued sequence integer.
///
/// ```text
///            reserve             confirm
/// (new) ──────────────► Reserved ─────────► Confirmed
///                          │
///                          │ release / expiry reclaim
///                          ▼
///                      Available ──(dense mode only)──► Reserved
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SequenceStatus {
    Available,
    Reserved,
    Confirmed,
}

/// A calendar month that partitions sequence counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Period {
    pub month: u32,
    pub year: i32,
}

impl Period {
    pub fn of(when: DateTime<Utc>) -> Self {
        Period {
            month: when.month(),
            year: when.year(),
        }
    }
}

/// The key under which sequence integers are issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SequenceScope {
    pub prefix_id: i64,
    pub branch_id: i64,
    pub period: Period,
}

impl fmt::Display for SequenceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "prefix:{}/branch:{}/{:04}-{:02}",
            self.prefix_id, self.branch_id, self.period.year, self.period.month
        )
    }
}

/// What the allocator hands back from `reserve`.
///
/// The handle is all a workflow needs to confirm or release the number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ReservationHandle {
    pub reservation_id: i64,
    pub counter_id: i64,
    /// Scope the number was drawn in; confirming requires its lock.
    pub scope: SequenceScope,
    pub document_type: String,
    pub number: i64,
    pub code: String,
    pub holder: String,
    #[ts(as = "String")]
    pub expires_at: DateTime<Utc>,
    /// Issue generation of the row; a reissued number invalidates older
    /// handles to it.
    pub reissue_count: i64,
}

impl ReservationHandle {
    /// Document reference to stamp on the movements of this document.
    pub fn document_ref(&self) -> DocumentRef {
        DocumentRef {
            document_type: self.document_type.clone(),
            code: self.code.clone(),
            reservation_id: Some(self.reservation_id),
        }
    }
}

/// A persisted reservation row (audit view).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct SequenceReservation {
    pub id: i64,
    pub counter_id: i64,
    pub holder: String,
    pub number: i64,
    pub code: String,
    pub status: SequenceStatus,
    #[ts(as = "Option<String>")]
    pub expires_at: Option<DateTime<Utc>>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub confirmed_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub released_at: Option<DateTime<Utc>>,
    /// How many times this integer was handed out again (dense mode).
    pub reissue_count: i64,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_location_kind_parse() {
        assert_eq!("branch".parse::<LocationKind>().unwrap(), LocationKind::Branch);
        assert_eq!(" Warehouse ".parse::<LocationKind>().unwrap(), LocationKind::Warehouse);
        assert!(matches!(
            "store".parse::<LocationKind>(),
            Err(CoreError::UnknownLocationKind(k)) if k == "store"
        ));
    }

    #[test]
    fn test_location_ordering_is_kind_then_id() {
        let mut locations = vec![
            Location::Warehouse(1),
            Location::Branch(9),
            Location::Branch(2),
        ];
        locations.sort();
        assert_eq!(
            locations,
            vec![Location::Branch(2), Location::Branch(9), Location::Warehouse(1)]
        );
    }

    #[test]
    fn test_location_wire_shape() {
        let json = serde_json::to_string(&Location::Warehouse(4)).unwrap();
        assert_eq!(json, r#"{"kind":"warehouse","id":4}"#);
    }

    #[test]
    fn test_movement_kind_sign_rules() {
        assert!(MovementKind::In.accepts(5));
        assert!(!MovementKind::In.accepts(-5));
        assert!(MovementKind::Out.accepts(-5));
        assert!(!MovementKind::Decreased.accepts(0));
        assert!(MovementKind::Balanced.accepts(-2));
        assert!(MovementKind::Balanced.accepts(2));
        assert!(!MovementKind::Balanced.accepts(0));
    }

    #[test]
    fn test_period_from_date() {
        let when = Utc.with_ymd_and_hms(2026, 10, 19, 23, 59, 0).unwrap();
        assert_eq!(Period::of(when), Period { month: 10, year: 2026 });
    }

    #[test]
    fn test_batch_state() {
        let when = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut batch = ItemBatch::new(1, 1, Location::Branch(1), when, Money::from_cents(500), 3);
        assert_eq!(batch.state(), BatchState::Open);
        assert_eq!(batch.remaining_value().cents(), 1500);
        batch.remaining_quantity = 0;
        assert_eq!(batch.state(), BatchState::Exhausted);
    }
}
