//! # stockbook-core: Pure Logic for the Stockbook Ledger
//!
//! This crate holds everything about document numbering and batch costing
//! that can be expressed without touching a database.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Stockbook Architecture                           │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │          Document workflows (receipts, waybills, audits)        │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ in-process calls                       │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 stockbook-db (Database Layer)                   │   │
//! │  │   SequenceAllocator • Ledger • UnitOfWork • repositories        │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ stockbook-core (THIS CRATE) ★                   │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │   fifo    │  │ sequence  │  │ validation│  │   │
//! │  │   │  Batch    │  │  planner  │  │ CodeFormat│  │   rules   │  │   │
//! │  │   │  Movement │  │  balance  │  │  Period   │  │  checks   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO WALL CLOCK • PURE FUNCTIONS        │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain records (ItemBatch, StockMovement, Location, ...)
//! - [`money`] - Money type with integer arithmetic (no floating point!)
//! - [`fifo`] - FIFO consumption planning and audit balancing decisions
//! - [`sequence`] - Document code rendering and sequence periods
//! - [`clock`] - Injectable time source
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation
//!
//! ## Example Usage
//!
//! ```rust
//! use stockbook_core::fifo::plan_consumption;
//! use stockbook_core::money::Money;
//! use stockbook_core::types::{ItemBatch, Location};
//! use chrono::{TimeZone, Utc};
//!
//! let older = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
//! let newer = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
//! let shelf = Location::Branch(1);
//! let batches = vec![
//!     ItemBatch::new(1, 7, shelf, older, Money::from_major_minor(100, 0), 10),
//!     ItemBatch::new(2, 7, shelf, newer, Money::from_major_minor(120, 0), 10),
//! ];
//!
//! let plan = plan_consumption(7, shelf, &batches, 15).unwrap();
//! assert_eq!(plan.draws.len(), 2);
//! assert_eq!(plan.weighted_unit_cost().cents(), 10667); // 106.67
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod clock;
pub mod error;
pub mod fifo;
pub mod money;
pub mod sequence;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Default lifetime of a sequence reservation before it can be reclaimed.
pub const DEFAULT_RESERVATION_TTL_SECS: u64 = 900;

/// Default zero-padding width of the integer part of a document code.
pub const DEFAULT_SEQUENCE_DIGITS: usize = 4;

/// Largest quantity a single movement may carry.
///
/// ## Business Reason
/// Catches unit mistakes (grams typed as kilograms) before they reach the
/// ledger, where they could only be undone by a compensating movement.
pub const MAX_MOVEMENT_QUANTITY: i64 = 10_000_000;

/// Largest unit cost, in minor units, an inbound movement or item may carry.
///
/// ## Business Reason
/// One billion in major units is far beyond any stocked item. At this cap
/// `MAX_UNIT_COST_CENTS × MAX_MOVEMENT_QUANTITY` stays inside `i64`, so a
/// movement's total cost can always be represented.
pub const MAX_UNIT_COST_CENTS: i64 = 100_000_000_000;
