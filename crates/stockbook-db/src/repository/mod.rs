//! # Repository Module
//!
//! SQL access for the Stockbook tables.
//!
//! ## Two Layers per Table
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  db.items().get(7)              ← pool-level repository struct          │
//! │       │                           (acquires its own connection)         │
//! │       ▼                                                                 │
//! │  item::get(&mut conn, 7)        ← pub(crate) free function              │
//! │       ▲                           (runs on any connection)              │
//! │       │                                                                 │
//! │  UnitOfWork / SequenceAllocator ← pass the open transaction             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Writes that must be atomic with other writes (batches, movements,
//! reservation transitions) only exist as free functions, so they cannot be
//! called outside a transaction by accident.

pub mod batch;
pub mod item;
pub mod location;
pub mod movement;
pub mod prefix;
pub(crate) mod sequence;
