//! # stockbook-db: Ledger and Numbering Store for Stockbook
//!
//! Everything that writes stock or issues a document number goes through
//! this crate. It stores batches, movements and sequence reservations in
//! SQLite through sqlx, and serializes conflicting work with keyed locks.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Stockbook Data Flow                              │
//! │                                                                         │
//! │  post_document("Waybill", lines)                                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                  stockbook-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │  Sequence     │    │    Ledger     │    │  UnitOfWork  │  │   │
//! │  │   │  Allocator    │    │ (FIFO batches)│    │ locks + tx   │  │   │
//! │  │   └───────┬───────┘    └───────┬───────┘    └──────┬───────┘  │   │
//! │  │           │                    │                   │          │   │
//! │  │   ┌───────▼────────────────────▼───────────────────▼───────┐  │   │
//! │  │   │ Repositories: batch, movement, location, item, prefix  │  │   │
//! │  │   └────────────────────────────────────────────────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database (WAL)                       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool, settings and clock
//! - [`config`] - TOML configuration with environment overrides
//! - [`locks`] - Keyed locks over sequence scopes and stock keys
//! - [`unit_of_work`] - Locks plus one transaction, all-or-nothing
//! - [`sequence`] - Document number reservation, confirmation, release
//! - [`ledger`] - FIFO movements, transfers, balancing, stock queries
//! - [`posting`] - Number and post a whole document
//! - [`reclaim`] - Background reclaim of expired reservations
//! - [`repository`] - Row-level access per table
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stockbook_db::{Database, DbConfig, MovementRequest};
//!
//! let db = Database::new(DbConfig::new("stockbook.db")).await?;
//!
//! let handle = db.sequences().reserve("Goods Receipt", branch, now, "clerk-1").await?;
//! let request = MovementRequest::new(item_id, branch, MovementKind::In, 10, handle.document_ref());
//!
//! let mut uow = db.begin_work(WorkPlan::new().sequence(handle.scope).stock(item_id, branch)).await?;
//! uow.confirm(&handle).await?;
//! uow.apply_movement(&request).await?;
//! uow.commit().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod ledger;
pub mod locks;
pub mod migrations;
pub mod pool;
pub mod posting;
pub mod reclaim;
pub mod repository;
pub mod retry;
pub mod sequence;
pub mod unit_of_work;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::StockbookConfig;
pub use error::{DbError, DbResult};
pub use ledger::{
    BalanceOutcome, BalanceRequest, Ledger, MovementOutcome, MovementRequest, ReconcileReport,
    TransferOutcome, TransferRequest,
};
pub use locks::{KeyedLocks, LockKey};
pub use pool::{Database, DbConfig};
pub use posting::{DocumentLine, LineOutcome, PostDocument, PostedDocument};
pub use reclaim::{ReclaimWorker, ReclaimWorkerHandle};
pub use sequence::SequenceAllocator;
pub use unit_of_work::{UnitOfWork, WorkPlan};

// Repository re-exports for convenience
pub use repository::batch::BatchStore;
pub use repository::item::ItemRepository;
pub use repository::location::LocationRepository;
pub use repository::movement::MovementLog;
pub use repository::prefix::PrefixRepository;
