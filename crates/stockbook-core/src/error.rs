//! # Error Types
//!
//! Domain-specific error types for stockbook-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  stockbook-core errors (this file)                                     │
//! │  ├── CoreError        - Ledger and numbering rule violations           │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  stockbook-db errors (separate crate)                                  │
//! │  └── DbError          - Database failures, wraps CoreError             │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → calling workflow        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Retry Classes
//! | Variant | Class | Caller reaction |
//! |---|---|---|
//! | `ScopeLocked` | transient | retry with backoff |
//! | `ReservationExpired` | stale handle | allocate a new code |
//! | `InsufficientStock` | business rule | show to the user |
//! | everything else | programming error | fail the request |

use thiserror::Error;

use crate::types::Location;

// =============================================================================
// Core Error
// =============================================================================

/// Ledger and sequence rule violations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A contended lock could not be obtained within the bounded wait.
    ///
    /// ## When This Occurs
    /// - Many documents are being numbered in the same branch and month
    /// - A long movement batch holds an (item, location) lock
    ///
    /// Transient: the operation can be retried.
    #[error("Scope {scope} is locked by another unit of work")]
    ScopeLocked { scope: String },

    /// The reservation passed its expiry (or was released) before it was
    /// confirmed.
    #[error("Reservation {code} expired before it was confirmed")]
    ReservationExpired { code: String },

    /// Attempted to release a number that already belongs to a document.
    #[error("Reservation {code} is already confirmed")]
    ReservationAlreadyConfirmed { code: String },

    /// Outbound quantity exceeds what the consumable batches hold.
    ///
    /// ## User Workflow
    /// ```text
    /// Waybill line: 25 × item 7 from Branch 1
    ///      │
    ///      ▼
    /// FIFO batches hold 10 + 10 = 20
    ///      │
    ///      ▼
    /// InsufficientStock { available: 20, requested: 25 }
    ///      │
    ///      ▼
    /// Nothing is written, document creation aborts
    /// ```
    #[error("Insufficient stock for item {item_id} at {location}: available {available}, requested {requested}")]
    InsufficientStock {
        item_id: i64,
        location: Location,
        available: i64,
        requested: i64,
    },

    /// Item does not exist.
    #[error("Item not found: {0}")]
    UnknownItem(i64),

    /// Location kind is valid but no such branch/warehouse exists.
    #[error("Location not found: {0}")]
    UnknownLocation(Location),

    /// Location kind is outside the closed set (branch, warehouse).
    #[error("Unknown location kind: {0}")]
    UnknownLocationKind(String),

    /// No document prefix registered for this document type.
    #[error("No prefix registered for document type '{0}'")]
    UnknownDocumentType(String),

    /// Zero quantity, or a sign that contradicts the movement kind.
    #[error("Quantity {quantity} is not valid for a {kind} movement")]
    NonPositiveQuantity { kind: String, quantity: i64 },

    /// A movement references a document whose code was never confirmed.
    #[error("Document {code} is not backed by a confirmed reservation")]
    ReferentialConflict { code: String },

    /// A unit of work touched a key it did not declare up front.
    #[error("Lock for {key} is not held by this unit of work")]
    LockNotHeld { key: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Returns true if the failure is contention and the call can be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, CoreError::ScopeLocked { .. })
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before any lock is taken or row is read.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Invalid format (e.g., lowercase prefix code).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// A backdated time falls before history it would have to follow
    /// (e.g., consuming a batch before it was received).
    #[error("{field} must not be earlier than {earliest}")]
    TooEarly { field: String, earliest: String },

    /// Two values that must differ are equal (e.g., transfer source and
    /// destination).
    #[error("{field} must differ: {reason}")]
    MustDiffer { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::InsufficientStock {
            item_id: 7,
            location: Location::Branch(1),
            available: 20,
            requested: 25,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient stock for item 7 at branch:1: available 20, requested 25"
        );
    }

    #[test]
    fn test_only_scope_locked_is_transient() {
        assert!(CoreError::ScopeLocked {
            scope: "PO/1/2026-10".into()
        }
        .is_transient());
        assert!(!CoreError::UnknownItem(1).is_transient());
        assert!(!CoreError::ReservationExpired {
            code: "PO-HQ-1026-0001".into()
        }
        .is_transient());
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "holder".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
