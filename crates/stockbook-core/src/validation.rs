//! # Validation Module
//!
//! Input validation for requests entering the allocator and the ledger.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Document workflow (caller)                                   │
//! │  ├── Form-level checks, user messaging                                 │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: stockbook-core                                               │
//! │  ├── THIS MODULE: shape and range of every field                       │
//! │  └── fifo::check_movement: quantity sign vs movement kind              │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: SQLite                                                       │
//! │  ├── CHECK (remaining_quantity >= 0)                                   │
//! │  ├── CHECK (previous + movement = after)                               │
//! │  └── triggers rejecting UPDATE/DELETE on stock_movements               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All validators run before a lock is requested, so a malformed request
//! never waits behind a busy scope.

use crate::error::ValidationError;
use crate::{MAX_MOVEMENT_QUANTITY, MAX_UNIT_COST_CENTS};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

fn required(field: &str, value: &str) -> ValidationResult<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }
    Ok(())
}

fn max_len(field: &str, value: &str, max: usize) -> ValidationResult<()> {
    if value.trim().chars().count() > max {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max,
        });
    }
    Ok(())
}

/// Upper-case letters, digits and hyphens only.
fn code_token(field: &str, value: &str, max: usize) -> ValidationResult<()> {
    required(field, value)?;
    max_len(field, value, max)?;

    if !value
        .trim()
        .chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: "use upper-case letters, digits and hyphens".to_string(),
        });
    }
    Ok(())
}

// =============================================================================
// String Validators
// =============================================================================

/// Validates a document type name ("Goods Receipt").
pub fn validate_document_type(name: &str) -> ValidationResult<()> {
    required("document type", name)?;
    max_len("document type", name, 100)
}

/// Validates a document prefix code.
///
/// ## Rules
/// - 1 to 8 characters
/// - Upper-case letters, digits and hyphens
///
/// ## Example
/// ```rust
/// use stockbook_core::validation::validate_prefix_code;
///
/// assert!(validate_prefix_code("GR").is_ok());
/// assert!(validate_prefix_code("gr").is_err());
/// ```
pub fn validate_prefix_code(code: &str) -> ValidationResult<()> {
    code_token("prefix code", code, 8)
}

/// Validates a branch or warehouse code.
pub fn validate_location_code(code: &str) -> ValidationResult<()> {
    code_token("location code", code, 16)
}

/// Validates the holder identity recorded on a reservation.
pub fn validate_holder(holder: &str) -> ValidationResult<()> {
    required("holder", holder)?;
    max_len("holder", holder, 100)
}

/// Validates a SKU.
///
/// ## Rules
/// - 1 to 50 characters
/// - Alphanumeric, hyphens, underscores
pub fn validate_sku(sku: &str) -> ValidationResult<()> {
    required("sku", sku)?;
    max_len("sku", sku, 50)?;

    if !sku
        .trim()
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: "sku".to_string(),
            reason: "only letters, numbers, hyphens, and underscores allowed".to_string(),
        });
    }
    Ok(())
}

pub fn validate_name(field: &str, name: &str) -> ValidationResult<()> {
    required(field, name)?;
    max_len(field, name, 200)
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates the magnitude of a signed movement quantity.
///
/// The sign itself is checked against the movement kind by
/// [`crate::fifo::check_movement`]; this only rejects absurd sizes.
///
/// ```rust
/// use stockbook_core::validation::validate_quantity;
///
/// assert!(validate_quantity(-25).is_ok());
/// assert!(validate_quantity(50_000_000).is_err());
/// ```
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty.checked_abs().map_or(true, |q| q > MAX_MOVEMENT_QUANTITY) {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: -MAX_MOVEMENT_QUANTITY,
            max: MAX_MOVEMENT_QUANTITY,
        });
    }
    Ok(())
}

/// Validates a unit cost in minor units. Zero is allowed (free samples).
pub fn validate_unit_cost(cents: i64) -> ValidationResult<()> {
    if !(0..=MAX_UNIT_COST_CENTS).contains(&cents) {
        return Err(ValidationError::OutOfRange {
            field: "unit cost".to_string(),
            min: 0,
            max: MAX_UNIT_COST_CENTS,
        });
    }
    Ok(())
}

/// Validates a physical count entered on a stock audit line.
pub fn validate_physical_count(count: i64) -> ValidationResult<()> {
    if !(0..=MAX_MOVEMENT_QUANTITY).contains(&count) {
        return Err(ValidationError::OutOfRange {
            field: "physical count".to_string(),
            min: 0,
            max: MAX_MOVEMENT_QUANTITY,
        });
    }
    Ok(())
}

/// Validates the zero-padding width of document numbers.
pub fn validate_sequence_digits(digits: usize) -> ValidationResult<()> {
    if !(1..=12).contains(&digits) {
        return Err(ValidationError::OutOfRange {
            field: "sequence digits".to_string(),
            min: 1,
            max: 12,
        });
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_prefix_code() {
        assert!(validate_prefix_code("PO").is_ok());
        assert!(validate_prefix_code("ST-IN").is_ok());

        assert!(validate_prefix_code("").is_err());
        assert!(validate_prefix_code("po").is_err());
        assert!(validate_prefix_code("P O").is_err());
        assert!(validate_prefix_code("TOOLONGPREFIX").is_err());
    }

    #[test]
    fn test_validate_sku() {
        assert!(validate_sku("COKE-330").is_ok());
        assert!(validate_sku("bolt_m8").is_ok());

        assert!(validate_sku("   ").is_err());
        assert!(validate_sku("has space").is_err());
        assert!(validate_sku(&"A".repeat(100)).is_err());
    }

    #[test]
    fn test_validate_holder() {
        assert!(validate_holder("clerk@hq").is_ok());
        assert!(validate_holder("").is_err());
    }

    #[test]
    fn test_validate_quantity() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(-MAX_MOVEMENT_QUANTITY).is_ok());
        assert!(validate_quantity(MAX_MOVEMENT_QUANTITY + 1).is_err());
        assert!(validate_quantity(i64::MIN).is_err());
    }

    #[test]
    fn test_validate_unit_cost_and_count() {
        assert!(validate_unit_cost(0).is_ok());
        assert!(validate_unit_cost(-1).is_err());
        assert!(validate_unit_cost(MAX_UNIT_COST_CENTS).is_ok());
        assert!(validate_unit_cost(MAX_UNIT_COST_CENTS + 1).is_err());
        assert!(validate_unit_cost(i64::MAX).is_err());
        assert!(validate_physical_count(0).is_ok());
        assert!(validate_physical_count(-3).is_err());
    }
}
