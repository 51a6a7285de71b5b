//! # Document Codes
//!
//! Rendering of the human-readable code handed out with each reserved number.
//!
//! ## Layout
//! ```text
//!   GR  -  HQ  -  10 26  -  0042
//!   ──     ──     ─────     ────
//!   │      │      │         └── number in scope, zero padded to `digits`
//!   │      │      └──────────── period month + two-digit year
//!   │      └─────────────────── branch code (optional)
//!   └────────────────────────── document prefix
//! ```
//!
//! A number wider than `digits` is rendered in full rather than truncated, so
//! codes stay unique even when a scope outgrows its padding.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::types::Period;
use crate::validation::validate_sequence_digits;
use crate::DEFAULT_SEQUENCE_DIGITS;

/// How document codes are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeFormat {
    pub digits: usize,
    pub include_branch: bool,
}

impl Default for CodeFormat {
    fn default() -> Self {
        CodeFormat {
            digits: DEFAULT_SEQUENCE_DIGITS,
            include_branch: true,
        }
    }
}

impl CodeFormat {
    pub fn new(digits: usize, include_branch: bool) -> Result<Self, ValidationError> {
        validate_sequence_digits(digits)?;
        Ok(CodeFormat {
            digits,
            include_branch,
        })
    }

    /// Renders the code for `number` in the given scope.
    ///
    /// ```rust
    /// use stockbook_core::sequence::CodeFormat;
    /// use stockbook_core::Period;
    ///
    /// let period = Period { month: 3, year: 2026 };
    /// assert_eq!(CodeFormat::default().render("PO", "HQ", period, 7), "PO-HQ-0326-0007");
    /// ```
    pub fn render(&self, prefix: &str, branch_code: &str, period: Period, number: i64) -> String {
        let yy = period.year.rem_euclid(100);
        let number = format!("{:0width$}", number, width = self.digits);
        if self.include_branch {
            format!("{}-{}-{:02}{:02}-{}", prefix, branch_code, period.month, yy, number)
        } else {
            format!("{}-{:02}{:02}-{}", prefix, period.month, yy, number)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn october() -> Period {
        Period { month: 10, year: 2026 }
    }

    #[test]
    fn test_render_with_branch() {
        let format = CodeFormat::default();
        assert_eq!(format.render("GR", "HQ", october(), 42), "GR-HQ-1026-0042");
    }

    #[test]
    fn test_render_without_branch() {
        let format = CodeFormat::new(6, false).unwrap();
        assert_eq!(format.render("SI", "HQ", october(), 42), "SI-1026-000042");
    }

    #[test]
    fn test_wide_number_is_not_truncated() {
        let format = CodeFormat::default();
        assert_eq!(format.render("WB", "HQ", october(), 123_456), "WB-HQ-1026-123456");
    }

    #[test]
    fn test_digit_width_is_bounded() {
        assert!(CodeFormat::new(0, true).is_err());
        assert!(CodeFormat::new(13, true).is_err());
    }
}
