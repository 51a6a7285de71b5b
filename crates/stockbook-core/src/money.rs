//! # Money Module
//!
//! Provides the `Money` type used for unit costs and cost-of-goods-sold.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │  Weighted cost over two lots in floating point:                         │
//! │    (10 × 100.00 + 5 × 120.00) / 15 = 106.66666666666667                 │
//! │    × 15 = 1600.0000000000002   ❌ COGS drifts from the lots consumed    │
//! │                                                                         │
//! │  OUR SOLUTION: Integer minor units                                      │
//! │    total   = 160000 (exact, sum of lot costs)                           │
//! │    per unit = 10667 (rounded half-up, reported for display/pricing)     │
//! │    The exact total is always kept next to the rounded unit cost         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use stockbook_core::money::Money;
//!
//! let lot_cost = Money::from_major_minor(100, 0);   // 100.00
//! let consumed = lot_cost.multiply_quantity(10);    // 1000.00
//! assert_eq!(consumed.cents(), 100_000);
//!
//! let per_unit = Money::weighted_unit(Money::from_cents(160_000), 15);
//! assert_eq!(per_unit.cents(), 10_667);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Sub};
use ts_rs::TS;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in the smallest currency unit.
///
/// ## Where Money is Used
/// ```text
/// ItemBatch.unit_cost ──► ConsumptionPlan.total_cost ──► weighted_unit_cost
///        │                                                      │
///        └──► StockMovement.unit_cost              Transfer destination batch
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(transparent))]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from minor units.
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Creates a Money value from major and minor units.
    ///
    /// ## Example
    /// ```rust
    /// use stockbook_core::money::Money;
    ///
    /// assert_eq!(Money::from_major_minor(106, 67).cents(), 10667);
    /// assert_eq!(Money::from_major_minor(-5, 50).cents(), -550);
    /// ```
    ///
    /// ## Note
    /// For negative amounts, only the major unit should be negative.
    #[inline]
    pub const fn from_major_minor(major: i64, minor: i64) -> Self {
        if major < 0 {
            Money(major * 100 - minor)
        } else {
            Money(major * 100 + minor)
        }
    }

    /// Returns the value in minor units.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns the major unit portion.
    #[inline]
    pub const fn major(&self) -> i64 {
        self.0 / 100
    }

    /// Returns the minor unit portion (always 0-99).
    #[inline]
    pub const fn minor(&self) -> i64 {
        (self.0 % 100).abs()
    }

    /// Returns zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    /// Checks if the value is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checks if the value is negative (less than zero).
    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Multiplies a unit cost by a quantity.
    ///
    /// ## Example
    /// ```rust
    /// use stockbook_core::money::Money;
    ///
    /// let unit_cost = Money::from_cents(12_000);
    /// assert_eq!(unit_cost.multiply_quantity(5).cents(), 60_000);
    /// ```
    #[inline]
    pub const fn multiply_quantity(&self, qty: i64) -> Self {
        Money(self.0 * qty)
    }

    /// Like [`Money::multiply_quantity`], but `None` on overflow.
    ///
    /// ```rust
    /// use stockbook_core::money::Money;
    ///
    /// assert_eq!(Money::from_cents(250).checked_multiply_quantity(4), Some(Money::from_cents(1_000)));
    /// assert_eq!(Money::from_cents(i64::MAX).checked_multiply_quantity(2), None);
    /// ```
    #[inline]
    pub const fn checked_multiply_quantity(&self, qty: i64) -> Option<Self> {
        match self.0.checked_mul(qty) {
            Some(cents) => Some(Money(cents)),
            None => None,
        }
    }

    /// Sum of two amounts, `None` on overflow.
    #[inline]
    pub const fn checked_add(&self, other: Money) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(cents) => Some(Money(cents)),
            None => None,
        }
    }

    /// Divides a total cost over a quantity, rounding half away from zero.
    ///
    /// ## Implementation
    /// Integer math on i128: `(2 × total + qty) / (2 × qty)` for positive
    /// totals, mirrored for negative ones. A zero quantity is a caller bug:
    /// it asserts in debug builds and yields zero in release builds.
    ///
    /// ## Example
    /// ```rust
    /// use stockbook_core::money::Money;
    ///
    /// // (10 × 100.00 + 5 × 120.00) / 15
    /// let total = Money::from_cents(160_000);
    /// assert_eq!(Money::weighted_unit(total, 15).cents(), 10_667);
    /// assert_eq!(Money::weighted_unit(Money::from_cents(10), 4).cents(), 3); // 2.5 → 3
    /// ```
    pub fn weighted_unit(total: Money, qty: i64) -> Money {
        debug_assert!(qty != 0, "weighted unit cost over an empty quantity");
        if qty == 0 {
            return Money::zero();
        }
        let total = total.0 as i128;
        let qty = qty.abs() as i128;
        let rounded = if total >= 0 {
            (2 * total + qty) / (2 * qty)
        } else {
            -((2 * -total + qty) / (2 * qty))
        };
        Money(rounded as i64)
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Display shows a plain decimal amount (`106.67`); currency symbols belong
/// to the presentation layer.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}{}.{:02}", sign, self.major().abs(), self.minor())
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_major_minor() {
        assert_eq!(Money::from_major_minor(10, 99).cents(), 1099);
        assert_eq!(Money::from_major_minor(-5, 50).cents(), -550);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Money::from_cents(10667)), "106.67");
        assert_eq!(format!("{}", Money::from_cents(500)), "5.00");
        assert_eq!(format!("{}", Money::from_cents(-550)), "-5.50");
        assert_eq!(format!("{}", Money::zero()), "0.00");
    }

    #[test]
    fn test_weighted_unit_rounds_half_up() {
        assert_eq!(Money::weighted_unit(Money::from_cents(160_000), 15).cents(), 10_667);
        assert_eq!(Money::weighted_unit(Money::from_cents(5), 2).cents(), 3);
        assert_eq!(Money::weighted_unit(Money::from_cents(4), 3).cents(), 1);
        assert_eq!(Money::weighted_unit(Money::from_cents(-5), 2).cents(), -3);
    }

    #[test]
    fn test_weighted_unit_ignores_quantity_sign() {
        let total = Money::from_cents(50_000);
        assert_eq!(Money::weighted_unit(total, -5), Money::weighted_unit(total, 5));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "empty quantity")]
    fn test_weighted_unit_over_zero_quantity_asserts() {
        Money::weighted_unit(Money::from_cents(50_000), 0);
    }

    #[test]
    fn test_checked_arithmetic_reports_overflow() {
        let cap = Money::from_cents(crate::MAX_UNIT_COST_CENTS);
        assert!(cap.checked_multiply_quantity(crate::MAX_MOVEMENT_QUANTITY).is_some());
        assert_eq!(Money::from_cents(10_000_000_000_000).checked_multiply_quantity(1_000_000), None);
        assert_eq!(Money::from_cents(i64::MAX).checked_add(Money::from_cents(1)), None);
    }

    #[test]
    fn test_sum_of_lot_costs() {
        let lots = [
            Money::from_cents(10_000).multiply_quantity(10),
            Money::from_cents(12_000).multiply_quantity(5),
        ];
        let total: Money = lots.iter().copied().sum();
        assert_eq!(total.cents(), 160_000);
    }
}
