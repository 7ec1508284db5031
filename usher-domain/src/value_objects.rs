//! Value Objects for the Usher Domain
//!
//! Immutable, validated domain primitives.
//! All value objects enforce invariants at construction time.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Domain errors for value object validation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    /// Price must be non-negative
    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    /// Quantity must be within the per-order bounds
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    /// Seat capacity must be at least 1
    #[error("Invalid capacity: {0}")]
    InvalidCapacity(String),

    /// Unknown event category
    #[error("Invalid category: {0}")]
    InvalidCategory(String),

    /// Unknown order status label
    #[error("Invalid order status: {0}")]
    InvalidStatus(String),
}

// =============================================================================
// Price
// =============================================================================

/// Price per seat in the quote currency
///
/// # Invariants
/// - Must be >= 0 (zero means the event is free to join)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Price(Decimal);

impl Price {
    /// Create a new Price with validation
    ///
    /// # Errors
    /// Returns `DomainError::InvalidPrice` if value < 0
    pub fn new(value: Decimal) -> Result<Self, DomainError> {
        if value < Decimal::ZERO {
            return Err(DomainError::InvalidPrice("Price cannot be negative".to_string()));
        }
        Ok(Self(value))
    }

    /// Get the underlying Decimal value
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// Create a zero price (free event)
    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    /// Whether this price means the event is free
    pub fn is_free(&self) -> bool {
        self.0.is_zero()
    }

    /// Per-seat price in integer cents, as payment gateways bill it
    ///
    /// Returns `None` if the value does not fit in an `i64` after scaling.
    pub fn as_cents(&self) -> Option<i64> {
        (self.0 * Decimal::from(100)).trunc().to_i64()
    }

    /// Total charge for `quantity` seats
    pub fn total(&self, quantity: SeatQuantity) -> Decimal {
        self.0 * Decimal::from(quantity.get())
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// SeatQuantity
// =============================================================================

/// Number of seats requested in a single order
///
/// # Invariants
/// - Must be between 1 and [`SeatQuantity::MAX`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeatQuantity(u32);

impl SeatQuantity {
    /// Most seats a single order may hold
    pub const MAX: u32 = 4;

    /// Create a new SeatQuantity with validation
    ///
    /// # Errors
    /// Returns `DomainError::InvalidQuantity` if value is 0 or above `MAX`
    pub fn new(value: u32) -> Result<Self, DomainError> {
        if value == 0 {
            return Err(DomainError::InvalidQuantity("Quantity must be at least 1".to_string()));
        }
        if value > Self::MAX {
            return Err(DomainError::InvalidQuantity(format!(
                "Quantity cannot exceed {} seats per order",
                Self::MAX
            )));
        }
        Ok(Self(value))
    }

    /// Get the underlying count
    pub fn get(&self) -> u32 {
        self.0
    }

    /// A single seat
    pub fn one() -> Self {
        Self(1)
    }
}

impl fmt::Display for SeatQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Tests
// =============================================================================
