//! Usher Domain Layer
//!
//! Pure domain logic with zero I/O dependencies.
//! Contains entities, value objects, and domain rules.

#![warn(missing_docs)]
#![warn(clippy::all)]

// Public modules
pub mod entities;
pub mod value_objects;

// Re-export commonly used types
pub use entities::{
    Attendee, BuyerId, Event, EventCategory, EventId, ExpirationJob, LedgerEntry,
    NotificationEffect, Order, OrderId, OrderStatus,
};
pub use value_objects::{DomainError, Price, SeatQuantity};
