//! Engine error types.

use thiserror::Error;

use usher_cache::CacheError;
use usher_domain::{DomainError, EventId, OrderId, OrderStatus};
use usher_gateway::GatewayError;
use usher_store::StoreError;

/// Errors surfaced by reservation engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Lock contended or the lock service failed; nothing was mutated
    #[error("Event is busy, try again")]
    Busy,

    /// Not enough seats remain
    #[error("Sold out: {available} seats remaining")]
    SoldOut {
        /// Seats actually remaining
        available: u32,
    },

    /// The buyer already holds a place at this event
    #[error("Already joined this event")]
    AlreadyJoined,

    /// Organizers may not book their own events
    #[error("Organizers cannot book their own event")]
    SelfBooking,

    /// Free events grant at most one seat per buyer
    #[error("Free events are limited to one seat per buyer")]
    FreeEventCap,

    /// Event does not exist
    #[error("Event not found: {0}")]
    EventNotFound(EventId),

    /// Order does not exist
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// Order belongs to a different buyer
    #[error("Order belongs to another buyer")]
    Unauthorized,

    /// Order status does not allow cancellation
    #[error("Order cannot be cancelled in status {status}")]
    CannotCancel {
        /// The status that blocked the cancel
        status: OrderStatus,
    },

    /// Domain validation error
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Cache error
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Gateway error
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),
}

impl EngineError {
    /// Whether nothing was mutated and the caller may simply retry.
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::Busy => true,
            EngineError::Cache(_) => true,
            EngineError::Gateway(e) => e.is_transient(),
            EngineError::Store(StoreError::Connection(_)) => true,
            _ => false,
        }
    }

    /// Whether this is a domain conflict rather than a fault.
    ///
    /// Conflicts are final for the request that hit them; retrying without
    /// changed inputs yields the same answer.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            EngineError::SoldOut { .. }
                | EngineError::AlreadyJoined
                | EngineError::SelfBooking
                | EngineError::FreeEventCap
        )
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
