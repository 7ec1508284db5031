//! Domain Entities for Usher
//!
//! Core business entities with lifecycle management.
//! All entities have identity and state transitions.

use crate::value_objects::{DomainError, Price, SeatQuantity};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Identifiers
// =============================================================================

/// Unique identifier for an Event
pub type EventId = Uuid;

/// Unique identifier for an Order
pub type OrderId = Uuid;

/// Unique identifier for a buyer (or organizer)
pub type BuyerId = Uuid;

// =============================================================================
// Event
// =============================================================================

/// Event is the finite-capacity sellable resource.
///
/// Key concepts:
/// - `available_seats` is bounded: `0 <= available_seats <= total_seats`
/// - Seat counts are only ever mutated inside store transactions
/// - A zero price means the event is free and confirms synchronously
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub name: String,
    pub location: String,
    pub category: EventCategory,
    pub price: Price,

    // Capacity
    pub total_seats: u32,
    pub available_seats: u32,

    // Audit
    pub organizer_id: BuyerId,
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// Create a new event with all seats available
    ///
    /// # Errors
    /// Returns `DomainError::InvalidCapacity` if `total_seats` is 0
    pub fn new(
        name: String,
        location: String,
        category: EventCategory,
        price: Price,
        total_seats: u32,
        organizer_id: BuyerId,
    ) -> Result<Self, DomainError> {
        if total_seats == 0 {
            return Err(DomainError::InvalidCapacity(
                "Event must have at least one seat".to_string(),
            ));
        }

        Ok(Self {
            id: Uuid::now_v7(),
            name,
            location,
            category,
            price,
            total_seats,
            available_seats: total_seats,
            organizer_id,
            created_at: Utc::now(),
        })
    }

    /// Whether this event is free to join
    pub fn is_free(&self) -> bool {
        self.price.is_free()
    }

    /// Whether no seats remain
    pub fn is_sold_out(&self) -> bool {
        self.available_seats == 0
    }

    /// Whether `quantity` seats can still be granted
    pub fn has_capacity(&self, quantity: SeatQuantity) -> bool {
        self.available_seats >= quantity.get()
    }
}

/// Category an event is listed under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    /// Social and entertainment
    Fun,
    /// Sports and fitness
    Sports,
    /// Talks, courses, workshops
    Educational,
    /// Anything else
    Other,
}

impl EventCategory {
    /// Get the name of the category for display/storage
    pub fn name(&self) -> &str {
        match self {
            EventCategory::Fun => "fun",
            EventCategory::Sports => "sports",
            EventCategory::Educational => "educational",
            EventCategory::Other => "other",
        }
    }

    /// Parse a category from its stored label
    ///
    /// # Errors
    /// Returns `DomainError::InvalidCategory` for unknown labels
    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value {
            "fun" => Ok(EventCategory::Fun),
            "sports" => Ok(EventCategory::Sports),
            "educational" => Ok(EventCategory::Educational),
            "other" => Ok(EventCategory::Other),
            other => Err(DomainError::InvalidCategory(other.to_string())),
        }
    }
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// =============================================================================
// Order
// =============================================================================

/// Order represents a buyer's attempt to acquire seats at an event.
///
/// Created in `Pending` at reserve time. Transitions are one-directional;
/// two paths converging on a terminal state must agree on the result
/// (release vs. manual cancel), which the store transactions enforce.
/// Orders are never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub event_id: EventId,
    pub buyer_id: BuyerId,

    pub quantity: SeatQuantity,
    pub amount: Decimal,
    pub status: OrderStatus,

    /// Gateway checkout session backing this order (priced events only)
    pub checkout_session_id: Option<String>,
    /// Failure reason when status is `Failed`
    pub error: Option<String>,

    // Audit
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Create a new pending order
    pub fn pending(
        event_id: EventId,
        buyer_id: BuyerId,
        quantity: SeatQuantity,
        amount: Decimal,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            event_id,
            buyer_id,
            quantity,
            amount,
            status: OrderStatus::Pending,
            checkout_session_id: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the hold behind this order has already been returned
    /// (seat credit must not happen a second time)
    pub fn is_closed(&self) -> bool {
        matches!(self.status, OrderStatus::Expired | OrderStatus::Cancelled)
    }

    /// Whether the buyer may still cancel this order
    pub fn is_cancellable(&self) -> bool {
        matches!(self.status, OrderStatus::Pending | OrderStatus::Failed)
    }

    /// Whether payment completed for this order
    pub fn is_settled(&self) -> bool {
        matches!(self.status, OrderStatus::Paid | OrderStatus::Confirmed)
    }
}

/// Order status lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Created at reserve time, awaiting payment outcome
    Pending,
    /// Free event, granted synchronously
    Confirmed,
    /// Payment succeeded
    Paid,
    /// Hold released (timeout or reconciliation)
    Expired,
    /// Reserve flow failed after the order was created
    Failed,
    /// Administratively cancelled
    Cancelled,
}

impl OrderStatus {
    /// Get the name of the status for display/storage
    pub fn name(&self) -> &str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Paid => "paid",
            OrderStatus::Expired => "expired",
            OrderStatus::Failed => "failed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Parse a status from its stored label
    ///
    /// # Errors
    /// Returns `DomainError::InvalidStatus` for unknown labels
    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value {
            "pending" => Ok(OrderStatus::Pending),
            "confirmed" => Ok(OrderStatus::Confirmed),
            "paid" => Ok(OrderStatus::Paid),
            "expired" => Ok(OrderStatus::Expired),
            "failed" => Ok(OrderStatus::Failed),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(DomainError::InvalidStatus(other.to_string())),
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// =============================================================================
// Attendee
// =============================================================================

/// Attendee is durable proof that a buyer secured a place at an event.
///
/// Keyed by `(event_id, buyer_id)`. Its existence check inside the store
/// transaction is the duplicate-join guard. Created exactly once, either
/// synchronously (free event) or on payment confirmation (priced event).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attendee {
    pub event_id: EventId,
    pub buyer_id: BuyerId,
    pub email: String,
    pub order_id: Option<OrderId>,
    pub joined_at: DateTime<Utc>,
}

impl Attendee {
    /// Create a new attendee record
    pub fn new(
        event_id: EventId,
        buyer_id: BuyerId,
        email: String,
        order_id: Option<OrderId>,
    ) -> Self {
        Self {
            event_id,
            buyer_id,
            email,
            order_id,
            joined_at: Utc::now(),
        }
    }
}

// =============================================================================
// Idempotency Ledger
// =============================================================================

/// Ledger entry marking an external notification as already processed.
///
/// Written in the same store transaction as the side effect it guards, so
/// at-least-once notification delivery produces at-most-once effects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// External notification identifier (the idempotency key)
    pub notification_id: String,
    /// What the guarded transaction did
    pub effect: NotificationEffect,
    pub order_id: Option<OrderId>,
    pub processed_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Create a ledger entry recorded at the current instant
    pub fn new(
        notification_id: String,
        effect: NotificationEffect,
        order_id: Option<OrderId>,
    ) -> Self {
        Self {
            notification_id,
            effect,
            order_id,
            processed_at: Utc::now(),
        }
    }
}

/// Side effect a processed notification produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationEffect {
    /// Attendance was finalized (payment succeeded)
    Confirmed,
    /// Seats were returned to the pool (payment failed or expired)
    Released,
}

impl NotificationEffect {
    /// Get the name of the effect for display/storage
    pub fn name(&self) -> &str {
        match self {
            NotificationEffect::Confirmed => "confirmed",
            NotificationEffect::Released => "released",
        }
    }

    /// Parse an effect from its stored label
    ///
    /// # Errors
    /// Returns `DomainError::InvalidStatus` for unknown labels
    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value {
            "confirmed" => Ok(NotificationEffect::Confirmed),
            "released" => Ok(NotificationEffect::Released),
            other => Err(DomainError::InvalidStatus(other.to_string())),
        }
    }
}

// =============================================================================
// Expiration Job
// =============================================================================

/// Scheduled future check that force-closes an abandoned checkout session.
///
/// Created when a priced reservation opens; the reaper drains due jobs and
/// asks the gateway to expire each referenced session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpirationJob {
    /// Checkout session to force-expire
    pub session_id: String,
    /// When the job becomes due
    pub due_at: DateTime<Utc>,
}

impl ExpirationJob {
    /// Create a job due at `due_at`
    pub fn new(session_id: String, due_at: DateTime<Utc>) -> Self {
        Self { session_id, due_at }
    }

    /// Whether the job is due at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.due_at <= now
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn create_test_event(seats: u32, price: Price) -> Event {
        Event::new(
            "Rustconf Afterparty".to_string(),
            "Warehouse 12".to_string(),
            EventCategory::Fun,
            price,
            seats,
            Uuid::now_v7(),
        )
        .unwrap()
    }

    #[test]
    fn test_event_creation() {
        let event = create_test_event(100, Price::new(dec!(25)).unwrap());

        assert_eq!(event.total_seats, 100);
        assert_eq!(event.available_seats, 100);
        assert!(!event.is_free());
        assert!(!event.is_sold_out());
    }

    #[test]
    fn test_event_rejects_zero_capacity() {
        let result = Event::new(
            "Empty".to_string(),
            "Nowhere".to_string(),
            EventCategory::Other,
            Price::zero(),
            0,
            Uuid::now_v7(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_event_capacity_checks() {
        let mut event = create_test_event(3, Price::zero());

        assert!(event.has_capacity(SeatQuantity::new(3).unwrap()));
        assert!(!event.has_capacity(SeatQuantity::new(4).unwrap()));

        event.available_seats = 0;
        assert!(event.is_sold_out());
        assert!(!event.has_capacity(SeatQuantity::one()));
    }

    #[test]
    fn test_order_pending_creation() {
        let order = Order::pending(
            Uuid::now_v7(),
            Uuid::now_v7(),
            SeatQuantity::new(2).unwrap(),
            dec!(50),
        );

        assert_eq!(order.status, OrderStatus::Pending);
        assert!(order.checkout_session_id.is_none());
        assert!(order.is_cancellable());
        assert!(!order.is_closed());
        assert!(!order.is_settled());
    }

    #[test]
    fn test_order_status_predicates() {
        let mut order =
            Order::pending(Uuid::now_v7(), Uuid::now_v7(), SeatQuantity::one(), dec!(10));

        order.status = OrderStatus::Expired;
        assert!(order.is_closed());
        assert!(!order.is_cancellable());

        order.status = OrderStatus::Cancelled;
        assert!(order.is_closed());

        order.status = OrderStatus::Paid;
        assert!(order.is_settled());
        assert!(!order.is_closed());

        order.status = OrderStatus::Failed;
        assert!(order.is_cancellable());
    }

    #[test]
    fn test_order_status_labels_round_trip() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Confirmed,
            OrderStatus::Paid,
            OrderStatus::Expired,
            OrderStatus::Failed,
            OrderStatus::Cancelled,
        ] {
            assert_eq!(OrderStatus::parse(status.name()).unwrap(), status);
        }
        assert!(OrderStatus::parse("refunded").is_err());
    }

    #[test]
    fn test_event_category_labels_round_trip() {
        for category in [
            EventCategory::Fun,
            EventCategory::Sports,
            EventCategory::Educational,
            EventCategory::Other,
        ] {
            assert_eq!(EventCategory::parse(category.name()).unwrap(), category);
        }
        assert!(EventCategory::parse("opera").is_err());
    }

    #[test]
    fn test_expiration_job_due() {
        let now = Utc::now();
        let due = ExpirationJob::new("cs_123".to_string(), now - chrono::Duration::seconds(1));
        let not_due = ExpirationJob::new("cs_456".to_string(), now + chrono::Duration::minutes(10));

        assert!(due.is_due(now));
        assert!(!not_due.is_due(now));
    }
}
