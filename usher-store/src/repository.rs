//! Repository trait definitions (Ports)
//!
//! These traits define the storage interface for the domain.
//! Implementations can be PostgreSQL, in-memory, or mock for testing.
//!
//! Plain reads and writes live on the per-entity repositories. Every
//! capacity-changing decision lives on the aggregate [`Store`] as a named
//! conditional transaction with a typed outcome; the adapter supplies the
//! atomicity (a single write guard in memory, a SQL transaction in Postgres).

use crate::error::StoreError;
use async_trait::async_trait;
use usher_domain::{Attendee, BuyerId, Event, EventId, LedgerEntry, Order, OrderId, SeatQuantity};

/// Repository for Event entities
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Save an event (insert or update)
    async fn save(&self, event: &Event) -> Result<(), StoreError>;

    /// Find an event by ID
    async fn find_by_id(&self, id: EventId) -> Result<Option<Event>, StoreError>;

    /// List all events, newest first
    async fn list(&self) -> Result<Vec<Event>, StoreError>;
}

/// Repository for Order entities
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Save an order (insert or update)
    async fn save(&self, order: &Order) -> Result<(), StoreError>;

    /// Find an order by ID
    async fn find_by_id(&self, id: OrderId) -> Result<Option<Order>, StoreError>;

    /// Find all orders placed by a buyer, newest first
    async fn find_by_buyer(&self, buyer_id: BuyerId) -> Result<Vec<Order>, StoreError>;

    /// Find the order backing a checkout session
    async fn find_by_session(&self, session_id: &str) -> Result<Option<Order>, StoreError>;
}

/// Repository for Attendee records
///
/// Read-only: attendees are created exclusively inside the [`Store`]
/// transactions so the duplicate-join guard and the seat decrement
/// commit or fail together.
#[async_trait]
pub trait AttendeeRepository: Send + Sync {
    /// Find the attendee record for a buyer at an event
    async fn find(
        &self,
        event_id: EventId,
        buyer_id: BuyerId,
    ) -> Result<Option<Attendee>, StoreError>;

    /// List everyone attending an event
    async fn list_for_event(&self, event_id: EventId) -> Result<Vec<Attendee>, StoreError>;
}

/// Repository for the idempotency ledger
///
/// Read-only for the same reason as [`AttendeeRepository`]: entries are
/// written only inside the transactions they guard.
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// Find a processed-notification entry
    async fn find(&self, notification_id: &str) -> Result<Option<LedgerEntry>, StoreError>;
}

// =============================================================================
// Conditional transaction inputs
// =============================================================================

/// Input for [`Store::commit_reservation`]: the seat hold to finalize.
#[derive(Debug, Clone)]
pub struct SeatHold {
    pub event_id: EventId,
    pub buyer_id: BuyerId,
    /// Buyer email, copied onto the attendee record for free events
    pub email: String,
    /// The pending order this hold belongs to
    pub order_id: OrderId,
    pub quantity: SeatQuantity,
    /// Free events confirm synchronously: create the attendee record and
    /// close the order in the same transaction as the seat decrement
    pub confirm_immediately: bool,
}

/// Input for [`Store::record_confirmation`]: a "payment succeeded"
/// notification to apply.
#[derive(Debug, Clone)]
pub struct AttendanceConfirmation {
    /// External notification id, the idempotency key
    pub notification_id: String,
    pub event_id: EventId,
    pub buyer_id: BuyerId,
    pub email: String,
    pub order_id: Option<OrderId>,
}

/// Input for [`Store::record_release`]: a "payment failed or expired"
/// notification to apply.
#[derive(Debug, Clone)]
pub struct SeatRelease {
    /// External notification id, the idempotency key
    pub notification_id: String,
    pub event_id: EventId,
    /// Seats to return, echoed from the session metadata
    pub quantity: SeatQuantity,
    pub order_id: Option<OrderId>,
}

// =============================================================================
// Conditional transaction outcomes
// =============================================================================

/// Outcome of [`Store::commit_reservation`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldOutcome {
    /// Seats decremented; the hold is committed
    Held,
    /// Validation failed against the live document: not enough seats
    SoldOut {
        /// Seats actually remaining
        available: u32,
    },
    /// An attendee record already exists for this buyer
    AlreadyJoined,
}

/// Outcome of [`Store::record_confirmation`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationOutcome {
    /// First delivery; side effects applied
    Applied,
    /// Ledger hit; nothing changed
    Duplicate,
}

/// Outcome of [`Store::record_release`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Seats returned to the pool, order expired
    Released,
    /// Ledger hit; nothing changed
    Duplicate,
    /// The order already reached a terminal state through another path;
    /// the ledger entry was written but the seat increment was skipped
    OrderAlreadyClosed,
}

/// Outcome of [`Store::reclaim_abandoned_order`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclaimOutcome {
    /// Seats returned, order expired
    Reclaimed {
        /// Seats that were returned
        quantity: u32,
    },
    /// Another path already closed or settled the order; nothing changed
    AlreadyClosed,
}

// =============================================================================
// Aggregate store
// =============================================================================

/// Combined store interface: repository access plus the conditional
/// transactions that finalize every capacity-changing decision.
#[async_trait]
pub trait Store: Send + Sync {
    /// Get event repository
    fn events(&self) -> &dyn EventRepository;

    /// Get order repository
    fn orders(&self) -> &dyn OrderRepository;

    /// Get attendee repository
    fn attendees(&self) -> &dyn AttendeeRepository;

    /// Get ledger repository
    fn ledger(&self) -> &dyn LedgerRepository;

    /// Finalize a seat hold against the live event document.
    ///
    /// Atomically: re-check no attendee record exists for the buyer,
    /// re-check `available_seats >= quantity`, decrement, and (free events
    /// only) create the attendee record and confirm the order.
    async fn commit_reservation(&self, hold: &SeatHold) -> Result<HoldOutcome, StoreError>;

    /// Apply a "payment succeeded" notification.
    ///
    /// Atomically: skip if the ledger already has the notification id,
    /// otherwise create the attendee record (if absent), mark the order
    /// paid, and write the ledger entry. Never touches seat counts; those
    /// were decremented at reserve time.
    async fn record_confirmation(
        &self,
        confirmation: &AttendanceConfirmation,
    ) -> Result<NotificationOutcome, StoreError>;

    /// Apply a "payment failed or expired" notification.
    ///
    /// Atomically: skip if the ledger already has the notification id; if
    /// the order is already expired or cancelled, write the ledger entry
    /// but skip the seat increment; otherwise increment `available_seats`,
    /// expire the order, and write the ledger entry.
    async fn record_release(&self, release: &SeatRelease) -> Result<ReleaseOutcome, StoreError>;

    /// Return the seats behind an abandoned order whose checkout session
    /// the gateway reports as already terminal.
    ///
    /// Atomically: re-read the order and, only if it is still pending or
    /// failed, increment `available_seats` by its quantity and expire it.
    async fn reclaim_abandoned_order(&self, order_id: OrderId)
        -> Result<ReclaimOutcome, StoreError>;
}
