//! In-memory store implementation
//!
//! Used for testing and development without a database.
//! Thread-safe using RwLock for concurrent access.
//!
//! All four entity maps live under one lock so each conditional
//! transaction runs atomically under a single write guard.

use crate::error::StoreError;
use crate::repository::{
    AttendanceConfirmation, AttendeeRepository, EventRepository, HoldOutcome, LedgerRepository,
    NotificationOutcome, OrderRepository, ReclaimOutcome, ReleaseOutcome, SeatHold, SeatRelease,
    Store,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::RwLock;
use usher_domain::{
    Attendee, BuyerId, Event, EventId, LedgerEntry, NotificationEffect, Order, OrderId,
    OrderStatus,
};

/// In-memory store for testing
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    events: HashMap<EventId, Event>,
    orders: HashMap<OrderId, Order>,
    attendees: HashMap<(EventId, BuyerId), Attendee>,
    ledger: HashMap<String, LedgerEntry>,
}

impl MemoryStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
        }
    }

    /// Get the number of events
    pub fn event_count(&self) -> usize {
        self.state.read().unwrap().events.len()
    }

    /// Get the number of orders
    pub fn order_count(&self) -> usize {
        self.state.read().unwrap().orders.len()
    }

    /// Get the number of attendee records
    pub fn attendee_count(&self) -> usize {
        self.state.read().unwrap().attendees.len()
    }

    /// Get the number of ledger entries
    pub fn ledger_count(&self) -> usize {
        self.state.read().unwrap().ledger.len()
    }

    /// Clear all data (useful for test setup)
    pub fn clear(&self) {
        let mut state = self.state.write().unwrap();
        state.events.clear();
        state.orders.clear();
        state.attendees.clear();
        state.ledger.clear();
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Event Repository Implementation
// =============================================================================

#[async_trait]
impl EventRepository for MemoryStore {
    async fn save(&self, event: &Event) -> Result<(), StoreError> {
        let mut state = self.state.write().unwrap();
        state.events.insert(event.id, event.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: EventId) -> Result<Option<Event>, StoreError> {
        let state = self.state.read().unwrap();
        Ok(state.events.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Event>, StoreError> {
        let state = self.state.read().unwrap();
        let mut events: Vec<Event> = state.events.values().cloned().collect();
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(events)
    }
}

// =============================================================================
// Order Repository Implementation
// =============================================================================

#[async_trait]
impl OrderRepository for MemoryStore {
    async fn save(&self, order: &Order) -> Result<(), StoreError> {
        let mut state = self.state.write().unwrap();
        state.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        let state = self.state.read().unwrap();
        Ok(state.orders.get(&id).cloned())
    }

    async fn find_by_buyer(&self, buyer_id: BuyerId) -> Result<Vec<Order>, StoreError> {
        let state = self.state.read().unwrap();
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.buyer_id == buyer_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn find_by_session(&self, session_id: &str) -> Result<Option<Order>, StoreError> {
        let state = self.state.read().unwrap();
        Ok(state
            .orders
            .values()
            .find(|o| o.checkout_session_id.as_deref() == Some(session_id))
            .cloned())
    }
}

// =============================================================================
// Attendee Repository Implementation
// =============================================================================

#[async_trait]
impl AttendeeRepository for MemoryStore {
    async fn find(
        &self,
        event_id: EventId,
        buyer_id: BuyerId,
    ) -> Result<Option<Attendee>, StoreError> {
        let state = self.state.read().unwrap();
        Ok(state.attendees.get(&(event_id, buyer_id)).cloned())
    }

    async fn list_for_event(&self, event_id: EventId) -> Result<Vec<Attendee>, StoreError> {
        let state = self.state.read().unwrap();
        Ok(state
            .attendees
            .values()
            .filter(|a| a.event_id == event_id)
            .cloned()
            .collect())
    }
}

// =============================================================================
// Ledger Repository Implementation
// =============================================================================

#[async_trait]
impl LedgerRepository for MemoryStore {
    async fn find(&self, notification_id: &str) -> Result<Option<LedgerEntry>, StoreError> {
        let state = self.state.read().unwrap();
        Ok(state.ledger.get(notification_id).cloned())
    }
}

// =============================================================================
// Store Implementation (conditional transactions)
// =============================================================================

#[async_trait]
impl Store for MemoryStore {
    fn events(&self) -> &dyn EventRepository {
        self
    }

    fn orders(&self) -> &dyn OrderRepository {
        self
    }

    fn attendees(&self) -> &dyn AttendeeRepository {
        self
    }

    fn ledger(&self) -> &dyn LedgerRepository {
        self
    }

    async fn commit_reservation(&self, hold: &SeatHold) -> Result<HoldOutcome, StoreError> {
        let mut state = self.state.write().unwrap();

        // Duplicate-join guard against the live state, not a cached snapshot
        if state
            .attendees
            .contains_key(&(hold.event_id, hold.buyer_id))
        {
            return Ok(HoldOutcome::AlreadyJoined);
        }

        let event = state
            .events
            .get_mut(&hold.event_id)
            .ok_or_else(|| StoreError::not_found("event", hold.event_id.to_string()))?;

        let quantity = hold.quantity.get();
        if event.available_seats < quantity {
            return Ok(HoldOutcome::SoldOut {
                available: event.available_seats,
            });
        }
        event.available_seats -= quantity;

        if hold.confirm_immediately {
            state.attendees.insert(
                (hold.event_id, hold.buyer_id),
                Attendee::new(
                    hold.event_id,
                    hold.buyer_id,
                    hold.email.clone(),
                    Some(hold.order_id),
                ),
            );
            if let Some(order) = state.orders.get_mut(&hold.order_id) {
                order.status = OrderStatus::Confirmed;
                order.updated_at = Utc::now();
            }
        }

        Ok(HoldOutcome::Held)
    }

    async fn record_confirmation(
        &self,
        confirmation: &AttendanceConfirmation,
    ) -> Result<NotificationOutcome, StoreError> {
        let mut state = self.state.write().unwrap();

        if state.ledger.contains_key(&confirmation.notification_id) {
            return Ok(NotificationOutcome::Duplicate);
        }

        // Merge semantics: an existing attendee record is left untouched
        state
            .attendees
            .entry((confirmation.event_id, confirmation.buyer_id))
            .or_insert_with(|| {
                Attendee::new(
                    confirmation.event_id,
                    confirmation.buyer_id,
                    confirmation.email.clone(),
                    confirmation.order_id,
                )
            });

        if let Some(order_id) = confirmation.order_id {
            if let Some(order) = state.orders.get_mut(&order_id) {
                order.status = OrderStatus::Paid;
                order.updated_at = Utc::now();
            }
        }

        state.ledger.insert(
            confirmation.notification_id.clone(),
            LedgerEntry::new(
                confirmation.notification_id.clone(),
                NotificationEffect::Confirmed,
                confirmation.order_id,
            ),
        );

        Ok(NotificationOutcome::Applied)
    }

    async fn record_release(&self, release: &SeatRelease) -> Result<ReleaseOutcome, StoreError> {
        let mut state = self.state.write().unwrap();

        if state.ledger.contains_key(&release.notification_id) {
            return Ok(ReleaseOutcome::Duplicate);
        }

        let entry = LedgerEntry::new(
            release.notification_id.clone(),
            NotificationEffect::Released,
            release.order_id,
        );

        // A concurrent cancel may already have reconciled this order. The
        // ledger entry is still written so replays stay absorbed, but the
        // seat increment must not happen twice.
        let order_closed = release
            .order_id
            .and_then(|id| state.orders.get(&id))
            .map(|o| o.is_closed())
            .unwrap_or(false);
        if order_closed {
            state.ledger.insert(release.notification_id.clone(), entry);
            return Ok(ReleaseOutcome::OrderAlreadyClosed);
        }

        let event = state
            .events
            .get_mut(&release.event_id)
            .ok_or_else(|| StoreError::not_found("event", release.event_id.to_string()))?;
        event.available_seats =
            (event.available_seats + release.quantity.get()).min(event.total_seats);

        if let Some(order) = release.order_id.and_then(|id| state.orders.get_mut(&id)) {
            order.status = OrderStatus::Expired;
            order.updated_at = Utc::now();
        }

        state.ledger.insert(release.notification_id.clone(), entry);
        Ok(ReleaseOutcome::Released)
    }

    async fn reclaim_abandoned_order(
        &self,
        order_id: OrderId,
    ) -> Result<ReclaimOutcome, StoreError> {
        let mut state = self.state.write().unwrap();

        let order = state
            .orders
            .get(&order_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("order", order_id.to_string()))?;

        // Only a still-open hold returns its seats
        if order.is_closed() || order.is_settled() {
            return Ok(ReclaimOutcome::AlreadyClosed);
        }

        let quantity = order.quantity.get();
        let event = state
            .events
            .get_mut(&order.event_id)
            .ok_or_else(|| StoreError::not_found("event", order.event_id.to_string()))?;
        event.available_seats = (event.available_seats + quantity).min(event.total_seats);

        if let Some(order) = state.orders.get_mut(&order_id) {
            order.status = OrderStatus::Expired;
            order.updated_at = Utc::now();
        }

        Ok(ReclaimOutcome::Reclaimed { quantity })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use usher_domain::{EventCategory, Price, SeatQuantity};
    use uuid::Uuid;

    fn create_test_event(seats: u32, price: Decimal) -> Event {
        Event::new(
            "Warehouse Rave".to_string(),
            "Pier 9".to_string(),
            EventCategory::Fun,
            Price::new(price).unwrap(),
            seats,
            Uuid::now_v7(),
        )
        .unwrap()
    }

    fn create_test_order(event: &Event, buyer_id: BuyerId, quantity: u32) -> Order {
        let quantity = SeatQuantity::new(quantity).unwrap();
        Order::pending(event.id, buyer_id, quantity, event.price.total(quantity))
    }

    fn hold_for(order: &Order, email: &str, confirm_immediately: bool) -> SeatHold {
        SeatHold {
            event_id: order.event_id,
            buyer_id: order.buyer_id,
            email: email.to_string(),
            order_id: order.id,
            quantity: order.quantity,
            confirm_immediately,
        }
    }

    // Repository tests

    #[tokio::test]
    async fn test_event_save_and_find() {
        let store = MemoryStore::new();
        let event = create_test_event(50, dec!(20));
        let id = event.id;

        EventRepository::save(&store, &event).await.unwrap();

        let found = EventRepository::find_by_id(&store, id).await.unwrap();
        assert!(found.is_some());
        assert_eq!(found.unwrap().id, id);
        assert_eq!(store.event_count(), 1);
    }

    #[tokio::test]
    async fn test_event_list() {
        let store = MemoryStore::new();
        EventRepository::save(&store, &create_test_event(10, dec!(0)))
            .await
            .unwrap();
        EventRepository::save(&store, &create_test_event(20, dec!(5)))
            .await
            .unwrap();

        let events = EventRepository::list(&store).await.unwrap();
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_order_find_by_buyer() {
        let store = MemoryStore::new();
        let event = create_test_event(50, dec!(20));
        let buyer_id = Uuid::now_v7();

        OrderRepository::save(&store, &create_test_order(&event, buyer_id, 1))
            .await
            .unwrap();
        OrderRepository::save(&store, &create_test_order(&event, buyer_id, 2))
            .await
            .unwrap();
        // Different buyer
        OrderRepository::save(&store, &create_test_order(&event, Uuid::now_v7(), 1))
            .await
            .unwrap();

        let found = OrderRepository::find_by_buyer(&store, buyer_id).await.unwrap();
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn test_order_find_by_session() {
        let store = MemoryStore::new();
        let event = create_test_event(50, dec!(20));
        let mut order = create_test_order(&event, Uuid::now_v7(), 1);
        order.checkout_session_id = Some("cs_test_123".to_string());

        OrderRepository::save(&store, &order).await.unwrap();

        let found = OrderRepository::find_by_session(&store, "cs_test_123")
            .await
            .unwrap();
        assert!(found.is_some());
        assert_eq!(found.unwrap().id, order.id);

        let missing = OrderRepository::find_by_session(&store, "cs_other")
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    // Conditional transaction tests

    #[tokio::test]
    async fn test_commit_reservation_decrements_seats() {
        let store = MemoryStore::new();
        let event = create_test_event(10, dec!(20));
        EventRepository::save(&store, &event).await.unwrap();

        let order = create_test_order(&event, Uuid::now_v7(), 3);
        OrderRepository::save(&store, &order).await.unwrap();

        let outcome = store
            .commit_reservation(&hold_for(&order, "a@example.com", false))
            .await
            .unwrap();
        assert_eq!(outcome, HoldOutcome::Held);

        let event = EventRepository::find_by_id(&store, event.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.available_seats, 7);
        // Priced hold: no attendee record until payment confirms
        assert_eq!(store.attendee_count(), 0);
    }

    #[tokio::test]
    async fn test_commit_reservation_sold_out_boundary() {
        let store = MemoryStore::new();
        let mut event = create_test_event(10, dec!(20));
        event.available_seats = 2;
        EventRepository::save(&store, &event).await.unwrap();

        let order = create_test_order(&event, Uuid::now_v7(), 3);
        OrderRepository::save(&store, &order).await.unwrap();

        let outcome = store
            .commit_reservation(&hold_for(&order, "a@example.com", false))
            .await
            .unwrap();
        assert_eq!(outcome, HoldOutcome::SoldOut { available: 2 });

        // Nothing changed
        let event = EventRepository::find_by_id(&store, event.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.available_seats, 2);
    }

    #[tokio::test]
    async fn test_commit_reservation_duplicate_join() {
        let store = MemoryStore::new();
        let event = create_test_event(10, dec!(0));
        EventRepository::save(&store, &event).await.unwrap();
        let buyer_id = Uuid::now_v7();

        let first = create_test_order(&event, buyer_id, 1);
        OrderRepository::save(&store, &first).await.unwrap();
        let outcome = store
            .commit_reservation(&hold_for(&first, "a@example.com", true))
            .await
            .unwrap();
        assert_eq!(outcome, HoldOutcome::Held);

        let second = create_test_order(&event, buyer_id, 1);
        OrderRepository::save(&store, &second).await.unwrap();
        let outcome = store
            .commit_reservation(&hold_for(&second, "a@example.com", true))
            .await
            .unwrap();
        assert_eq!(outcome, HoldOutcome::AlreadyJoined);

        // Exactly one seat held, one attendee
        let event = EventRepository::find_by_id(&store, event.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.available_seats, 9);
        assert_eq!(store.attendee_count(), 1);
    }

    #[tokio::test]
    async fn test_commit_reservation_free_confirms_in_same_tx() {
        let store = MemoryStore::new();
        let event = create_test_event(10, dec!(0));
        EventRepository::save(&store, &event).await.unwrap();

        let order = create_test_order(&event, Uuid::now_v7(), 1);
        OrderRepository::save(&store, &order).await.unwrap();

        let outcome = store
            .commit_reservation(&hold_for(&order, "free@example.com", true))
            .await
            .unwrap();
        assert_eq!(outcome, HoldOutcome::Held);

        let attendee = AttendeeRepository::find(&store, event.id, order.buyer_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(attendee.order_id, Some(order.id));

        let order = OrderRepository::find_by_id(&store, order.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(order.status, OrderStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_record_confirmation_applies_then_absorbs_replay() {
        let store = MemoryStore::new();
        let event = create_test_event(10, dec!(20));
        EventRepository::save(&store, &event).await.unwrap();
        let order = create_test_order(&event, Uuid::now_v7(), 2);
        OrderRepository::save(&store, &order).await.unwrap();

        let confirmation = AttendanceConfirmation {
            notification_id: "evt_1".to_string(),
            event_id: event.id,
            buyer_id: order.buyer_id,
            email: "a@example.com".to_string(),
            order_id: Some(order.id),
        };

        let outcome = store.record_confirmation(&confirmation).await.unwrap();
        assert_eq!(outcome, NotificationOutcome::Applied);

        let outcome = store.record_confirmation(&confirmation).await.unwrap();
        assert_eq!(outcome, NotificationOutcome::Duplicate);

        assert_eq!(store.attendee_count(), 1);
        assert_eq!(store.ledger_count(), 1);
        let order = OrderRepository::find_by_id(&store, order.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(order.status, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn test_record_release_returns_seats() {
        let store = MemoryStore::new();
        let mut event = create_test_event(10, dec!(20));
        event.available_seats = 7;
        EventRepository::save(&store, &event).await.unwrap();
        let order = create_test_order(&event, Uuid::now_v7(), 3);
        OrderRepository::save(&store, &order).await.unwrap();

        let release = SeatRelease {
            notification_id: "evt_2".to_string(),
            event_id: event.id,
            quantity: order.quantity,
            order_id: Some(order.id),
        };

        let outcome = store.record_release(&release).await.unwrap();
        assert_eq!(outcome, ReleaseOutcome::Released);

        let event = EventRepository::find_by_id(&store, event.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.available_seats, 10);
        let order = OrderRepository::find_by_id(&store, order.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(order.status, OrderStatus::Expired);

        // Replay is absorbed with no second increment
        let outcome = store.record_release(&release).await.unwrap();
        assert_eq!(outcome, ReleaseOutcome::Duplicate);
        let event = EventRepository::find_by_id(&store, event.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.available_seats, 10);
    }

    #[tokio::test]
    async fn test_record_release_skips_closed_order() {
        let store = MemoryStore::new();
        let mut event = create_test_event(10, dec!(20));
        event.available_seats = 10;
        EventRepository::save(&store, &event).await.unwrap();

        // A concurrent cancel already expired this order and restored seats
        let mut order = create_test_order(&event, Uuid::now_v7(), 2);
        order.status = OrderStatus::Expired;
        OrderRepository::save(&store, &order).await.unwrap();

        let release = SeatRelease {
            notification_id: "evt_3".to_string(),
            event_id: event.id,
            quantity: order.quantity,
            order_id: Some(order.id),
        };

        let outcome = store.record_release(&release).await.unwrap();
        assert_eq!(outcome, ReleaseOutcome::OrderAlreadyClosed);

        // No increment, but the ledger still absorbs replays
        let event = EventRepository::find_by_id(&store, event.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.available_seats, 10);
        assert_eq!(store.ledger_count(), 1);
    }

    #[tokio::test]
    async fn test_reclaim_abandoned_order_once() {
        let store = MemoryStore::new();
        let mut event = create_test_event(10, dec!(20));
        event.available_seats = 8;
        EventRepository::save(&store, &event).await.unwrap();
        let order = create_test_order(&event, Uuid::now_v7(), 2);
        OrderRepository::save(&store, &order).await.unwrap();

        let outcome = store.reclaim_abandoned_order(order.id).await.unwrap();
        assert_eq!(outcome, ReclaimOutcome::Reclaimed { quantity: 2 });

        let event = EventRepository::find_by_id(&store, event.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.available_seats, 10);
        let order = OrderRepository::find_by_id(&store, order.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(order.status, OrderStatus::Expired);

        // Second reclaim finds the order already closed
        let outcome = store.reclaim_abandoned_order(order.id).await.unwrap();
        assert_eq!(outcome, ReclaimOutcome::AlreadyClosed);
    }

    #[tokio::test]
    async fn test_reclaim_skips_settled_order() {
        let store = MemoryStore::new();
        let event = create_test_event(10, dec!(20));
        EventRepository::save(&store, &event).await.unwrap();
        let mut order = create_test_order(&event, Uuid::now_v7(), 2);
        order.status = OrderStatus::Paid;
        OrderRepository::save(&store, &order).await.unwrap();

        let outcome = store.reclaim_abandoned_order(order.id).await.unwrap();
        assert_eq!(outcome, ReclaimOutcome::AlreadyClosed);
    }

    #[tokio::test]
    async fn test_store_clear() {
        let store = MemoryStore::new();
        let event = create_test_event(10, dec!(0));
        EventRepository::save(&store, &event).await.unwrap();
        let order = create_test_order(&event, Uuid::now_v7(), 1);
        OrderRepository::save(&store, &order).await.unwrap();
        store
            .commit_reservation(&hold_for(&order, "a@example.com", true))
            .await
            .unwrap();

        assert_eq!(store.event_count(), 1);
        assert_eq!(store.order_count(), 1);
        assert_eq!(store.attendee_count(), 1);

        store.clear();

        assert_eq!(store.event_count(), 0);
        assert_eq!(store.order_count(), 0);
        assert_eq!(store.attendee_count(), 0);
        assert_eq!(store.ledger_count(), 0);
    }
}
