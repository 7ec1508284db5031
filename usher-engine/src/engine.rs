//! Reservation engine: orchestrates holds, confirmations, releases, and
//! cancellations across the store, cache, and payment gateway ports.
//!
//! The engine layers two guards around every capacity change:
//! 1. A per-event lock lease (advisory, fail-fast) that serializes the
//!    expensive reserve path under contention.
//! 2. The store's conditional transactions, which re-validate against the
//!    live document and are the actual correctness boundary.
//!
//! Losing the lock is a transient "busy"; losing the transaction is a
//! domain conflict. The cache is never authoritative.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use usher_cache::{CacheLayer, ExpirationQueue, LockToken, ResourceLock, SnapshotCache};
use usher_domain::{
    BuyerId, Event, EventId, ExpirationJob, Order, OrderId, OrderStatus, SeatQuantity,
};
use usher_gateway::{CheckoutRequest, PaymentGateway, SessionMetadata};
use usher_store::{
    AttendanceConfirmation, HoldOutcome, NotificationOutcome, ReclaimOutcome, ReleaseOutcome,
    SeatHold, SeatRelease, Store,
};

use crate::error::EngineError;

// =============================================================================
// Configuration
// =============================================================================

/// Timing knobs for the reservation flow.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Lock lease TTL; must exceed the guarded section's worst-case latency
    pub lock_ttl: Duration,
    /// Sliding TTL for cached event snapshots; outlives a payment session
    pub snapshot_ttl: Duration,
    /// How long an unpaid hold lives before the reaper steps in
    pub hold_window: Duration,
    /// Gateway-side checkout session lifetime
    pub session_expiry: Duration,
    /// Client base URL the gateway redirects back to
    pub client_url: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(10),
            snapshot_ttl: Duration::from_secs(3600),
            hold_window: Duration::from_secs(600),
            session_expiry: Duration::from_secs(1800),
            client_url: "http://localhost:5173".to_string(),
        }
    }
}

// =============================================================================
// Outcomes
// =============================================================================

/// Result of a successful reserve.
#[derive(Debug, Clone)]
pub enum ReserveOutcome {
    /// Free event: attendance granted synchronously
    Confirmed {
        /// The confirmed order
        order_id: OrderId,
    },
    /// Priced event: seats are held; the buyer must complete checkout
    PaymentRequired {
        /// The pending order
        order_id: OrderId,
        /// Gateway checkout session id
        session_id: String,
        /// Hosted payment page URL
        url: String,
    },
}

/// Result of a successful cancel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The gateway accepted the expire request; its expiry notification
    /// will release the seats
    Cancelled,
    /// The session was already terminal at the gateway; the seats were
    /// restored locally
    Reclaimed {
        /// Seats returned to the pool
        quantity: u32,
    },
    /// The order was already expired or cancelled; nothing to do
    AlreadyClosed,
    /// The order has no checkout session to cancel
    NoActiveSession,
}

// =============================================================================
// Engine
// =============================================================================

/// Orchestrates the reservation lifecycle over pluggable ports.
pub struct ReservationEngine<G: PaymentGateway, S: Store, C: CacheLayer> {
    /// Payment gateway port
    gateway: Arc<G>,
    /// Authoritative store
    store: Arc<S>,
    /// Snapshot cache + lock lease + expiration queue
    cache: Arc<C>,
    /// Timing configuration
    config: EngineConfig,
}

impl<G: PaymentGateway, S: Store, C: CacheLayer> ReservationEngine<G, S, C> {
    /// Create a new engine over the given ports.
    pub fn new(gateway: Arc<G>, store: Arc<S>, cache: Arc<C>, config: EngineConfig) -> Self {
        Self {
            gateway,
            store,
            cache,
            config,
        }
    }

    /// Get the store (for read-only endpoints and tests).
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Get the gateway (for tests).
    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Get the cache (for tests).
    pub fn cache(&self) -> &C {
        &self.cache
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Read-through event lookup.
    ///
    /// Cache problems never fail the read; the store is authoritative and
    /// the sliding TTL bounds how stale a served snapshot can be.
    pub async fn event(&self, event_id: EventId) -> Result<Option<Event>, EngineError> {
        match self.cache.get(event_id, self.config.snapshot_ttl).await {
            Ok(Some(event)) => return Ok(Some(event)),
            Ok(None) => {}
            Err(e) => warn!(%event_id, error = %e, "Snapshot cache read failed"),
        }

        let Some(event) = self.store.events().find_by_id(event_id).await? else {
            return Ok(None);
        };

        if let Err(e) = self.cache.put(&event, self.config.snapshot_ttl).await {
            warn!(%event_id, error = %e, "Failed to cache event snapshot");
        }

        Ok(Some(event))
    }

    /// List all events, newest first.
    pub async fn list_events(&self) -> Result<Vec<Event>, EngineError> {
        Ok(self.store.events().list().await?)
    }

    /// Persist a new event listing.
    pub async fn create_event(&self, event: &Event) -> Result<(), EngineError> {
        self.store.events().save(event).await?;
        info!(event_id = %event.id, seats = event.total_seats, "Event created");
        Ok(())
    }

    /// List a buyer's orders, newest first.
    pub async fn orders_for(&self, buyer_id: BuyerId) -> Result<Vec<Order>, EngineError> {
        Ok(self.store.orders().find_by_buyer(buyer_id).await?)
    }

    // =========================================================================
    // Reserve
    // =========================================================================

    /// Reserve seats at an event.
    ///
    /// Free events confirm synchronously. Priced events hold the seats,
    /// open a checkout session, and return the payment URL; the hold is
    /// settled later by a payment notification, the reaper, or a cancel.
    ///
    /// Fails fast with [`EngineError::Busy`] when the event lock is
    /// contended; callers retry. No retry happens inside.
    pub async fn reserve(
        &self,
        event_id: EventId,
        buyer_id: BuyerId,
        email: &str,
        quantity: SeatQuantity,
    ) -> Result<ReserveOutcome, EngineError> {
        // 1. Fence the event. A lock service outage fails the same way as
        //    contention; proceeding lockless would be correct but would
        //    change the contention profile under partial outage.
        let token = match self.cache.acquire(event_id, self.config.lock_ttl).await {
            Ok(Some(token)) => token,
            Ok(None) => {
                debug!(%event_id, "Reserve contended");
                return Err(EngineError::Busy);
            }
            Err(e) => {
                warn!(%event_id, error = %e, "Lock service unavailable");
                return Err(EngineError::Busy);
            }
        };

        let result = self
            .reserve_locked(event_id, buyer_id, email, quantity)
            .await;

        // 2. Compare-and-delete release, whatever happened above. A lease
        //    that expired mid-flight now belongs to a successor and must
        //    not be deleted.
        self.unlock(event_id, token).await;

        result
    }

    /// The guarded section of a reserve.
    async fn reserve_locked(
        &self,
        event_id: EventId,
        buyer_id: BuyerId,
        email: &str,
        quantity: SeatQuantity,
    ) -> Result<ReserveOutcome, EngineError> {
        // 1. Optimistic checks on a fresh-enough snapshot. Violations abort
        //    before any order or gateway call.
        let event = self
            .event(event_id)
            .await?
            .ok_or(EngineError::EventNotFound(event_id))?;

        if event.organizer_id == buyer_id {
            return Err(EngineError::SelfBooking);
        }
        if event.is_free() && quantity.get() > 1 {
            return Err(EngineError::FreeEventCap);
        }
        if self
            .store
            .attendees()
            .find(event_id, buyer_id)
            .await?
            .is_some()
        {
            return Err(EngineError::AlreadyJoined);
        }
        if !event.has_capacity(quantity) {
            return Err(EngineError::SoldOut {
                available: event.available_seats,
            });
        }

        // 2. Record the pending order before any external call so every
        //    later failure has something to mark Failed.
        let mut order = Order::pending(event_id, buyer_id, quantity, event.price.total(quantity));
        self.store.orders().save(&order).await?;

        match self
            .finalize_reservation(&event, &mut order, email, quantity)
            .await
        {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.abort_reservation(&mut order, &e).await;
                Err(e)
            }
        }
    }

    /// Steps 3..6 of a reserve: session, transaction, invalidation.
    async fn finalize_reservation(
        &self,
        event: &Event,
        order: &mut Order,
        email: &str,
        quantity: SeatQuantity,
    ) -> Result<ReserveOutcome, EngineError> {
        let is_free = event.is_free();
        let mut session = None;

        // 3. Priced events: open the checkout session and schedule the
        //    reaper backstop. The hold window is deliberately shorter than
        //    the session's own expiry.
        if !is_free {
            let created = self
                .gateway
                .create_session(self.checkout_request(event, order, email))
                .await?;

            order.checkout_session_id = Some(created.id.clone());
            order.updated_at = Utc::now();
            self.store.orders().save(order).await?;

            let job = ExpirationJob::new(created.id.clone(), after(self.config.hold_window));
            if let Err(e) = self.cache.schedule(&job).await {
                warn!(
                    session_id = %created.id,
                    error = %e,
                    "Failed to schedule expiration job; gateway expiry remains the backstop"
                );
            }

            session = Some(created);
        }

        // 4. The authoritative transaction re-validates against the live
        //    document, not the snapshot used above.
        let hold = SeatHold {
            event_id: event.id,
            buyer_id: order.buyer_id,
            email: email.to_string(),
            order_id: order.id,
            quantity,
            confirm_immediately: is_free,
        };

        match self.store.commit_reservation(&hold).await? {
            HoldOutcome::Held => {}
            HoldOutcome::SoldOut { available } => {
                return Err(EngineError::SoldOut { available });
            }
            HoldOutcome::AlreadyJoined => {
                return Err(EngineError::AlreadyJoined);
            }
        }

        // 5. Drop the stale snapshot.
        self.invalidate_snapshot(event.id).await;

        info!(
            event_id = %event.id,
            order_id = %order.id,
            quantity = %quantity,
            free = is_free,
            "Reservation committed"
        );

        match session {
            None => Ok(ReserveOutcome::Confirmed { order_id: order.id }),
            Some(s) => Ok(ReserveOutcome::PaymentRequired {
                order_id: order.id,
                session_id: s.id,
                url: s.url,
            }),
        }
    }

    /// Best-effort cleanup after a failed reserve: expire any session
    /// opened for the order and record the failure on it. Each step's own
    /// failure is logged, never retried synchronously.
    async fn abort_reservation(&self, order: &mut Order, cause: &EngineError) {
        if let Some(session_id) = order.checkout_session_id.clone() {
            match self.gateway.expire_session(&session_id).await {
                Ok(()) => debug!(order_id = %order.id, %session_id, "Rolled back checkout session"),
                Err(e) if e.is_terminal_state() => {}
                Err(e) => warn!(
                    order_id = %order.id,
                    %session_id,
                    error = %e,
                    "Failed to expire session during rollback"
                ),
            }
        }

        order.status = OrderStatus::Failed;
        order.error = Some(cause.to_string());
        order.updated_at = Utc::now();

        if let Err(e) = self.store.orders().save(order).await {
            warn!(order_id = %order.id, error = %e, "Failed to record order failure");
        }
    }

    /// Build the checkout session request for a priced order.
    fn checkout_request(&self, event: &Event, order: &Order, email: &str) -> CheckoutRequest {
        CheckoutRequest {
            product_name: event.name.clone(),
            unit_price: event.price,
            quantity: order.quantity.get(),
            customer_email: email.to_string(),
            success_url: format!(
                "{}/payment-success?session_id={{CHECKOUT_SESSION_ID}}",
                self.config.client_url
            ),
            cancel_url: format!("{}/payment-cancelled", self.config.client_url),
            expires_at: after(self.config.session_expiry),
            metadata: SessionMetadata {
                event_id: event.id,
                buyer_id: order.buyer_id,
                quantity: order.quantity.get(),
                order_id: Some(order.id),
            },
        }
    }

    // =========================================================================
    // Payment notifications
    // =========================================================================

    /// Apply a "payment succeeded" notification.
    ///
    /// Idempotent: the ledger absorbs replays inside the transaction. The
    /// lock is best-effort; contention or a lock outage does not block a
    /// notification.
    pub async fn confirm(
        &self,
        notification_id: &str,
        metadata: &SessionMetadata,
        email: &str,
    ) -> Result<NotificationOutcome, EngineError> {
        let token = self.try_lock(metadata.event_id).await;

        let confirmation = AttendanceConfirmation {
            notification_id: notification_id.to_string(),
            event_id: metadata.event_id,
            buyer_id: metadata.buyer_id,
            email: email.to_string(),
            order_id: metadata.order_id,
        };

        let result = self.store.record_confirmation(&confirmation).await;

        if let Some(token) = token {
            self.unlock(metadata.event_id, token).await;
        }

        let outcome = result?;
        match outcome {
            NotificationOutcome::Applied => {
                self.invalidate_snapshot(metadata.event_id).await;
                info!(
                    notification_id,
                    event_id = %metadata.event_id,
                    "Payment confirmation applied"
                );
            }
            NotificationOutcome::Duplicate => {
                debug!(notification_id, "Duplicate confirmation absorbed");
            }
        }

        Ok(outcome)
    }

    /// Apply a "payment failed or expired" notification.
    ///
    /// Same lock and idempotency shape as [`ReservationEngine::confirm`].
    /// When another path already closed the order, the ledger entry is
    /// still written but the seat credit is skipped.
    pub async fn release(
        &self,
        notification_id: &str,
        metadata: &SessionMetadata,
    ) -> Result<ReleaseOutcome, EngineError> {
        let quantity = SeatQuantity::new(metadata.quantity)?;

        let token = self.try_lock(metadata.event_id).await;

        let release = SeatRelease {
            notification_id: notification_id.to_string(),
            event_id: metadata.event_id,
            quantity,
            order_id: metadata.order_id,
        };

        let result = self.store.record_release(&release).await;

        if let Some(token) = token {
            self.unlock(metadata.event_id, token).await;
        }

        let outcome = result?;
        match outcome {
            ReleaseOutcome::Released => {
                self.invalidate_snapshot(metadata.event_id).await;
                info!(
                    notification_id,
                    event_id = %metadata.event_id,
                    quantity = metadata.quantity,
                    "Seats released"
                );
            }
            ReleaseOutcome::Duplicate => {
                debug!(notification_id, "Duplicate release absorbed");
            }
            ReleaseOutcome::OrderAlreadyClosed => {
                info!(
                    notification_id,
                    "Release arrived after the order closed; seat credit skipped"
                );
            }
        }

        Ok(outcome)
    }

    // =========================================================================
    // Cancel
    // =========================================================================

    /// Cancel an order at the buyer's request.
    ///
    /// Terminal orders are an idempotent success. When the gateway reports
    /// the session already terminal, the seats are restored locally in one
    /// transaction that re-checks the order's status, so a racing release
    /// notification and a cancel credit the seats at most once between
    /// them.
    pub async fn cancel(
        &self,
        order_id: OrderId,
        buyer_id: BuyerId,
    ) -> Result<CancelOutcome, EngineError> {
        // Authorization and fast-fail happen outside any lock or
        // transaction; the reconcile transaction re-reads what matters.
        let Some(order) = self.store.orders().find_by_id(order_id).await? else {
            return Err(EngineError::OrderNotFound(order_id));
        };

        if order.buyer_id != buyer_id {
            return Err(EngineError::Unauthorized);
        }
        if order.is_closed() {
            return Ok(CancelOutcome::AlreadyClosed);
        }
        if !order.is_cancellable() {
            return Err(EngineError::CannotCancel {
                status: order.status,
            });
        }

        let Some(session_id) = order.checkout_session_id.clone() else {
            return Ok(CancelOutcome::NoActiveSession);
        };

        match self.gateway.expire_session(&session_id).await {
            Ok(()) => {
                // The gateway's expiry notification performs the actual
                // seat release, ledger-guarded like any other delivery.
                info!(%order_id, %session_id, "Cancel accepted; gateway will emit the expiry");
                Ok(CancelOutcome::Cancelled)
            }
            Err(e) if e.is_terminal_state() => {
                let outcome = self.store.reclaim_abandoned_order(order_id).await?;
                self.invalidate_snapshot(order.event_id).await;

                match outcome {
                    ReclaimOutcome::Reclaimed { quantity } => {
                        info!(%order_id, quantity, "Cancel reconciled locally");
                        Ok(CancelOutcome::Reclaimed { quantity })
                    }
                    ReclaimOutcome::AlreadyClosed => Ok(CancelOutcome::AlreadyClosed),
                }
            }
            Err(e) => Err(EngineError::Gateway(e)),
        }
    }

    // =========================================================================
    // Lock helpers
    // =========================================================================

    /// Best-effort lock for the notification paths.
    async fn try_lock(&self, event_id: EventId) -> Option<LockToken> {
        match self.cache.acquire(event_id, self.config.lock_ttl).await {
            Ok(Some(token)) => Some(token),
            Ok(None) => {
                debug!(%event_id, "Lock contended; proceeding on the transaction guard");
                None
            }
            Err(e) => {
                warn!(%event_id, error = %e, "Lock service error; proceeding on the transaction guard");
                None
            }
        }
    }

    /// Compare-and-delete release with logging.
    async fn unlock(&self, event_id: EventId, token: LockToken) {
        match self.cache.release(event_id, token).await {
            Ok(true) => {}
            Ok(false) => debug!(%event_id, "Lock lease already rotated at release"),
            Err(e) => warn!(%event_id, error = %e, "Failed to release lock"),
        }
    }

    /// Best-effort snapshot invalidation after a committed write.
    async fn invalidate_snapshot(&self, event_id: EventId) {
        if let Err(e) = self.cache.invalidate(event_id).await {
            warn!(%event_id, error = %e, "Failed to invalidate snapshot");
        }
    }
}

/// `now` plus a configured window.
fn after(window: Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::seconds(window.as_secs() as i64)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use usher_cache::MemoryCache;
    use usher_domain::{EventCategory, Price};
    use usher_gateway::{StubGateway, StubSessionStatus};
    use usher_store::MemoryStore;
    use uuid::Uuid;

    struct TestEngine {
        engine: ReservationEngine<StubGateway, MemoryStore, MemoryCache>,
        gateway: Arc<StubGateway>,
        store: Arc<MemoryStore>,
        cache: Arc<MemoryCache>,
    }

    fn create_test_engine() -> TestEngine {
        let gateway = Arc::new(StubGateway::new());
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(MemoryCache::new());

        let engine = ReservationEngine::new(
            gateway.clone(),
            store.clone(),
            cache.clone(),
            EngineConfig::default(),
        );

        TestEngine {
            engine,
            gateway,
            store,
            cache,
        }
    }

    async fn seed_event(store: &MemoryStore, price: Price, seats: u32) -> Event {
        let event = Event::new(
            "Rust Meetup".to_string(),
            "Community Hall".to_string(),
            EventCategory::Educational,
            price,
            seats,
            Uuid::new_v4(),
        )
        .unwrap();
        store.events().save(&event).await.unwrap();
        event
    }

    fn qty(n: u32) -> SeatQuantity {
        SeatQuantity::new(n).unwrap()
    }

    #[tokio::test]
    async fn test_reserve_free_event_confirms_synchronously() {
        let t = create_test_engine();
        let event = seed_event(&t.store, Price::zero(), 10).await;
        let buyer = Uuid::new_v4();

        let outcome = t
            .engine
            .reserve(event.id, buyer, "buyer@example.com", qty(1))
            .await
            .unwrap();

        let ReserveOutcome::Confirmed { order_id } = outcome else {
            panic!("expected Confirmed");
        };

        let order = t.store.orders().find_by_id(order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Confirmed);
        assert!(order.checkout_session_id.is_none());

        let attendee = t.store.attendees().find(event.id, buyer).await.unwrap();
        assert_eq!(attendee.unwrap().email, "buyer@example.com");

        let updated = t.store.events().find_by_id(event.id).await.unwrap().unwrap();
        assert_eq!(updated.available_seats, 9);

        // No session, no scheduled job
        assert_eq!(t.gateway.session_count(), 0);
        assert_eq!(t.cache.queue_len(), 0);
    }

    #[tokio::test]
    async fn test_reserve_priced_event_opens_checkout() {
        let t = create_test_engine();
        let event = seed_event(&t.store, Price::new(dec!(25.00)).unwrap(), 5).await;
        let buyer = Uuid::new_v4();

        let outcome = t
            .engine
            .reserve(event.id, buyer, "buyer@example.com", qty(2))
            .await
            .unwrap();

        let ReserveOutcome::PaymentRequired {
            order_id,
            session_id,
            url,
        } = outcome
        else {
            panic!("expected PaymentRequired");
        };
        assert!(url.contains(&session_id));

        // Seats held immediately, attendance deferred to the confirmation
        let updated = t.store.events().find_by_id(event.id).await.unwrap().unwrap();
        assert_eq!(updated.available_seats, 3);
        assert!(t
            .store
            .attendees()
            .find(event.id, buyer)
            .await
            .unwrap()
            .is_none());

        let order = t.store.orders().find_by_id(order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.checkout_session_id.as_deref(), Some(session_id.as_str()));
        assert_eq!(order.amount, dec!(50.00));

        // Session metadata carries the correlation fields
        let session = t.gateway.session(&session_id).unwrap();
        assert_eq!(session.request.metadata.event_id, event.id);
        assert_eq!(session.request.metadata.order_id, Some(order_id));

        // Reaper backstop scheduled
        assert_eq!(t.cache.queue_len(), 1);
    }

    #[tokio::test]
    async fn test_reserve_busy_when_lock_held() {
        let t = create_test_engine();
        let event = seed_event(&t.store, Price::zero(), 10).await;

        // Another worker holds the lease
        let token = t
            .cache
            .acquire(event.id, Duration::from_secs(10))
            .await
            .unwrap()
            .unwrap();

        let err = t
            .engine
            .reserve(event.id, Uuid::new_v4(), "buyer@example.com", qty(1))
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Busy));
        assert!(err.is_transient());
        // Nothing was written
        assert_eq!(t.store.order_count(), 0);

        // The foreign lease survived the loser's release path
        assert!(t.cache.release(event.id, token).await.unwrap());
    }

    #[tokio::test]
    async fn test_reserve_busy_when_lock_service_down() {
        let t = create_test_engine();
        let event = seed_event(&t.store, Price::zero(), 10).await;

        t.cache.set_fail_next_lock(true);

        let err = t
            .engine
            .reserve(event.id, Uuid::new_v4(), "buyer@example.com", qty(1))
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Busy));
        assert_eq!(t.store.order_count(), 0);
    }

    #[tokio::test]
    async fn test_reserve_rejects_organizer() {
        let t = create_test_engine();
        let event = seed_event(&t.store, Price::zero(), 10).await;

        let err = t
            .engine
            .reserve(event.id, event.organizer_id, "org@example.com", qty(1))
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::SelfBooking));
        assert_eq!(t.store.order_count(), 0);
    }

    #[tokio::test]
    async fn test_reserve_caps_free_events_at_one_seat() {
        let t = create_test_engine();
        let event = seed_event(&t.store, Price::zero(), 10).await;

        let err = t
            .engine
            .reserve(event.id, Uuid::new_v4(), "buyer@example.com", qty(2))
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::FreeEventCap));
        assert!(err.is_conflict());
        assert_eq!(t.store.order_count(), 0);
    }

    #[tokio::test]
    async fn test_reserve_sold_out_before_any_order() {
        let t = create_test_engine();
        let event = seed_event(&t.store, Price::new(dec!(10)).unwrap(), 1).await;

        let err = t
            .engine
            .reserve(event.id, Uuid::new_v4(), "buyer@example.com", qty(2))
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::SoldOut { available: 1 }));
        assert_eq!(t.store.order_count(), 0);
        assert_eq!(t.gateway.session_count(), 0);
    }

    #[tokio::test]
    async fn test_reserve_duplicate_join_rejected() {
        let t = create_test_engine();
        let event = seed_event(&t.store, Price::zero(), 10).await;
        let buyer = Uuid::new_v4();

        t.engine
            .reserve(event.id, buyer, "buyer@example.com", qty(1))
            .await
            .unwrap();

        let err = t
            .engine
            .reserve(event.id, buyer, "buyer@example.com", qty(1))
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::AlreadyJoined));

        let updated = t.store.events().find_by_id(event.id).await.unwrap().unwrap();
        assert_eq!(updated.available_seats, 9);
    }

    #[tokio::test]
    async fn test_reserve_missing_event() {
        let t = create_test_engine();

        let err = t
            .engine
            .reserve(Uuid::now_v7(), Uuid::new_v4(), "buyer@example.com", qty(1))
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::EventNotFound(_)));
    }

    #[tokio::test]
    async fn test_reserve_gateway_failure_marks_order_failed() {
        let t = create_test_engine();
        let event = seed_event(&t.store, Price::new(dec!(25.00)).unwrap(), 5).await;
        let buyer = Uuid::new_v4();

        t.gateway.set_fail_next(true);

        let err = t
            .engine
            .reserve(event.id, buyer, "buyer@example.com", qty(2))
            .await
            .unwrap_err();

        assert!(err.is_transient());

        // The pending order was recorded, then marked failed with the cause
        let orders = t.store.orders().find_by_buyer(buyer).await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].status, OrderStatus::Failed);
        assert!(orders[0].error.is_some());

        // Seats were never decremented
        let updated = t.store.events().find_by_id(event.id).await.unwrap().unwrap();
        assert_eq!(updated.available_seats, 5);
    }

    #[tokio::test]
    async fn test_reserve_invalidates_snapshot() {
        let t = create_test_engine();
        let event = seed_event(&t.store, Price::zero(), 10).await;

        // Warm the snapshot
        t.engine.event(event.id).await.unwrap().unwrap();
        assert_eq!(t.cache.snapshot_count(), 1);

        t.engine
            .reserve(event.id, Uuid::new_v4(), "buyer@example.com", qty(1))
            .await
            .unwrap();

        assert_eq!(t.cache.snapshot_count(), 0);
    }

    #[tokio::test]
    async fn test_event_read_survives_cache_outage() {
        let t = create_test_engine();
        let event = seed_event(&t.store, Price::zero(), 10).await;

        t.cache.set_fail_next_snapshot(true);

        let read = t.engine.event(event.id).await.unwrap().unwrap();
        assert_eq!(read.id, event.id);
    }

    #[tokio::test]
    async fn test_confirm_applies_once() {
        let t = create_test_engine();
        let event = seed_event(&t.store, Price::new(dec!(25.00)).unwrap(), 5).await;
        let buyer = Uuid::new_v4();

        let ReserveOutcome::PaymentRequired {
            order_id,
            session_id,
            ..
        } = t
            .engine
            .reserve(event.id, buyer, "buyer@example.com", qty(2))
            .await
            .unwrap()
        else {
            panic!("expected PaymentRequired");
        };

        let metadata = t.gateway.session(&session_id).unwrap().request.metadata;

        let first = t
            .engine
            .confirm("evt_001", &metadata, "buyer@example.com")
            .await
            .unwrap();
        assert_eq!(first, NotificationOutcome::Applied);

        let order = t.store.orders().find_by_id(order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Paid);
        assert!(t
            .store
            .attendees()
            .find(event.id, buyer)
            .await
            .unwrap()
            .is_some());

        // Replay is absorbed by the ledger
        let second = t
            .engine
            .confirm("evt_001", &metadata, "buyer@example.com")
            .await
            .unwrap();
        assert_eq!(second, NotificationOutcome::Duplicate);
        assert_eq!(t.store.ledger_count(), 1);
    }

    #[tokio::test]
    async fn test_release_returns_seats_once() {
        let t = create_test_engine();
        let event = seed_event(&t.store, Price::new(dec!(25.00)).unwrap(), 5).await;
        let buyer = Uuid::new_v4();

        let ReserveOutcome::PaymentRequired { order_id, session_id, .. } = t
            .engine
            .reserve(event.id, buyer, "buyer@example.com", qty(2))
            .await
            .unwrap()
        else {
            panic!("expected PaymentRequired");
        };

        let metadata = t.gateway.session(&session_id).unwrap().request.metadata;

        let first = t.engine.release("evt_101", &metadata).await.unwrap();
        assert_eq!(first, ReleaseOutcome::Released);

        let updated = t.store.events().find_by_id(event.id).await.unwrap().unwrap();
        assert_eq!(updated.available_seats, 5);

        let order = t.store.orders().find_by_id(order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Expired);

        let second = t.engine.release("evt_101", &metadata).await.unwrap();
        assert_eq!(second, ReleaseOutcome::Duplicate);

        let after_replay = t.store.events().find_by_id(event.id).await.unwrap().unwrap();
        assert_eq!(after_replay.available_seats, 5);
    }

    #[tokio::test]
    async fn test_cancel_open_session_defers_to_gateway() {
        let t = create_test_engine();
        let event = seed_event(&t.store, Price::new(dec!(25.00)).unwrap(), 5).await;
        let buyer = Uuid::new_v4();

        let ReserveOutcome::PaymentRequired { order_id, session_id, .. } = t
            .engine
            .reserve(event.id, buyer, "buyer@example.com", qty(2))
            .await
            .unwrap()
        else {
            panic!("expected PaymentRequired");
        };

        let outcome = t.engine.cancel(order_id, buyer).await.unwrap();
        assert_eq!(outcome, CancelOutcome::Cancelled);

        // Session is closed at the gateway; seats wait for its notification
        let session = t.gateway.session(&session_id).unwrap();
        assert_eq!(session.status, StubSessionStatus::Expired);

        let updated = t.store.events().find_by_id(event.id).await.unwrap().unwrap();
        assert_eq!(updated.available_seats, 3);

        let order = t.store.orders().find_by_id(order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn test_cancel_terminal_session_reclaims_locally() {
        let t = create_test_engine();
        let event = seed_event(&t.store, Price::new(dec!(25.00)).unwrap(), 5).await;
        let buyer = Uuid::new_v4();

        let ReserveOutcome::PaymentRequired { order_id, session_id, .. } = t
            .engine
            .reserve(event.id, buyer, "buyer@example.com", qty(2))
            .await
            .unwrap()
        else {
            panic!("expected PaymentRequired");
        };

        // The gateway already expired the session on its own
        t.gateway.expire_session(&session_id).await.unwrap();

        let outcome = t.engine.cancel(order_id, buyer).await.unwrap();
        assert_eq!(outcome, CancelOutcome::Reclaimed { quantity: 2 });

        let updated = t.store.events().find_by_id(event.id).await.unwrap().unwrap();
        assert_eq!(updated.available_seats, 5);

        let order = t.store.orders().find_by_id(order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Expired);

        // Cancelling again is an idempotent success
        let again = t.engine.cancel(order_id, buyer).await.unwrap();
        assert_eq!(again, CancelOutcome::AlreadyClosed);
    }

    #[tokio::test]
    async fn test_cancel_rejects_foreign_order() {
        let t = create_test_engine();
        let event = seed_event(&t.store, Price::new(dec!(25.00)).unwrap(), 5).await;
        let buyer = Uuid::new_v4();

        let ReserveOutcome::PaymentRequired { order_id, .. } = t
            .engine
            .reserve(event.id, buyer, "buyer@example.com", qty(1))
            .await
            .unwrap()
        else {
            panic!("expected PaymentRequired");
        };

        let err = t.engine.cancel(order_id, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, EngineError::Unauthorized));
    }

    #[tokio::test]
    async fn test_cancel_rejects_settled_order() {
        let t = create_test_engine();
        let event = seed_event(&t.store, Price::zero(), 10).await;
        let buyer = Uuid::new_v4();

        let ReserveOutcome::Confirmed { order_id } = t
            .engine
            .reserve(event.id, buyer, "buyer@example.com", qty(1))
            .await
            .unwrap()
        else {
            panic!("expected Confirmed");
        };

        let err = t.engine.cancel(order_id, buyer).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::CannotCancel {
                status: OrderStatus::Confirmed
            }
        ));
    }

    #[tokio::test]
    async fn test_cancel_missing_order() {
        let t = create_test_engine();

        let err = t
            .engine
            .cancel(Uuid::now_v7(), Uuid::new_v4())
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::OrderNotFound(_)));
    }
}
