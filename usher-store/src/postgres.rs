//! PostgreSQL store adapter.
//!
//! Implements the repository traits and the conditional transactions on
//! top of sqlx. The transactions take a row lock on the event
//! (`SELECT ... FOR UPDATE`) and probe attendee/ledger uniqueness with
//! `INSERT ... ON CONFLICT DO NOTHING`, so concurrent writers serialize
//! per event and replays collapse onto the first delivery.
//!
//! This module uses dynamic queries (sqlx::query) instead of compile-time
//! checked macros (sqlx::query!) to allow compilation without DATABASE_URL.

use crate::error::StoreError;
use crate::repository::{
    AttendanceConfirmation, AttendeeRepository, EventRepository, HoldOutcome, LedgerRepository,
    NotificationOutcome, OrderRepository, ReclaimOutcome, ReleaseOutcome, SeatHold, SeatRelease,
    Store,
};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tracing::info;
use usher_domain::{
    Attendee, BuyerId, Event, EventCategory, EventId, LedgerEntry, NotificationEffect, Order,
    OrderId, OrderStatus, Price, SeatQuantity,
};

/// PostgreSQL store.
///
/// Wraps a PgPool; cheap to clone the Arc into other components.
pub struct PgStore {
    pool: Arc<PgPool>,
}

impl PgStore {
    /// Create a store over an existing pool.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Connect to the database and create a store.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        info!("Database connectivity: OK");
        Ok(Self::new(Arc::new(pool)))
    }

    /// Run all pending migrations. Idempotent.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        info!("Running database migrations...");
        sqlx::migrate!("../migrations")
            .run(self.pool.as_ref())
            .await
            .map_err(|e| StoreError::Database(format!("Migration failed: {}", e)))?;
        info!("Migrations completed successfully");
        Ok(())
    }

    /// Get a reference to the underlying pool (for testing).
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Convert a non-negative integer column back to u32.
fn to_u32(value: i32, column: &str) -> Result<u32, StoreError> {
    u32::try_from(value)
        .map_err(|_| StoreError::Deserialization(format!("Invalid {}: {}", column, value)))
}

fn parse_event_row(row: &sqlx::postgres::PgRow) -> Result<Event, StoreError> {
    let category: String = row.try_get("category")?;
    let price: Decimal = row.try_get("price")?;
    let total_seats: i32 = row.try_get("total_seats")?;
    let available_seats: i32 = row.try_get("available_seats")?;

    Ok(Event {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        location: row.try_get("location")?,
        category: EventCategory::parse(&category)?,
        price: Price::new(price)?,
        total_seats: to_u32(total_seats, "total_seats")?,
        available_seats: to_u32(available_seats, "available_seats")?,
        organizer_id: row.try_get("organizer_id")?,
        created_at: row.try_get("created_at")?,
    })
}

fn parse_order_row(row: &sqlx::postgres::PgRow) -> Result<Order, StoreError> {
    let quantity: i32 = row.try_get("quantity")?;
    let status: String = row.try_get("status")?;

    Ok(Order {
        id: row.try_get("id")?,
        event_id: row.try_get("event_id")?,
        buyer_id: row.try_get("buyer_id")?,
        quantity: SeatQuantity::new(to_u32(quantity, "quantity")?)?,
        amount: row.try_get("amount")?,
        status: OrderStatus::parse(&status)?,
        checkout_session_id: row.try_get::<Option<String>, _>("checkout_session_id")?,
        error: row.try_get::<Option<String>, _>("error")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn parse_attendee_row(row: &sqlx::postgres::PgRow) -> Result<Attendee, StoreError> {
    Ok(Attendee {
        event_id: row.try_get("event_id")?,
        buyer_id: row.try_get("buyer_id")?,
        email: row.try_get("email")?,
        order_id: row.try_get::<Option<OrderId>, _>("order_id")?,
        joined_at: row.try_get("joined_at")?,
    })
}

fn parse_ledger_row(row: &sqlx::postgres::PgRow) -> Result<LedgerEntry, StoreError> {
    let effect: String = row.try_get("effect")?;
    Ok(LedgerEntry {
        notification_id: row.try_get("notification_id")?,
        effect: NotificationEffect::parse(&effect)?,
        order_id: row.try_get::<Option<OrderId>, _>("order_id")?,
        processed_at: row.try_get("processed_at")?,
    })
}

const EVENT_COLUMNS: &str = "id, name, location, category, price, total_seats, available_seats, organizer_id, created_at";
const ORDER_COLUMNS: &str = "id, event_id, buyer_id, quantity, amount, status, checkout_session_id, error, created_at, updated_at";

// =============================================================================
// Event Repository Implementation
// =============================================================================

#[async_trait]
impl EventRepository for PgStore {
    async fn save(&self, event: &Event) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO events (id, name, location, category, price, total_seats, available_seats, organizer_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                location = EXCLUDED.location,
                category = EXCLUDED.category,
                price = EXCLUDED.price,
                total_seats = EXCLUDED.total_seats,
                available_seats = EXCLUDED.available_seats
            "#,
        )
        .bind(event.id)
        .bind(&event.name)
        .bind(&event.location)
        .bind(event.category.name())
        .bind(event.price.as_decimal())
        .bind(event.total_seats as i32)
        .bind(event.available_seats as i32)
        .bind(event.organizer_id)
        .bind(event.created_at)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: EventId) -> Result<Option<Event>, StoreError> {
        let row = sqlx::query(&format!("SELECT {} FROM events WHERE id = $1", EVENT_COLUMNS))
            .bind(id)
            .fetch_optional(self.pool.as_ref())
            .await?;
        row.map(|r| parse_event_row(&r)).transpose()
    }

    async fn list(&self) -> Result<Vec<Event>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM events ORDER BY created_at DESC",
            EVENT_COLUMNS
        ))
        .fetch_all(self.pool.as_ref())
        .await?;
        rows.iter().map(parse_event_row).collect()
    }
}

// =============================================================================
// Order Repository Implementation
// =============================================================================

#[async_trait]
impl OrderRepository for PgStore {
    async fn save(&self, order: &Order) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, event_id, buyer_id, quantity, amount, status, checkout_session_id, error, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                checkout_session_id = EXCLUDED.checkout_session_id,
                error = EXCLUDED.error,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(order.id)
        .bind(order.event_id)
        .bind(order.buyer_id)
        .bind(order.quantity.get() as i32)
        .bind(order.amount)
        .bind(order.status.name())
        .bind(order.checkout_session_id.as_deref())
        .bind(order.error.as_deref())
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query(&format!("SELECT {} FROM orders WHERE id = $1", ORDER_COLUMNS))
            .bind(id)
            .fetch_optional(self.pool.as_ref())
            .await?;
        row.map(|r| parse_order_row(&r)).transpose()
    }

    async fn find_by_buyer(&self, buyer_id: BuyerId) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM orders WHERE buyer_id = $1 ORDER BY created_at DESC",
            ORDER_COLUMNS
        ))
        .bind(buyer_id)
        .fetch_all(self.pool.as_ref())
        .await?;
        rows.iter().map(parse_order_row).collect()
    }

    async fn find_by_session(&self, session_id: &str) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM orders WHERE checkout_session_id = $1",
            ORDER_COLUMNS
        ))
        .bind(session_id)
        .fetch_optional(self.pool.as_ref())
        .await?;
        row.map(|r| parse_order_row(&r)).transpose()
    }
}

// =============================================================================
// Attendee Repository Implementation
// =============================================================================

#[async_trait]
impl AttendeeRepository for PgStore {
    async fn find(
        &self,
        event_id: EventId,
        buyer_id: BuyerId,
    ) -> Result<Option<Attendee>, StoreError> {
        let row = sqlx::query(
            "SELECT event_id, buyer_id, email, order_id, joined_at FROM attendees WHERE event_id = $1 AND buyer_id = $2",
        )
        .bind(event_id)
        .bind(buyer_id)
        .fetch_optional(self.pool.as_ref())
        .await?;
        row.map(|r| parse_attendee_row(&r)).transpose()
    }

    async fn list_for_event(&self, event_id: EventId) -> Result<Vec<Attendee>, StoreError> {
        let rows = sqlx::query(
            "SELECT event_id, buyer_id, email, order_id, joined_at FROM attendees WHERE event_id = $1 ORDER BY joined_at ASC",
        )
        .bind(event_id)
        .fetch_all(self.pool.as_ref())
        .await?;
        rows.iter().map(parse_attendee_row).collect()
    }
}

// =============================================================================
// Ledger Repository Implementation
// =============================================================================

#[async_trait]
impl LedgerRepository for PgStore {
    async fn find(&self, notification_id: &str) -> Result<Option<LedgerEntry>, StoreError> {
        let row = sqlx::query(
            "SELECT notification_id, effect, order_id, processed_at FROM notification_ledger WHERE notification_id = $1",
        )
        .bind(notification_id)
        .fetch_optional(self.pool.as_ref())
        .await?;
        row.map(|r| parse_ledger_row(&r)).transpose()
    }
}

// =============================================================================
// Store Implementation (conditional transactions)
// =============================================================================

#[async_trait]
impl Store for PgStore {
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
        let mut tx = self.pool.begin().await?;

        // Event row lock serializes concurrent holds on the same event
        let row = sqlx::query("SELECT available_seats FROM events WHERE id = $1 FOR UPDATE")
            .bind(hold.event_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::not_found("event", hold.event_id.to_string()))?;
        let available: i32 = row.try_get("available_seats")?;
        let available = to_u32(available, "available_seats")?;

        let joined = sqlx::query("SELECT 1 FROM attendees WHERE event_id = $1 AND buyer_id = $2")
            .bind(hold.event_id)
            .bind(hold.buyer_id)
            .fetch_optional(&mut *tx)
            .await?;
        if joined.is_some() {
            return Ok(HoldOutcome::AlreadyJoined);
        }

        let quantity = hold.quantity.get();
        if available < quantity {
            return Ok(HoldOutcome::SoldOut { available });
        }

        sqlx::query("UPDATE events SET available_seats = available_seats - $2 WHERE id = $1")
            .bind(hold.event_id)
            .bind(quantity as i32)
            .execute(&mut *tx)
            .await?;

        if hold.confirm_immediately {
            sqlx::query(
                r#"
                INSERT INTO attendees (event_id, buyer_id, email, order_id, joined_at)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (event_id, buyer_id) DO NOTHING
                "#,
            )
            .bind(hold.event_id)
            .bind(hold.buyer_id)
            .bind(&hold.email)
            .bind(hold.order_id)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;

            sqlx::query("UPDATE orders SET status = 'confirmed', updated_at = $2 WHERE id = $1")
                .bind(hold.order_id)
                .bind(Utc::now())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(HoldOutcome::Held)
    }

    async fn record_confirmation(
        &self,
        confirmation: &AttendanceConfirmation,
    ) -> Result<NotificationOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        // The ledger insert doubles as the duplicate probe
        let inserted = sqlx::query(
            r#"
            INSERT INTO notification_ledger (notification_id, effect, order_id, processed_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (notification_id) DO NOTHING
            "#,
        )
        .bind(&confirmation.notification_id)
        .bind(NotificationEffect::Confirmed.name())
        .bind(confirmation.order_id)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;
        if inserted.rows_affected() == 0 {
            return Ok(NotificationOutcome::Duplicate);
        }

        sqlx::query(
            r#"
            INSERT INTO attendees (event_id, buyer_id, email, order_id, joined_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (event_id, buyer_id) DO NOTHING
            "#,
        )
        .bind(confirmation.event_id)
        .bind(confirmation.buyer_id)
        .bind(&confirmation.email)
        .bind(confirmation.order_id)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        if let Some(order_id) = confirmation.order_id {
            sqlx::query("UPDATE orders SET status = 'paid', updated_at = $2 WHERE id = $1")
                .bind(order_id)
                .bind(Utc::now())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(NotificationOutcome::Applied)
    }

    async fn record_release(&self, release: &SeatRelease) -> Result<ReleaseOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO notification_ledger (notification_id, effect, order_id, processed_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (notification_id) DO NOTHING
            "#,
        )
        .bind(&release.notification_id)
        .bind(NotificationEffect::Released.name())
        .bind(release.order_id)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;
        if inserted.rows_affected() == 0 {
            return Ok(ReleaseOutcome::Duplicate);
        }

        // A concurrent cancel may already have reconciled this order; the
        // ledger entry commits either way, the increment only once.
        if let Some(order_id) = release.order_id {
            let row = sqlx::query("SELECT status FROM orders WHERE id = $1 FOR UPDATE")
                .bind(order_id)
                .fetch_optional(&mut *tx)
                .await?;
            if let Some(row) = row {
                let status: String = row.try_get("status")?;
                let status = OrderStatus::parse(&status)?;
                if matches!(status, OrderStatus::Expired | OrderStatus::Cancelled) {
                    tx.commit().await?;
                    return Ok(ReleaseOutcome::OrderAlreadyClosed);
                }
            }
        }

        let updated = sqlx::query(
            "UPDATE events SET available_seats = LEAST(total_seats, available_seats + $2) WHERE id = $1",
        )
        .bind(release.event_id)
        .bind(release.quantity.get() as i32)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::not_found("event", release.event_id.to_string()));
        }

        if let Some(order_id) = release.order_id {
            sqlx::query("UPDATE orders SET status = 'expired', updated_at = $2 WHERE id = $1")
                .bind(order_id)
                .bind(Utc::now())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(ReleaseOutcome::Released)
    }

    async fn reclaim_abandoned_order(
        &self,
        order_id: OrderId,
    ) -> Result<ReclaimOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT event_id, quantity, status FROM orders WHERE id = $1 FOR UPDATE")
            .bind(order_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::not_found("order", order_id.to_string()))?;
        let event_id: EventId = row.try_get("event_id")?;
        let quantity: i32 = row.try_get("quantity")?;
        let status: String = row.try_get("status")?;
        let status = OrderStatus::parse(&status)?;

        // Only a still-open hold returns its seats
        if !matches!(status, OrderStatus::Pending | OrderStatus::Failed) {
            return Ok(ReclaimOutcome::AlreadyClosed);
        }

        let updated = sqlx::query(
            "UPDATE events SET available_seats = LEAST(total_seats, available_seats + $2) WHERE id = $1",
        )
        .bind(event_id)
        .bind(quantity)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::not_found("event", event_id.to_string()));
        }

        sqlx::query("UPDATE orders SET status = 'expired', updated_at = $2 WHERE id = $1")
            .bind(order_id)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(ReclaimOutcome::Reclaimed {
            quantity: to_u32(quantity, "quantity")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn test_event(seats: u32, price: Decimal) -> Event {
        Event::new(
            "Harbor Lights".to_string(),
            "Dock 4".to_string(),
            EventCategory::Fun,
            Price::new(price).unwrap(),
            seats,
            Uuid::now_v7(),
        )
        .unwrap()
    }

    fn test_order(event: &Event, buyer_id: BuyerId, quantity: u32) -> Order {
        let quantity = SeatQuantity::new(quantity).unwrap();
        Order::pending(event.id, buyer_id, quantity, event.price.total(quantity))
    }

    /// Run with: `cargo test -p usher-store --features postgres`
    #[sqlx::test(migrations = "../migrations")]
    async fn test_commit_reservation_and_duplicate_join(pool: PgPool) {
        let store = PgStore::new(Arc::new(pool));

        let event = test_event(5, dec!(0));
        EventRepository::save(&store, &event).await.unwrap();

        let buyer_id = Uuid::now_v7();
        let order = test_order(&event, buyer_id, 1);
        OrderRepository::save(&store, &order).await.unwrap();

        let outcome = store
            .commit_reservation(&SeatHold {
                event_id: event.id,
                buyer_id,
                email: "a@example.com".to_string(),
                order_id: order.id,
                quantity: order.quantity,
                confirm_immediately: true,
            })
            .await
            .unwrap();
        assert_eq!(outcome, HoldOutcome::Held);

        let stored = EventRepository::find_by_id(&store, event.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.available_seats, 4);

        // Same buyer again: the attendee probe wins
        let second = test_order(&event, buyer_id, 1);
        OrderRepository::save(&store, &second).await.unwrap();
        let outcome = store
            .commit_reservation(&SeatHold {
                event_id: event.id,
                buyer_id,
                email: "a@example.com".to_string(),
                order_id: second.id,
                quantity: second.quantity,
                confirm_immediately: true,
            })
            .await
            .unwrap();
        assert_eq!(outcome, HoldOutcome::AlreadyJoined);

        let stored = EventRepository::find_by_id(&store, event.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.available_seats, 4);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_release_replay_absorbed(pool: PgPool) {
        let store = PgStore::new(Arc::new(pool));

        let mut event = test_event(10, dec!(25));
        event.available_seats = 8;
        EventRepository::save(&store, &event).await.unwrap();
        let order = test_order(&event, Uuid::now_v7(), 2);
        OrderRepository::save(&store, &order).await.unwrap();

        let release = SeatRelease {
            notification_id: "evt_pg_1".to_string(),
            event_id: event.id,
            quantity: order.quantity,
            order_id: Some(order.id),
        };

        let outcome = store.record_release(&release).await.unwrap();
        assert_eq!(outcome, ReleaseOutcome::Released);
        let outcome = store.record_release(&release).await.unwrap();
        assert_eq!(outcome, ReleaseOutcome::Duplicate);

        let stored = EventRepository::find_by_id(&store, event.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.available_seats, 10);
        let stored = OrderRepository::find_by_id(&store, order.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, OrderStatus::Expired);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_reclaim_abandoned_order(pool: PgPool) {
        let store = PgStore::new(Arc::new(pool));

        let mut event = test_event(10, dec!(25));
        event.available_seats = 7;
        EventRepository::save(&store, &event).await.unwrap();
        let order = test_order(&event, Uuid::now_v7(), 3);
        OrderRepository::save(&store, &order).await.unwrap();

        let outcome = store.reclaim_abandoned_order(order.id).await.unwrap();
        assert_eq!(outcome, ReclaimOutcome::Reclaimed { quantity: 3 });

        let outcome = store.reclaim_abandoned_order(order.id).await.unwrap();
        assert_eq!(outcome, ReclaimOutcome::AlreadyClosed);

        let stored = EventRepository::find_by_id(&store, event.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.available_seats, 10);
    }
}
