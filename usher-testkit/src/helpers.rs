//! Seeding and payload-building helpers for in-memory tests.

use anyhow::Result;
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use usher_domain::{BuyerId, Event, EventCategory, Price};
use usher_gateway::{sign_payload, SessionMetadata};
use usher_store::{MemoryStore, Store};

/// Options for seeding an event listing.
pub struct SeedEventOptions {
    /// Event name (defaults to "Rust Meetup")
    pub name: String,
    /// Venue (defaults to "Community Hall")
    pub location: String,
    /// Category (defaults to Educational)
    pub category: EventCategory,
    /// Ticket price (defaults to free)
    pub price: Price,
    /// Capacity (defaults to 10)
    pub total_seats: u32,
    /// Organizer (defaults to a fresh id)
    pub organizer_id: BuyerId,
}

impl Default for SeedEventOptions {
    fn default() -> Self {
        Self {
            name: "Rust Meetup".to_string(),
            location: "Community Hall".to_string(),
            category: EventCategory::Educational,
            price: Price::zero(),
            total_seats: 10,
            organizer_id: Uuid::new_v4(),
        }
    }
}

/// Seed an event into the store.
pub async fn seed_event(store: &MemoryStore, options: SeedEventOptions) -> Result<Event> {
    let event = Event::new(
        options.name,
        options.location,
        options.category,
        options.price,
        options.total_seats,
        options.organizer_id,
    )?;
    store.events().save(&event).await?;
    Ok(event)
}

/// Seed a free event with the given capacity.
pub async fn seed_free_event(store: &MemoryStore, total_seats: u32) -> Result<Event> {
    seed_event(
        store,
        SeedEventOptions {
            total_seats,
            ..Default::default()
        },
    )
    .await
}

/// Seed a priced event with the given capacity.
pub async fn seed_priced_event(
    store: &MemoryStore,
    price: Decimal,
    total_seats: u32,
) -> Result<Event> {
    seed_event(
        store,
        SeedEventOptions {
            price: Price::new(price)?,
            total_seats,
            ..Default::default()
        },
    )
    .await
}

/// Build a gateway notification body for a checkout session.
///
/// Metadata is rendered string-valued, the way the gateway echoes it back.
pub fn notification_payload(
    notification_id: &str,
    kind: &str,
    session_id: &str,
    customer_email: Option<&str>,
    metadata: &SessionMetadata,
) -> Result<Vec<u8>> {
    let mut meta = Map::new();
    for (key, value) in metadata.to_fields() {
        meta.insert(key.to_string(), Value::String(value));
    }

    let body = json!({
        "id": notification_id,
        "type": kind,
        "data": {
            "object": {
                "id": session_id,
                "customer_email": customer_email,
                "metadata": meta,
            }
        }
    });

    Ok(serde_json::to_vec(&body)?)
}

/// Sign `payload` the way the gateway does, returning the header value.
pub fn sign_notification(payload: &[u8], secret: &str) -> Result<String> {
    let timestamp = Utc::now().timestamp();
    let signature = sign_payload(payload, secret, timestamp)?;
    Ok(format!("t={timestamp},v1={signature}"))
}
