//! Payment gateway port definitions.
//!
//! The port isolates the reservation engine from the concrete payment
//! provider. Adapters implement it for a hosted-checkout REST API and
//! for tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use usher_domain::{BuyerId, EventId, OrderId, Price};

use crate::error::GatewayError;

// =============================================================================
// Payment Gateway Port
// =============================================================================

/// Port for hosted checkout operations.
///
/// Implementations:
/// - `StubGateway` - For testing (sessions held in memory)
/// - `StripeCheckoutClient` - Hosted checkout over REST
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a hosted checkout session.
    ///
    /// The metadata travels with the session and comes back verbatim on
    /// every asynchronous payment notification; it is the only link between
    /// a notification and our records.
    async fn create_session(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutSession, GatewayError>;

    /// Expire a checkout session so the buyer can no longer pay it.
    ///
    /// Expiring a session that is already expired or completed fails with
    /// an error for which [`GatewayError::is_terminal_state`] returns true.
    async fn expire_session(&self, session_id: &str) -> Result<(), GatewayError>;
}

// =============================================================================
// Checkout Types
// =============================================================================

/// Input for creating a hosted checkout session.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    /// Product name shown on the payment page
    pub product_name: String,
    /// Price per seat
    pub unit_price: Price,
    /// Number of seats billed
    pub quantity: u32,
    /// Email prefilled on the payment page and echoed on notifications
    pub customer_email: String,
    /// Redirect after a successful payment
    pub success_url: String,
    /// Redirect after the buyer backs out
    pub cancel_url: String,
    /// When the gateway should expire the session on its own
    pub expires_at: DateTime<Utc>,
    /// Correlation data echoed back on notifications
    pub metadata: SessionMetadata,
}

/// A created checkout session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    /// Gateway-assigned session id
    pub id: String,
    /// Hosted payment page URL the buyer is redirected to
    pub url: String,
}

/// Correlation metadata attached to a checkout session.
///
/// The gateway stores these as opaque strings and echoes them back on every
/// notification about the session. `order_id` is absent only for sessions
/// created before an order existed; current flows always set it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// Event the seats belong to
    pub event_id: EventId,
    /// Buyer who opened the session
    pub buyer_id: BuyerId,
    /// Seats held by the session
    pub quantity: u32,
    /// Order the session pays for
    pub order_id: Option<OrderId>,
}

impl SessionMetadata {
    /// Flatten into the string key/value pairs gateways store.
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("event_id", self.event_id.to_string()),
            ("buyer_id", self.buyer_id.to_string()),
            ("quantity", self.quantity.to_string()),
        ];
        if let Some(order_id) = self.order_id {
            fields.push(("order_id", order_id.to_string()));
        }
        fields
    }
}

// =============================================================================
// Tests
// =============================================================================
