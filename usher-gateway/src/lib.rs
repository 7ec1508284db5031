//! Usher Payment Gateway Layer
//!
//! Hosted-checkout integration behind the `PaymentGateway` port:
//! - `StripeCheckoutClient` adapter (REST, bearer auth, form bodies)
//! - Webhook signature verification and notification parsing
//! - `StubGateway` for tests
//!
//! The gateway is the system's unreliable remote: every call can fail,
//! time out, or report a session already in a terminal state. Callers
//! classify errors with [`GatewayError::is_transient`] and
//! [`GatewayError::is_terminal_state`] rather than inspecting messages.

#![warn(clippy::all)]

// Public modules
pub mod error;
pub mod ports;
pub mod stripe_rest;
pub mod stub;
pub mod webhook;

// Re-exports
pub use error::{GatewayError, GatewayResult};
pub use ports::{CheckoutRequest, CheckoutSession, PaymentGateway, SessionMetadata};
pub use stripe_rest::StripeCheckoutClient;
pub use stub::{StubGateway, StubSession, StubSessionStatus};
pub use webhook::{
    parse_notification, sign_payload, verify_signature, NotificationKind, PaymentNotification,
    WebhookError, DEFAULT_TOLERANCE, SIGNATURE_HEADER,
};
