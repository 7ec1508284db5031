//! Stripe REST API client for hosted checkout.
//!
//! Provides REST API integration for:
//! - Creating checkout sessions (one line item, seat quantity, metadata)
//! - Force-expiring sessions whose hold window lapsed
//!
//! # Authentication
//!
//! Stripe uses a secret key sent as a bearer token. Request bodies are
//! form-encoded; responses and error envelopes are JSON.

use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::timeout;

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::ports::{CheckoutRequest, CheckoutSession, PaymentGateway};

// =============================================================================
// Constants
// =============================================================================

/// Stripe REST API base URL
const STRIPE_API_URL: &str = "https://api.stripe.com";

/// Request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Currency all sessions are billed in
const CURRENCY: &str = "usd";

// =============================================================================
// Stripe Checkout Client
// =============================================================================

/// Stripe REST API client for hosted checkout sessions.
pub struct StripeCheckoutClient {
    /// HTTP client
    client: Client,
    /// Secret API key
    secret_key: String,
    /// API base URL (overridable for tests)
    base_url: String,
}

impl StripeCheckoutClient {
    /// Create a new checkout client against the production API.
    ///
    /// # Arguments
    ///
    /// * `secret_key` - Stripe secret key (`sk_...`)
    pub fn new(secret_key: String) -> Self {
        Self {
            client: Client::new(),
            secret_key,
            base_url: STRIPE_API_URL.to_string(),
        }
    }

    /// Create a client against a different base URL (for testing).
    pub fn with_base_url(secret_key: String, base_url: String) -> Self {
        Self {
            client: Client::new(),
            secret_key,
            base_url,
        }
    }

    /// Send a form-encoded POST and return the response body.
    async fn post_form(
        &self,
        endpoint: &str,
        params: &[(String, String)],
    ) -> Result<String, GatewayError> {
        let url = format!("{}{}", self.base_url, endpoint);

        let response = timeout(
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
            self.client
                .post(&url)
                .bearer_auth(&self.secret_key)
                .form(params)
                .send(),
        )
        .await
        .map_err(|_| GatewayError::Timeout)?
        .map_err(|e| GatewayError::RequestFailed(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GatewayError::Parse(e.to_string()))?;

        if !status.is_success() {
            return Err(decode_error_body(status, &body));
        }

        Ok(body)
    }
}

#[async_trait]
impl PaymentGateway for StripeCheckoutClient {
    /// Create a hosted checkout session.
    ///
    /// # Endpoint
    ///
    /// `POST /v1/checkout/sessions`
    async fn create_session(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutSession, GatewayError> {
        let params = build_session_params(&request)?;

        let body = self.post_form("/v1/checkout/sessions", &params).await?;

        let session: SessionResponse =
            serde_json::from_str(&body).map_err(|e| GatewayError::Parse(e.to_string()))?;

        let url = session.url.ok_or_else(|| {
            GatewayError::Parse(format!("Session {} has no payment URL", session.id))
        })?;

        tracing::debug!(session_id = %session.id, "Checkout session created");

        Ok(CheckoutSession {
            id: session.id,
            url,
        })
    }

    /// Expire a checkout session.
    ///
    /// # Endpoint
    ///
    /// `POST /v1/checkout/sessions/{id}/expire`
    ///
    /// Fails with a terminal-state error if the session already completed
    /// or expired; [`GatewayError::is_terminal_state`] classifies it.
    async fn expire_session(&self, session_id: &str) -> Result<(), GatewayError> {
        let endpoint = format!("/v1/checkout/sessions/{}/expire", session_id);

        self.post_form(&endpoint, &[]).await?;

        tracing::debug!(session_id, "Checkout session expired");
        Ok(())
    }
}

// =============================================================================
// Request / Response Mapping
// =============================================================================

/// Flatten a checkout request into Stripe's form fields.
fn build_session_params(
    request: &CheckoutRequest,
) -> Result<Vec<(String, String)>, GatewayError> {
    let unit_amount = request.unit_price.as_cents().ok_or_else(|| {
        GatewayError::InvalidParameter(format!("Price out of range: {}", request.unit_price))
    })?;

    let mut params = vec![
        ("mode".to_string(), "payment".to_string()),
        (
            "line_items[0][price_data][currency]".to_string(),
            CURRENCY.to_string(),
        ),
        (
            "line_items[0][price_data][product_data][name]".to_string(),
            request.product_name.clone(),
        ),
        (
            "line_items[0][price_data][unit_amount]".to_string(),
            unit_amount.to_string(),
        ),
        (
            "line_items[0][quantity]".to_string(),
            request.quantity.to_string(),
        ),
        ("success_url".to_string(), request.success_url.clone()),
        ("cancel_url".to_string(), request.cancel_url.clone()),
        (
            "customer_email".to_string(),
            request.customer_email.clone(),
        ),
        (
            "expires_at".to_string(),
            request.expires_at.timestamp().to_string(),
        ),
    ];

    for (key, value) in request.metadata.to_fields() {
        params.push((format!("metadata[{}]", key), value));
    }

    Ok(params)
}

/// Map a non-2xx response body to a gateway error.
fn decode_error_body(status: reqwest::StatusCode, body: &str) -> GatewayError {
    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) {
        let ErrorBody {
            kind,
            code,
            message,
        } = envelope.error;
        return GatewayError::Api {
            code: code.unwrap_or(kind),
            message,
        };
    }
    GatewayError::RequestFailed(format!("HTTP {}: {}", status, body))
}

/// Checkout session response payload.
#[derive(Debug, Deserialize)]
struct SessionResponse {
    /// Session id ("cs_...")
    id: String,
    /// Hosted payment page URL; absent once the session is terminal
    url: Option<String>,
}

/// Stripe error envelope (`{"error": {...}}`).
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    /// Error class ("invalid_request_error", ...)
    #[serde(rename = "type")]
    kind: String,
    /// Specific code ("resource_missing", ...); not always present
    #[serde(default)]
    code: Option<String>,
    message: String,
}

// =============================================================================
// Tests
// =============================================================================
