//! HTTP API for the Usher daemon.
//!
//! Provides REST endpoints for:
//! - Health check
//! - Event listing and creation
//! - Joining an event (reserve seats)
//! - Order listing and cancellation
//! - Payment gateway webhook
//!
//! Caller identity arrives in trusted upstream headers (`x-user-id`,
//! `x-user-email`) set by the fronting auth layer. The webhook route
//! authenticates with the signature header instead.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderName, Method, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn};
use uuid::Uuid;

use usher_cache::CacheLayer;
use usher_domain::{Event, EventCategory, Order, OrderStatus, Price, SeatQuantity};
use usher_engine::{CancelOutcome, EngineError, ReservationEngine, ReserveOutcome};
use usher_gateway::{
    parse_notification, verify_signature, NotificationKind, PaymentGateway, DEFAULT_TOLERANCE,
    SIGNATURE_HEADER,
};
use usher_store::Store;

/// Identity headers set by the fronting auth layer.
pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_EMAIL_HEADER: &str = "x-user-email";

// =============================================================================
// API State
// =============================================================================

/// Shared state for API handlers.
pub struct ApiState<G: PaymentGateway + 'static, S: Store + 'static, C: CacheLayer + 'static> {
    pub engine: Arc<ReservationEngine<G, S, C>>,
    pub webhook_secret: String,
    pub client_url: String,
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Event representation returned by the API.
#[derive(Debug, Serialize)]
pub struct EventResponse {
    pub id: Uuid,
    pub name: String,
    pub location: String,
    pub category: EventCategory,
    pub price: Decimal,
    pub total_seats: u32,
    pub available_seats: u32,
    pub organizer_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Request to create an event.
#[derive(Debug, Deserialize)]
pub struct CreateEventRequest {
    pub name: String,
    pub location: String,
    pub category: EventCategory,
    pub price: Decimal,
    pub total_seats: u32,
}

/// Request to join an event.
#[derive(Debug, Deserialize)]
pub struct JoinRequest {
    pub quantity: u32,
}

/// Response after joining an event.
#[derive(Debug, Serialize)]
pub struct JoinResponse {
    pub order_id: Uuid,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_url: Option<String>,
}

/// Order representation returned by the API.
#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub id: Uuid,
    pub event_id: Uuid,
    pub quantity: u32,
    pub amount: Decimal,
    pub status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_session_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Response after cancelling an order.
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restored_seats: Option<u32>,
}

/// Webhook acknowledgement.
#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

// =============================================================================
// Router
// =============================================================================

/// Create the API router.
pub fn create_router<G, S, C>(state: Arc<ApiState<G, S, C>>) -> Router
where
    G: PaymentGateway + 'static,
    S: Store + 'static,
    C: CacheLayer + 'static,
{
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::predicate({
            let client_url = state.client_url.clone();
            move |origin, _| origin.as_bytes() == client_url.as_bytes()
        }))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static(USER_ID_HEADER),
            HeaderName::from_static(USER_EMAIL_HEADER),
        ]);

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/events", get(list_events_handler))
        .route("/api/events", post(create_event_handler))
        .route("/api/events/:id", get(get_event_handler))
        .route("/api/events/:id/join", post(join_handler))
        .route("/api/orders", get(list_orders_handler))
        .route("/api/orders/:id/cancel", post(cancel_handler))
        .route("/api/webhook", post(webhook_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check endpoint.
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// List all events.
async fn list_events_handler<G, S, C>(
    State(state): State<Arc<ApiState<G, S, C>>>,
) -> Result<Json<Vec<EventResponse>>, (StatusCode, Json<ErrorResponse>)>
where
    G: PaymentGateway + 'static,
    S: Store + 'static,
    C: CacheLayer + 'static,
{
    let events = state.engine.list_events().await.map_err(to_error_response)?;

    Ok(Json(events.iter().map(event_to_response).collect()))
}

/// Read-through single event lookup.
async fn get_event_handler<G, S, C>(
    State(state): State<Arc<ApiState<G, S, C>>>,
    Path(id): Path<Uuid>,
) -> Result<Json<EventResponse>, (StatusCode, Json<ErrorResponse>)>
where
    G: PaymentGateway + 'static,
    S: Store + 'static,
    C: CacheLayer + 'static,
{
    let event = state
        .engine
        .event(id)
        .await
        .map_err(to_error_response)?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse {
                    error: format!("Event not found: {}", id),
                }),
            )
        })?;

    Ok(Json(event_to_response(&event)))
}

/// Create a new event listing. The caller becomes the organizer.
async fn create_event_handler<G, S, C>(
    State(state): State<Arc<ApiState<G, S, C>>>,
    headers: HeaderMap,
    Json(req): Json<CreateEventRequest>,
) -> Result<(StatusCode, Json<EventResponse>), (StatusCode, Json<ErrorResponse>)>
where
    G: PaymentGateway + 'static,
    S: Store + 'static,
    C: CacheLayer + 'static,
{
    let caller = identity(&headers)?;

    let price = Price::new(req.price).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: format!("Invalid price: {}", e),
            }),
        )
    })?;

    let event = Event::new(
        req.name,
        req.location,
        req.category,
        price,
        req.total_seats,
        caller.user_id,
    )
    .map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: format!("Invalid event: {}", e),
            }),
        )
    })?;

    state
        .engine
        .create_event(&event)
        .await
        .map_err(to_error_response)?;

    Ok((StatusCode::CREATED, Json(event_to_response(&event))))
}

/// Reserve seats at an event.
async fn join_handler<G, S, C>(
    State(state): State<Arc<ApiState<G, S, C>>>,
    Path(event_id): Path<Uuid>,
    headers: HeaderMap,
    Json(req): Json<JoinRequest>,
) -> Result<(StatusCode, Json<JoinResponse>), (StatusCode, Json<ErrorResponse>)>
where
    G: PaymentGateway + 'static,
    S: Store + 'static,
    C: CacheLayer + 'static,
{
    let caller = identity(&headers)?;
    let email = caller.email.ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: format!("{} header is required to join", USER_EMAIL_HEADER),
            }),
        )
    })?;

    let quantity = SeatQuantity::new(req.quantity).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: format!("Invalid quantity: {}", e),
            }),
        )
    })?;

    let outcome = state
        .engine
        .reserve(event_id, caller.user_id, &email, quantity)
        .await
        .map_err(to_error_response)?;

    let response = match outcome {
        ReserveOutcome::Confirmed { order_id } => JoinResponse {
            order_id,
            status: "confirmed".to_string(),
            session_id: None,
            payment_url: None,
        },
        ReserveOutcome::PaymentRequired {
            order_id,
            session_id,
            url,
        } => JoinResponse {
            order_id,
            status: "payment_required".to_string(),
            session_id: Some(session_id),
            payment_url: Some(url),
        },
    };

    Ok((StatusCode::CREATED, Json(response)))
}

/// List the caller's orders.
async fn list_orders_handler<G, S, C>(
    State(state): State<Arc<ApiState<G, S, C>>>,
    headers: HeaderMap,
) -> Result<Json<Vec<OrderResponse>>, (StatusCode, Json<ErrorResponse>)>
where
    G: PaymentGateway + 'static,
    S: Store + 'static,
    C: CacheLayer + 'static,
{
    let caller = identity(&headers)?;

    let orders = state
        .engine
        .orders_for(caller.user_id)
        .await
        .map_err(to_error_response)?;

    Ok(Json(orders.iter().map(order_to_response).collect()))
}

/// Cancel an order.
async fn cancel_handler<G, S, C>(
    State(state): State<Arc<ApiState<G, S, C>>>,
    Path(order_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<CancelResponse>, (StatusCode, Json<ErrorResponse>)>
where
    G: PaymentGateway + 'static,
    S: Store + 'static,
    C: CacheLayer + 'static,
{
    let caller = identity(&headers)?;

    let outcome = state
        .engine
        .cancel(order_id, caller.user_id)
        .await
        .map_err(to_error_response)?;

    let response = match outcome {
        CancelOutcome::Cancelled => CancelResponse {
            status: "cancelled".to_string(),
            restored_seats: None,
        },
        CancelOutcome::Reclaimed { quantity } => CancelResponse {
            status: "reclaimed".to_string(),
            restored_seats: Some(quantity),
        },
        CancelOutcome::AlreadyClosed => CancelResponse {
            status: "already_closed".to_string(),
            restored_seats: None,
        },
        CancelOutcome::NoActiveSession => CancelResponse {
            status: "no_active_session".to_string(),
            restored_seats: None,
        },
    };

    Ok(Json(response))
}

/// Payment gateway webhook.
///
/// Signature failures are rejected with 400. An unusable payload is
/// acknowledged, since redelivery cannot fix it. An engine failure while
/// applying an actionable notification returns 500 so the gateway
/// redelivers; the ledger absorbs the duplicate on the retry.
async fn webhook_handler<G, S, C>(
    State(state): State<Arc<ApiState<G, S, C>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, (StatusCode, Json<ErrorResponse>)>
where
    G: PaymentGateway + 'static,
    S: Store + 'static,
    C: CacheLayer + 'static,
{
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: format!("Missing {} header", SIGNATURE_HEADER),
                }),
            )
        })?;

    verify_signature(
        &body,
        signature,
        &state.webhook_secret,
        DEFAULT_TOLERANCE,
        Utc::now(),
    )
    .map_err(|e| {
        warn!(error = %e, "Webhook signature rejected");
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: format!("Webhook error: {}", e),
            }),
        )
    })?;

    let notification = match parse_notification(&body) {
        Ok(notification) => notification,
        Err(e) => {
            warn!(error = %e, "Unusable webhook payload acknowledged");
            return Ok(Json(WebhookAck { received: true }));
        }
    };

    // Actionable kinds always carry metadata after parsing
    let result = match (&notification.kind, &notification.metadata) {
        (NotificationKind::Completed, Some(metadata)) => {
            let email = notification.customer_email.as_deref().unwrap_or_default();
            state
                .engine
                .confirm(&notification.id, metadata, email)
                .await
                .map(|_| ())
        }
        (NotificationKind::Expired | NotificationKind::PaymentFailed, Some(metadata)) => {
            state
                .engine
                .release(&notification.id, metadata)
                .await
                .map(|_| ())
        }
        (NotificationKind::Other(kind), _) => {
            debug!(
                notification_id = %notification.id,
                notification_type = %kind,
                "Ignoring notification type"
            );
            Ok(())
        }
        _ => Ok(()),
    };

    if let Err(e) = result {
        error!(
            notification_id = %notification.id,
            error = %e,
            "Failed to apply notification"
        );
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: "Notification processing failed".to_string(),
            }),
        ));
    }

    Ok(Json(WebhookAck { received: true }))
}

// =============================================================================
// Helpers
// =============================================================================

/// Caller identity from the trusted upstream headers.
struct Identity {
    user_id: Uuid,
    email: Option<String>,
}

fn identity(headers: &HeaderMap) -> Result<Identity, (StatusCode, Json<ErrorResponse>)> {
    let user_id = headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<Uuid>().ok())
        .ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: format!("Missing or invalid {} header", USER_ID_HEADER),
                }),
            )
        })?;

    let email = headers
        .get(USER_EMAIL_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string());

    Ok(Identity { user_id, email })
}

fn to_error_response(error: EngineError) -> (StatusCode, Json<ErrorResponse>) {
    let status = if error.is_transient() {
        StatusCode::SERVICE_UNAVAILABLE
    } else if error.is_conflict() {
        StatusCode::CONFLICT
    } else {
        match &error {
            EngineError::EventNotFound(_) | EngineError::OrderNotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Unauthorized => StatusCode::FORBIDDEN,
            EngineError::CannotCancel { .. } => StatusCode::CONFLICT,
            EngineError::Domain(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    };

    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
}

fn event_to_response(event: &Event) -> EventResponse {
    EventResponse {
        id: event.id,
        name: event.name.clone(),
        location: event.location.clone(),
        category: event.category,
        price: event.price.as_decimal(),
        total_seats: event.total_seats,
        available_seats: event.available_seats,
        organizer_id: event.organizer_id,
        created_at: event.created_at,
    }
}

fn order_to_response(order: &Order) -> OrderResponse {
    OrderResponse {
        id: order.id,
        event_id: order.event_id,
        quantity: order.quantity.get(),
        amount: order.amount,
        status: order.status,
        checkout_session_id: order.checkout_session_id.clone(),
        created_at: order.created_at,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use usher_cache::CacheError;

    #[test]
    fn test_identity_requires_user_id_header() {
        let headers = HeaderMap::new();
        let err = identity(&headers).err().expect("must be rejected");
        assert_eq!(err.0, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_identity_parses_headers() {
        let user_id = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, user_id.to_string().parse().unwrap());
        headers.insert(USER_EMAIL_HEADER, "buyer@example.com".parse().unwrap());

        let caller = identity(&headers).unwrap();
        assert_eq!(caller.user_id, user_id);
        assert_eq!(caller.email.as_deref(), Some("buyer@example.com"));
    }

    #[test]
    fn test_identity_rejects_malformed_user_id() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, "not-a-uuid".parse().unwrap());

        let err = identity(&headers).err().expect("must be rejected");
        assert_eq!(err.0, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            to_error_response(EngineError::Busy).0,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            to_error_response(EngineError::SoldOut { available: 1 }).0,
            StatusCode::CONFLICT
        );
        assert_eq!(
            to_error_response(EngineError::AlreadyJoined).0,
            StatusCode::CONFLICT
        );
        assert_eq!(
            to_error_response(EngineError::EventNotFound(Uuid::now_v7())).0,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            to_error_response(EngineError::Unauthorized).0,
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            to_error_response(EngineError::CannotCancel {
                status: OrderStatus::Paid
            })
            .0,
            StatusCode::CONFLICT
        );
        assert_eq!(
            to_error_response(EngineError::Cache(CacheError::Connection(
                "down".to_string()
            )))
            .0,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_join_response_omits_absent_payment_fields() {
        let response = JoinResponse {
            order_id: Uuid::now_v7(),
            status: "confirmed".to_string(),
            session_id: None,
            payment_url: None,
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(!json.contains("session_id"));
        assert!(!json.contains("payment_url"));
    }

    #[test]
    fn test_cancel_response_carries_restored_seats() {
        let response = CancelResponse {
            status: "reclaimed".to_string(),
            restored_seats: Some(2),
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"restored_seats\":2"));
    }
}
