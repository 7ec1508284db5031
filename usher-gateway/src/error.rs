//! Payment gateway error types.

use thiserror::Error;

/// Errors that can occur when talking to the payment gateway.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// HTTP request failed
    #[error("Gateway request failed: {0}")]
    RequestFailed(String),

    /// Request timed out
    #[error("Gateway request timed out")]
    Timeout,

    /// Gateway API returned an error
    #[error("Gateway API error: {code} - {message}")]
    Api {
        /// Machine-readable error code
        code: String,
        /// Human-readable explanation
        message: String,
    },

    /// Failed to parse a gateway response
    #[error("Failed to parse gateway response: {0}")]
    Parse(String),

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

impl GatewayError {
    /// Whether the gateway reports the session as already gone or settled.
    ///
    /// Expiring a session can race the gateway's own expiry or the buyer
    /// completing payment. When that happens the session cannot be expired
    /// twice, but our side may still owe a seat restore, so callers treat
    /// this class as "reconcile locally", not as a failure.
    pub fn is_terminal_state(&self) -> bool {
        match self {
            GatewayError::Api { code, message } => {
                code == "resource_missing"
                    || message.contains("already expired")
                    || message.contains("cannot be expired")
            }
            _ => false,
        }
    }

    /// Whether retrying the same call later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::RequestFailed(_) | GatewayError::Timeout)
    }
}

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;
