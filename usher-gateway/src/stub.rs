//! Stub payment gateway for testing.
//!
//! Simulates hosted checkout behavior without making real API calls.
//! Sessions live in memory; tests drive their lifecycle directly.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::GatewayError;
use crate::ports::{CheckoutRequest, CheckoutSession, PaymentGateway};

// =============================================================================
// Stub Gateway
// =============================================================================

/// Lifecycle state of a stub checkout session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubSessionStatus {
    /// Awaiting payment
    Open,
    /// Buyer paid
    Completed,
    /// Lapsed or force-expired
    Expired,
}

/// A checkout session held by the stub.
#[derive(Debug, Clone)]
pub struct StubSession {
    /// Session id ("cs_stub_N")
    pub id: String,
    /// Fake payment page URL
    pub url: String,
    /// Current lifecycle state
    pub status: StubSessionStatus,
    /// The request that created the session, metadata included
    pub request: CheckoutRequest,
}

/// Stub payment gateway for testing.
///
/// Sessions are created `Open`; tests flip them to `Completed` or let
/// `expire_session` move them to `Expired`. Expiring a session that is no
/// longer open fails with the same terminal-state error class the real
/// gateway produces.
pub struct StubGateway {
    /// Sessions by id
    sessions: RwLock<HashMap<String, StubSession>>,
    /// Session counter for generating ids
    session_counter: RwLock<u64>,
    /// Whether to simulate failures
    fail_next: RwLock<bool>,
}

impl StubGateway {
    /// Create a new stub gateway with no sessions.
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            session_counter: RwLock::new(0),
            fail_next: RwLock::new(false),
        }
    }

    /// Configure the next call to fail with a transient error.
    pub fn set_fail_next(&self, fail: bool) {
        let mut fail_next = self.fail_next.write().unwrap();
        *fail_next = fail;
    }

    /// Look up a session by id.
    pub fn session(&self, session_id: &str) -> Option<StubSession> {
        let sessions = self.sessions.read().unwrap();
        sessions.get(session_id).cloned()
    }

    /// Number of sessions ever created.
    pub fn session_count(&self) -> usize {
        let sessions = self.sessions.read().unwrap();
        sessions.len()
    }

    /// Mark a session paid, as if the buyer completed checkout.
    ///
    /// Returns the session so tests can fabricate the matching payment
    /// notification from its metadata.
    pub fn complete_session(&self, session_id: &str) -> Option<StubSession> {
        let mut sessions = self.sessions.write().unwrap();
        let session = sessions.get_mut(session_id)?;
        session.status = StubSessionStatus::Completed;
        Some(session.clone())
    }

    /// Generate a unique session id.
    fn next_session_id(&self) -> String {
        let mut counter = self.session_counter.write().unwrap();
        *counter += 1;
        format!("cs_stub_{}", *counter)
    }

    /// Check if we should fail the next operation.
    fn should_fail(&self) -> bool {
        let mut fail_next = self.fail_next.write().unwrap();
        let fail = *fail_next;
        *fail_next = false; // Reset after check
        fail
    }
}

impl Default for StubGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn create_session(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutSession, GatewayError> {
        // Check if we should simulate a failure
        if self.should_fail() {
            return Err(GatewayError::RequestFailed(
                "Simulated gateway failure".to_string(),
            ));
        }

        let id = self.next_session_id();
        let url = format!("https://checkout.test/pay/{}", id);

        let session = StubSession {
            id: id.clone(),
            url: url.clone(),
            status: StubSessionStatus::Open,
            request,
        };

        let mut sessions = self.sessions.write().unwrap();
        sessions.insert(id.clone(), session);

        Ok(CheckoutSession { id, url })
    }

    async fn expire_session(&self, session_id: &str) -> Result<(), GatewayError> {
        if self.should_fail() {
            return Err(GatewayError::RequestFailed(
                "Simulated gateway failure".to_string(),
            ));
        }

        let mut sessions = self.sessions.write().unwrap();
        let Some(session) = sessions.get_mut(session_id) else {
            return Err(GatewayError::Api {
                code: "resource_missing".to_string(),
                message: format!("No such checkout session: {}", session_id),
            });
        };

        match session.status {
            StubSessionStatus::Open => {
                session.status = StubSessionStatus::Expired;
                tracing::debug!(session_id, "Stub: session expired");
                Ok(())
            }
            StubSessionStatus::Completed | StubSessionStatus::Expired => {
                Err(GatewayError::Api {
                    code: "invalid_request_error".to_string(),
                    message: format!("Checkout session {} cannot be expired", session_id),
                })
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
