//! Test helpers for Usher in-memory tests.
//!
//! Wires the stub gateway, memory store, and memory cache into one harness
//! and provides event seeding and webhook payload builders.

mod helpers;

pub use helpers::{
    notification_payload, seed_event, seed_free_event, seed_priced_event, sign_notification,
    SeedEventOptions,
};

use std::sync::Arc;

use usher_cache::MemoryCache;
use usher_gateway::StubGateway;
use usher_store::MemoryStore;

/// The full in-memory port set for exercising reservation flows without
/// Postgres, Redis, or a live payment gateway.
pub struct TestHarness {
    /// Stub payment gateway
    pub gateway: Arc<StubGateway>,
    /// In-memory store
    pub store: Arc<MemoryStore>,
    /// In-memory cache, lock lease, and expiration queue
    pub cache: Arc<MemoryCache>,
}

impl TestHarness {
    /// Create a fresh harness with empty ports.
    pub fn new() -> Self {
        Self {
            gateway: Arc::new(StubGateway::new()),
            store: Arc::new(MemoryStore::new()),
            cache: Arc::new(MemoryCache::new()),
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
