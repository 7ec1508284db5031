//! Cache layer port definitions.
//!
//! Ports define the interfaces for the fast-path services: the snapshot
//! cache, the per-resource lock, and the expiration queue. Adapters
//! implement these ports for specific backends (Redis, in-memory).
//!
//! None of these ports is a source of truth. The snapshot cache is a
//! best-effort accelerator, the lock reduces contention without being
//! required for correctness, and the queue only schedules backstop work.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use usher_domain::{Event, EventId, ExpirationJob};

use crate::error::CacheError;

// =============================================================================
// Lock token
// =============================================================================

/// Random fencing token proving ownership of a lock lease.
///
/// Ownership is established by token equality at release time, never by
/// the mere existence of the lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockToken(Uuid);

impl LockToken {
    /// Generate a fresh random token.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for LockToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Snapshot Cache Port
// =============================================================================

/// Port for the read-through event snapshot cache.
///
/// Implementations:
/// - `MemoryCache` - For testing and single-node development
/// - `RedisCache` - Production backend (feature `redis`)
#[async_trait]
pub trait SnapshotCache: Send + Sync {
    /// Get a cached event snapshot.
    ///
    /// A hit refreshes the sliding expiry to `ttl` from now.
    async fn get(&self, event_id: EventId, ttl: Duration) -> Result<Option<Event>, CacheError>;

    /// Cache an event snapshot with the given TTL.
    async fn put(&self, event: &Event, ttl: Duration) -> Result<(), CacheError>;

    /// Drop the cached snapshot for an event.
    async fn invalidate(&self, event_id: EventId) -> Result<(), CacheError>;
}

// =============================================================================
// Resource Lock Port
// =============================================================================

/// Port for the per-resource mutual-exclusion lease.
#[async_trait]
pub trait ResourceLock: Send + Sync {
    /// Try to acquire the lease for an event.
    ///
    /// Fail-fast: returns `Ok(None)` when another holder has the lease.
    /// No waiting, no retry.
    async fn acquire(
        &self,
        event_id: EventId,
        ttl: Duration,
    ) -> Result<Option<LockToken>, CacheError>;

    /// Release the lease, but only if `token` still owns it
    /// (atomic compare-then-delete).
    ///
    /// Returns whether the lease was actually deleted. `false` means the
    /// lease expired and may already belong to a successor.
    async fn release(&self, event_id: EventId, token: LockToken) -> Result<bool, CacheError>;
}

// =============================================================================
// Expiration Queue Port
// =============================================================================

/// Port for the time-ordered queue of scheduled session expirations.
#[async_trait]
pub trait ExpirationQueue: Send + Sync {
    /// Schedule a job. Re-scheduling the same session replaces its due time.
    async fn schedule(&self, job: &ExpirationJob) -> Result<(), CacheError>;

    /// List all jobs due at or before `now`, earliest first.
    ///
    /// Jobs stay queued until [`ExpirationQueue::remove`] is called, so an
    /// interrupted sweep picks them up again.
    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<ExpirationJob>, CacheError>;

    /// Remove a processed job.
    async fn remove(&self, session_id: &str) -> Result<(), CacheError>;
}

// =============================================================================
// Umbrella
// =============================================================================

/// Everything a cache adapter provides, as one bound.
pub trait CacheLayer: SnapshotCache + ResourceLock + ExpirationQueue {}

impl<T: SnapshotCache + ResourceLock + ExpirationQueue> CacheLayer for T {}

// =============================================================================
// Tests
// =============================================================================
