//! In-memory cache implementation for testing.
//!
//! Simulates the Redis adapter's semantics without a server: expired
//! leases behave as absent, snapshot hits slide their expiry, and the
//! queue keeps jobs until they are explicitly removed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use usher_domain::{Event, EventId, ExpirationJob};

use crate::error::CacheError;
use crate::ports::{ExpirationQueue, LockToken, ResourceLock, SnapshotCache};

struct SnapshotEntry {
    event: Event,
    expires_at: Instant,
}

struct LockLease {
    token: LockToken,
    expires_at: Instant,
}

/// In-memory cache, lock, and expiration queue for testing.
pub struct MemoryCache {
    snapshots: RwLock<HashMap<EventId, SnapshotEntry>>,
    locks: RwLock<HashMap<EventId, LockLease>>,
    queue: RwLock<Vec<ExpirationJob>>,
    /// Whether to simulate failures, per port
    fail_next_snapshot: RwLock<bool>,
    fail_next_lock: RwLock<bool>,
    fail_next_queue: RwLock<bool>,
}

impl MemoryCache {
    /// Create a new empty cache.
    pub fn new() -> Self {
        Self {
            snapshots: RwLock::new(HashMap::new()),
            locks: RwLock::new(HashMap::new()),
            queue: RwLock::new(Vec::new()),
            fail_next_snapshot: RwLock::new(false),
            fail_next_lock: RwLock::new(false),
            fail_next_queue: RwLock::new(false),
        }
    }

    /// Get the number of live snapshots.
    pub fn snapshot_count(&self) -> usize {
        let now = Instant::now();
        self.snapshots
            .read()
            .unwrap()
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    /// Get the number of live lock leases.
    pub fn lock_count(&self) -> usize {
        let now = Instant::now();
        self.locks
            .read()
            .unwrap()
            .values()
            .filter(|l| l.expires_at > now)
            .count()
    }

    /// Get the number of queued jobs.
    pub fn queue_len(&self) -> usize {
        self.queue.read().unwrap().len()
    }

    /// Configure the next snapshot operation to fail.
    pub fn set_fail_next_snapshot(&self, fail: bool) {
        *self.fail_next_snapshot.write().unwrap() = fail;
    }

    /// Configure the next lock operation to fail.
    pub fn set_fail_next_lock(&self, fail: bool) {
        *self.fail_next_lock.write().unwrap() = fail;
    }

    /// Configure the next queue operation to fail.
    pub fn set_fail_next_queue(&self, fail: bool) {
        *self.fail_next_queue.write().unwrap() = fail;
    }

    /// Force an existing lease to expire (simulates a lease outliving its TTL
    /// while the holder is still working).
    pub fn expire_lease(&self, event_id: EventId) {
        let mut locks = self.locks.write().unwrap();
        if let Some(lease) = locks.get_mut(&event_id) {
            lease.expires_at = Instant::now() - Duration::from_millis(1);
        }
    }

    fn should_fail(flag: &RwLock<bool>) -> bool {
        let mut flag = flag.write().unwrap();
        let fail = *flag;
        *flag = false; // Reset after check
        fail
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Snapshot Cache Implementation
// =============================================================================

#[async_trait]
impl SnapshotCache for MemoryCache {
    async fn get(&self, event_id: EventId, ttl: Duration) -> Result<Option<Event>, CacheError> {
        if Self::should_fail(&self.fail_next_snapshot) {
            return Err(CacheError::Backend("Simulated snapshot failure".to_string()));
        }

        let mut snapshots = self.snapshots.write().unwrap();
        match snapshots.get_mut(&event_id) {
            Some(entry) if entry.expires_at > Instant::now() => {
                // Hit slides the expiry forward
                entry.expires_at = Instant::now() + ttl;
                Ok(Some(entry.event.clone()))
            },
            Some(_) => {
                snapshots.remove(&event_id);
                Ok(None)
            },
            None => Ok(None),
        }
    }

    async fn put(&self, event: &Event, ttl: Duration) -> Result<(), CacheError> {
        if Self::should_fail(&self.fail_next_snapshot) {
            return Err(CacheError::Backend("Simulated snapshot failure".to_string()));
        }

        let mut snapshots = self.snapshots.write().unwrap();
        snapshots.insert(
            event.id,
            SnapshotEntry {
                event: event.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn invalidate(&self, event_id: EventId) -> Result<(), CacheError> {
        if Self::should_fail(&self.fail_next_snapshot) {
            return Err(CacheError::Backend("Simulated snapshot failure".to_string()));
        }

        self.snapshots.write().unwrap().remove(&event_id);
        Ok(())
    }
}

// =============================================================================
// Resource Lock Implementation
// =============================================================================

#[async_trait]
impl ResourceLock for MemoryCache {
    async fn acquire(
        &self,
        event_id: EventId,
        ttl: Duration,
    ) -> Result<Option<LockToken>, CacheError> {
        if Self::should_fail(&self.fail_next_lock) {
            return Err(CacheError::Backend("Simulated lock failure".to_string()));
        }

        let mut locks = self.locks.write().unwrap();
        if let Some(lease) = locks.get(&event_id) {
            if lease.expires_at > Instant::now() {
                return Ok(None);
            }
        }

        let token = LockToken::generate();
        locks.insert(
            event_id,
            LockLease {
                token,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(Some(token))
    }

    async fn release(&self, event_id: EventId, token: LockToken) -> Result<bool, CacheError> {
        if Self::should_fail(&self.fail_next_lock) {
            return Err(CacheError::Backend("Simulated lock failure".to_string()));
        }

        let mut locks = self.locks.write().unwrap();
        match locks.get(&event_id) {
            // An expired lease counts as absent, as it would in Redis
            Some(lease) if lease.expires_at <= Instant::now() => {
                locks.remove(&event_id);
                Ok(false)
            },
            Some(lease) if lease.token == token => {
                locks.remove(&event_id);
                Ok(true)
            },
            _ => Ok(false),
        }
    }
}

// =============================================================================
// Expiration Queue Implementation
// =============================================================================

#[async_trait]
impl ExpirationQueue for MemoryCache {
    async fn schedule(&self, job: &ExpirationJob) -> Result<(), CacheError> {
        if Self::should_fail(&self.fail_next_queue) {
            return Err(CacheError::Backend("Simulated queue failure".to_string()));
        }

        let mut queue = self.queue.write().unwrap();
        queue.retain(|j| j.session_id != job.session_id);
        queue.push(job.clone());
        Ok(())
    }

    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<ExpirationJob>, CacheError> {
        if Self::should_fail(&self.fail_next_queue) {
            return Err(CacheError::Backend("Simulated queue failure".to_string()));
        }

        let queue = self.queue.read().unwrap();
        let mut due: Vec<ExpirationJob> =
            queue.iter().filter(|j| j.is_due(now)).cloned().collect();
        due.sort_by_key(|j| j.due_at);
        Ok(due)
    }

    async fn remove(&self, session_id: &str) -> Result<(), CacheError> {
        if Self::should_fail(&self.fail_next_queue) {
            return Err(CacheError::Backend("Simulated queue failure".to_string()));
        }

        self.queue
            .write()
            .unwrap()
            .retain(|j| j.session_id != session_id);
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
