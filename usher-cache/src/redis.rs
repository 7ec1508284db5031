//! Redis cache adapter.
//!
//! Implements the three cache ports on one Redis instance:
//! - **Snapshots**: `event:{id}` JSON values with a sliding TTL
//!   (GET + EXPIRE on hit, SET EX on populate, DEL on invalidate)
//! - **Locks**: `lock:event:{id}` holding the fencing token, acquired with
//!   `SET NX PX` and released with an atomic compare-and-delete script
//! - **Expiration queue**: a sorted set scored by due time
//!
//! Uses `ConnectionManager` for pooling; it reconnects on its own and is
//! cheap to clone per command.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::time::Duration;
use tracing::info;

use usher_domain::{Event, EventId, ExpirationJob};

use crate::error::CacheError;
use crate::ports::{ExpirationQueue, LockToken, ResourceLock, SnapshotCache};

const QUEUE_KEY: &str = "expiration_queue";

/// Deletes the lock key only while it still holds the caller's token.
const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

/// Redis-backed cache, lock, and expiration queue.
#[derive(Clone)]
pub struct RedisCache {
    conn_manager: ConnectionManager,
}

impl RedisCache {
    /// Connect to Redis.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        let client = Client::open(redis_url)
            .map_err(|e| CacheError::Connection(format!("Failed to create Redis client: {}", e)))?;

        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            CacheError::Connection(format!("Failed to create Redis connection manager: {}", e))
        })?;

        info!("Redis connectivity: OK");
        Ok(Self { conn_manager })
    }

    fn snapshot_key(event_id: EventId) -> String {
        format!("event:{}", event_id)
    }

    fn lock_key(event_id: EventId) -> String {
        format!("lock:event:{}", event_id)
    }
}

// =============================================================================
// Snapshot Cache Implementation
// =============================================================================

#[async_trait]
impl SnapshotCache for RedisCache {
    async fn get(&self, event_id: EventId, ttl: Duration) -> Result<Option<Event>, CacheError> {
        let mut conn = self.conn_manager.clone();
        let key = Self::snapshot_key(event_id);

        let cached: Option<String> = conn
            .get(&key)
            .await
            .map_err(|e| CacheError::Backend(format!("Failed to read snapshot: {}", e)))?;

        match cached {
            Some(json) => {
                // Hit slides the expiry forward
                let _: bool = conn
                    .expire(&key, ttl.as_secs() as i64)
                    .await
                    .map_err(|e| CacheError::Backend(format!("Failed to refresh TTL: {}", e)))?;
                Ok(Some(serde_json::from_str(&json)?))
            },
            None => Ok(None),
        }
    }

    async fn put(&self, event: &Event, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn_manager.clone();
        let json = serde_json::to_string(event)?;

        let _: () = conn
            .set_ex(Self::snapshot_key(event.id), json, ttl.as_secs())
            .await
            .map_err(|e| CacheError::Backend(format!("Failed to write snapshot: {}", e)))?;
        Ok(())
    }

    async fn invalidate(&self, event_id: EventId) -> Result<(), CacheError> {
        let mut conn = self.conn_manager.clone();

        let _: () = conn
            .del(Self::snapshot_key(event_id))
            .await
            .map_err(|e| CacheError::Backend(format!("Failed to delete snapshot: {}", e)))?;
        Ok(())
    }
}

// =============================================================================
// Resource Lock Implementation
// =============================================================================

#[async_trait]
impl ResourceLock for RedisCache {
    async fn acquire(
        &self,
        event_id: EventId,
        ttl: Duration,
    ) -> Result<Option<LockToken>, CacheError> {
        let mut conn = self.conn_manager.clone();
        let token = LockToken::generate();

        // SET NX: only one holder at a time; PX bounds the lease
        let acquired: Option<String> = redis::cmd("SET")
            .arg(Self::lock_key(event_id))
            .arg(token.to_string())
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::Backend(format!("Failed to acquire lock: {}", e)))?;

        Ok(acquired.map(|_| token))
    }

    async fn release(&self, event_id: EventId, token: LockToken) -> Result<bool, CacheError> {
        let mut conn = self.conn_manager.clone();

        let deleted: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(Self::lock_key(event_id))
            .arg(token.to_string())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| CacheError::Backend(format!("Failed to release lock: {}", e)))?;

        Ok(deleted == 1)
    }
}

// =============================================================================
// Expiration Queue Implementation
// =============================================================================

#[async_trait]
impl ExpirationQueue for RedisCache {
    async fn schedule(&self, job: &ExpirationJob) -> Result<(), CacheError> {
        let mut conn = self.conn_manager.clone();

        let _: () = conn
            .zadd(QUEUE_KEY, &job.session_id, job.due_at.timestamp())
            .await
            .map_err(|e| CacheError::Backend(format!("Failed to schedule job: {}", e)))?;
        Ok(())
    }

    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<ExpirationJob>, CacheError> {
        let mut conn = self.conn_manager.clone();

        let entries: Vec<(String, i64)> = conn
            .zrangebyscore_withscores(QUEUE_KEY, "-inf", now.timestamp())
            .await
            .map_err(|e| CacheError::Backend(format!("Failed to read due jobs: {}", e)))?;

        Ok(entries
            .into_iter()
            .map(|(session_id, score)| {
                ExpirationJob::new(
                    session_id,
                    DateTime::from_timestamp(score, 0).unwrap_or_default(),
                )
            })
            .collect())
    }

    async fn remove(&self, session_id: &str) -> Result<(), CacheError> {
        let mut conn = self.conn_manager.clone();

        let _: () = conn
            .zrem(QUEUE_KEY, session_id)
            .await
            .map_err(|e| CacheError::Backend(format!("Failed to remove job: {}", e)))?;
        Ok(())
    }
}
