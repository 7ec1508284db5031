//! Usher Cache Layer
//!
//! Fast-path services in front of the authoritative store: the event
//! snapshot cache, the per-resource lock lease, and the expiration queue.
//!
//! # Architecture
//!
//! - **Ports**: `SnapshotCache`, `ResourceLock`, `ExpirationQueue`
//!   (`CacheLayer` bundles all three)
//! - **In-memory adapter**: for tests and single-node development
//! - **Redis adapter**: production backend (feature `redis`)
//!
//! Nothing here is authoritative. Seat counts live in the store; the lock
//! reduces contention and the snapshot bounds read load, and the engine
//! must stay correct when either misbehaves.

#![warn(clippy::all)]

// Modules
mod error;
mod memory;
mod ports;
#[cfg(feature = "redis")]
mod redis;

// Re-exports
pub use error::CacheError;
pub use memory::MemoryCache;
pub use ports::{CacheLayer, ExpirationQueue, LockToken, ResourceLock, SnapshotCache};
#[cfg(feature = "redis")]
pub use redis::RedisCache;
