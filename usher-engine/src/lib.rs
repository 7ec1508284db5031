//! Usher Reservation Engine
//!
//! Orchestrates the seat reservation lifecycle over the store, cache, and
//! payment gateway ports.
//!
//! # Architecture
//!
//! ```text
//! API Request → Engine → Lock Lease → Store Transaction → Gateway Session
//!                                 ↑
//!                        Reaper / Webhook Notifications
//! ```
//!
//! # Components
//!
//! - **Engine**: Reserve, confirm, release, and cancel flows
//! - **Reaper**: Background sweep that expires abandoned checkout sessions
//!
//! # Example
//!
//! ```rust,ignore
//! use usher_engine::{EngineConfig, ReservationEngine};
//! use usher_cache::MemoryCache;
//! use usher_gateway::StubGateway;
//! use usher_store::MemoryStore;
//! use std::sync::Arc;
//!
//! let engine = ReservationEngine::new(
//!     Arc::new(StubGateway::new()),
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(MemoryCache::new()),
//!     EngineConfig::default(),
//! );
//!
//! let outcome = engine.reserve(event_id, buyer_id, email, quantity).await?;
//! ```

#![warn(clippy::all)]

pub mod engine;
pub mod error;
pub mod reaper;

// Re-exports for convenience
pub use engine::{CancelOutcome, EngineConfig, ReservationEngine, ReserveOutcome};
pub use error::{EngineError, EngineResult};
pub use reaper::{ExpirationReaper, DEFAULT_REAPER_INTERVAL_SECS};
