//! Usher Storage Layer
//!
//! Provides persistence for events, orders, attendees, and the
//! notification ledger.
//!
//! # Architecture
//!
//! - **Repository traits**: Define the storage interface (ports)
//! - **Conditional transactions**: Named methods on [`Store`] that finalize
//!   every capacity-changing decision atomically
//! - **In-memory store**: Fast implementation for testing
//! - **PostgreSQL store**: Production implementation (feature `postgres`)
//!
//! # Usage
//!
//! ```rust
//! use usher_store::{EventRepository, MemoryStore};
//! use usher_domain::{Event, EventCategory, Price};
//! use uuid::Uuid;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = MemoryStore::new();
//!
//!     let event = Event::new(
//!         "Launch Party".to_string(),
//!         "Main Hall".to_string(),
//!         EventCategory::Fun,
//!         Price::zero(),
//!         100,
//!         Uuid::now_v7(),
//!     )
//!     .unwrap();
//!     EventRepository::save(&store, &event).await.unwrap();
//!
//!     let all = EventRepository::list(&store).await.unwrap();
//!     println!("Events: {}", all.len());
//! }
//! ```

#![warn(clippy::all)]

// Modules
mod error;
mod memory;
#[cfg(feature = "postgres")]
mod postgres;
mod repository;

// Re-exports
pub use error::StoreError;
pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PgStore;
pub use repository::{
    AttendanceConfirmation, AttendeeRepository, EventRepository, HoldOutcome, LedgerRepository,
    NotificationOutcome, OrderRepository, ReclaimOutcome, ReleaseOutcome, SeatHold, SeatRelease,
    Store,
};
