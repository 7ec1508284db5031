//! Usher Daemon Library
//!
//! Runtime orchestrator for the Usher reservation engine.
//!
//! # Architecture
//!
//! ```text
//! Client → API Server → Reservation Engine → Store / Cache / Gateway
//!              ↑
//!         Webhook (payment notifications from the gateway)
//!              ↑
//!       Expiration Reaper (abandoned-hold backstop)
//! ```
//!
//! # Components
//!
//! - **Daemon**: Main runtime orchestrator
//! - **API**: HTTP endpoints for clients plus the gateway webhook
//! - **Config**: Environment-based configuration
//!
//! # Example
//!
//! ```rust,ignore
//! use usherd::{Config, Daemon};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("Failed to load config");
//!     let daemon = Daemon::new_stub(config);
//!     daemon.run().await.expect("Daemon error");
//! }
//! ```

#![warn(clippy::all)]

pub mod api;
pub mod config;
pub mod daemon;
pub mod error;

// Re-exports for convenience
pub use config::{ApiConfig, Config, Environment, GatewayConfig};
pub use daemon::Daemon;
pub use error::{DaemonError, DaemonResult};
