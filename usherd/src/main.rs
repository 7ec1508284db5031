//! Usher Daemon
//!
//! Runtime orchestrator for the reservation engine, reaper, and API server.
//!
//! # Usage
//!
//! ```bash
//! # Start with default configuration
//! cargo run -p usherd
//!
//! # Start with custom environment
//! USHER_ENVIRONMENT=test USHER_API_PORT=8081 cargo run -p usherd
//! ```
//!
//! # Environment Variables
//!
//! - `USHER_ENVIRONMENT`: Environment (test, development, production)
//! - `USHER_API_HOST`: API host (default: 127.0.0.1)
//! - `USHER_API_PORT`: API port (default: 8080)
//! - `USHER_CLIENT_URL`: Client base URL for checkout redirects (default: http://localhost:5173)
//! - `USHER_LOCK_TTL_MS`: Event lock lease TTL (default: 10000)
//! - `USHER_SNAPSHOT_TTL_SECS`: Cached snapshot TTL (default: 3600)
//! - `USHER_HOLD_WINDOW_SECS`: Unpaid hold lifetime (default: 600)
//! - `USHER_SESSION_EXPIRY_SECS`: Checkout session lifetime (default: 1800)
//! - `USHER_REAPER_INTERVAL_SECS`: Reaper sweep interval (default: 10)
//! - `USHER_GATEWAY_SECRET`: Gateway API key (required in production)
//! - `USHER_WEBHOOK_SECRET`: Webhook signing secret (required in production)
//! - `DATABASE_URL`, `REDIS_URL`: Production adapters (with the
//!   `postgres` and `redis-cache` features)

use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use usherd::{Config, Daemon, Environment};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("usherd=info".parse()?))
        .init();

    // Load configuration
    let config = Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        api_host = %config.api.host,
        api_port = config.api.port,
        "Usher Daemon"
    );

    match config.environment {
        Environment::Production => run_production(config).await,
        _ => {
            // Stub gateway and in-memory adapters
            let daemon = Daemon::new_stub(config);
            daemon.run().await?;
            Ok(())
        }
    }
}

#[cfg(all(feature = "postgres", feature = "redis-cache"))]
async fn run_production(config: Config) -> anyhow::Result<()> {
    use std::sync::Arc;
    use usher_cache::RedisCache;
    use usher_gateway::StripeCheckoutClient;
    use usher_store::PgStore;

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL is required in production"))?;
    let redis_url = std::env::var("REDIS_URL")
        .map_err(|_| anyhow::anyhow!("REDIS_URL is required in production"))?;

    let store = Arc::new(PgStore::connect(&database_url).await?);
    let cache = Arc::new(RedisCache::connect(&redis_url).await?);
    let gateway = Arc::new(StripeCheckoutClient::new(config.gateway.secret_key.clone()));

    let daemon = Daemon::new(config, gateway, store, cache);
    daemon.run().await?;
    Ok(())
}

#[cfg(not(all(feature = "postgres", feature = "redis-cache")))]
async fn run_production(_config: Config) -> anyhow::Result<()> {
    anyhow::bail!(
        "Production mode requires building with --features postgres,redis-cache"
    )
}
