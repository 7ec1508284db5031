//! Daemon: Main runtime orchestrator.
//!
//! The Daemon ties together all components:
//! - Reservation Engine (reserve, confirm, release, cancel)
//! - Expiration Reaper (abandoned-hold backstop)
//! - API Server (HTTP endpoints + webhook)
//!
//! # Lifecycle
//!
//! 1. Load configuration
//! 2. Initialize components
//! 3. Start API server
//! 4. Spawn the expiration reaper
//! 5. Wait for shutdown signal (SIGINT)
//! 6. Cancel the reaper and drain it

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use usher_cache::{CacheLayer, MemoryCache};
use usher_engine::{ExpirationReaper, ReservationEngine};
use usher_gateway::{PaymentGateway, StubGateway};
use usher_store::{MemoryStore, Store};

use crate::api::{create_router, ApiState};
use crate::config::Config;
use crate::error::{DaemonError, DaemonResult};

// =============================================================================
// Daemon
// =============================================================================

/// The main Usher daemon.
pub struct Daemon<G: PaymentGateway + 'static, S: Store + 'static, C: CacheLayer + 'static> {
    /// Configuration
    config: Config,
    /// Reservation engine
    engine: Arc<ReservationEngine<G, S, C>>,
    /// Payment gateway (shared with the reaper)
    gateway: Arc<G>,
    /// Cache layer (shared with the reaper)
    cache: Arc<C>,
    /// Store
    store: Arc<S>,
}

impl Daemon<StubGateway, MemoryStore, MemoryCache> {
    /// Create a new daemon with stub components (for testing/development).
    pub fn new_stub(config: Config) -> Self {
        let gateway = Arc::new(StubGateway::new());
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(MemoryCache::new());

        Self::new(config, gateway, store, cache)
    }
}

impl<G: PaymentGateway + 'static, S: Store + 'static, C: CacheLayer + 'static> Daemon<G, S, C> {
    /// Create a new daemon with provided components.
    pub fn new(config: Config, gateway: Arc<G>, store: Arc<S>, cache: Arc<C>) -> Self {
        let engine = Arc::new(ReservationEngine::new(
            gateway.clone(),
            store.clone(),
            cache.clone(),
            config.engine.clone(),
        ));

        Self {
            config,
            engine,
            gateway,
            cache,
            store,
        }
    }

    /// Run the daemon.
    ///
    /// This method blocks until shutdown is requested (SIGINT).
    pub async fn run(self) -> DaemonResult<()> {
        info!(
            version = env!("CARGO_PKG_VERSION"),
            environment = %self.config.environment,
            "Starting Usher daemon"
        );

        // 1. Report catalog state
        self.report_catalog().await?;

        // 2. Start API server
        let api_addr = self.start_api_server().await?;
        info!(%api_addr, "API server started");

        // 3. Spawn the expiration reaper
        let shutdown = CancellationToken::new();
        let reaper_handle = self.spawn_reaper(shutdown.clone());

        // 4. Wait for shutdown signal
        info!("Entering main loop; waiting for shutdown signal");
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received shutdown signal"),
            Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
        }

        // 5. Graceful shutdown
        self.shutdown(shutdown, reaper_handle).await
    }

    /// Log how many events the store currently holds.
    async fn report_catalog(&self) -> DaemonResult<()> {
        let events = self.store.events().list().await?;

        if events.is_empty() {
            info!("No events in store");
        } else {
            info!(count = events.len(), "Events in store");
        }

        Ok(())
    }

    /// Start the API server.
    pub async fn start_api_server(&self) -> DaemonResult<SocketAddr> {
        let state = Arc::new(ApiState {
            engine: self.engine.clone(),
            webhook_secret: self.config.gateway.webhook_secret.clone(),
            client_url: self.config.engine.client_url.clone(),
        });

        let router = create_router(state);
        let addr = format!("{}:{}", self.config.api.host, self.config.api.port);

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| DaemonError::Config(format!("Failed to bind to {}: {}", addr, e)))?;

        let local_addr = listener
            .local_addr()
            .map_err(|e| DaemonError::Config(format!("Failed to get local address: {}", e)))?;

        // Spawn the server task
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                error!(error = %e, "API server error");
            }
        });

        Ok(local_addr)
    }

    /// Spawn the expiration reaper on its own task.
    fn spawn_reaper(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let reaper = ExpirationReaper::new(
            self.gateway.clone(),
            self.cache.clone(),
            self.config.reaper_interval,
        );

        tokio::spawn(async move {
            if let Err(e) = reaper.run(shutdown).await {
                error!(error = %e, "Expiration reaper error");
            }
        })
    }

    /// Graceful shutdown: stop the reaper and wait for it to drain.
    async fn shutdown(
        &self,
        shutdown: CancellationToken,
        reaper_handle: JoinHandle<()>,
    ) -> DaemonResult<()> {
        info!("Initiating graceful shutdown");

        shutdown.cancel();
        if let Err(e) = reaper_handle.await {
            error!(error = %e, "Reaper task failed to join");
        }

        info!("Shutdown complete");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
