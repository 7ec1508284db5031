//! Background worker that force-expires checkout sessions whose hold
//! window has lapsed without payment.
//!
//! The reaper never touches seat counts itself. It expires the session at
//! the gateway and lets the resulting expiry notification drive the seat
//! release through the same ledger-guarded path as every other delivery.
//! A job leaves the queue only after the gateway call settles, so a
//! transient gateway failure means the job is retried on the next sweep.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use usher_cache::ExpirationQueue;
use usher_gateway::PaymentGateway;

use crate::error::EngineResult;

/// Default seconds between sweeps.
pub const DEFAULT_REAPER_INTERVAL_SECS: u64 = 10;

/// Periodically expires checkout sessions for abandoned holds.
pub struct ExpirationReaper<G: PaymentGateway, Q: ExpirationQueue> {
    /// Payment gateway port
    gateway: Arc<G>,
    /// Scheduled expiration jobs
    queue: Arc<Q>,
    /// Time between sweeps
    sweep_interval: Duration,
}

impl<G: PaymentGateway, Q: ExpirationQueue> ExpirationReaper<G, Q> {
    /// Create a reaper sweeping at the given interval.
    pub fn new(gateway: Arc<G>, queue: Arc<Q>, sweep_interval: Duration) -> Self {
        Self {
            gateway,
            queue,
            sweep_interval,
        }
    }

    /// Run the sweep loop until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> EngineResult<()> {
        info!(
            interval_secs = self.sweep_interval.as_secs(),
            "Expiration reaper started"
        );

        let mut ticker = interval(self.sweep_interval);
        ticker.tick().await; // First tick is immediate

        // Sweep once at startup to catch jobs that came due while the
        // process was down.
        self.sweep_and_log().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Expiration reaper shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    self.sweep_and_log().await;
                }
            }
        }

        info!("Expiration reaper stopped");
        Ok(())
    }

    async fn sweep_and_log(&self) {
        match self.sweep(Utc::now()).await {
            Ok(count) if count > 0 => {
                info!(count, "Expired abandoned checkout sessions");
            }
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "Expiration sweep failed (will retry)");
            }
        }
    }

    /// Process every job due at `now`. Returns how many jobs completed.
    ///
    /// A job completes when the gateway call settles, including the
    /// "session already terminal" answer that means a payment or an
    /// earlier expiry got there first. Transient gateway failures leave
    /// the job queued.
    pub async fn sweep(&self, now: DateTime<Utc>) -> EngineResult<usize> {
        let due = self.queue.due(now).await?;
        let mut processed = 0;

        for job in due {
            match self.gateway.expire_session(&job.session_id).await {
                Ok(()) => {
                    debug!(session_id = %job.session_id, "Expired abandoned session");
                }
                Err(e) if e.is_terminal_state() => {
                    debug!(session_id = %job.session_id, "Session already terminal");
                }
                Err(e) => {
                    warn!(
                        session_id = %job.session_id,
                        error = %e,
                        "Failed to expire session (will retry)"
                    );
                    continue;
                }
            }

            // Dequeue failures leave the job for the next sweep; the
            // repeat expire call lands on the terminal-state branch.
            if let Err(e) = self.queue.remove(&job.session_id).await {
                warn!(
                    session_id = %job.session_id,
                    error = %e,
                    "Failed to dequeue completed expiration job"
                );
                continue;
            }

            processed += 1;
        }

        Ok(processed)
    }
}

// =============================================================================
// Tests
// =============================================================================
