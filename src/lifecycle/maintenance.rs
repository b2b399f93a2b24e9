//! Periodic background maintenance.
//!
//! # Responsibilities
//! - Advance the key lifecycle (rotate, retire, purge) on every tick
//! - Evict rate-limit state for principals that have gone idle
//!
//! # Design Decisions
//! - One interval loop for both jobs; neither is latency sensitive
//! - A failed rotation is logged and retried on the next tick; the current
//!   active key keeps serving

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time;

use crate::config::GuardConfig;
use crate::crypto::RotationReport;
use crate::middleware::SecurityMiddleware;

pub struct MaintenanceTask {
    middleware: Arc<SecurityMiddleware>,
    interval: Duration,
    idle_ttl: Duration,
}

impl MaintenanceTask {
    pub fn new(middleware: Arc<SecurityMiddleware>, config: &GuardConfig) -> Self {
        Self {
            middleware,
            interval: Duration::from_secs(config.maintenance.interval_secs.max(1)),
            idle_ttl: config.rate_limit.idle_ttl(),
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            idle_ttl_secs = self.idle_ttl.as_secs(),
            "Maintenance task starting"
        );

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_once();
                }
                _ = shutdown.recv() => {
                    tracing::info!("Maintenance task received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// One maintenance pass. Returns the key rotation report, if the tick
    /// succeeded.
    pub fn run_once(&self) -> Option<RotationReport> {
        let report = match self.middleware.encryption().tick() {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::error!(error = %e, "Key rotation tick failed");
                None
            }
        };

        self.middleware.rate_limiter().evict_idle(self.idle_ttl);
        report
    }
}
