//! Owner of all process-wide guard state.
//!
//! # Data Flow
//! ```text
//! Init:
//!     Registry::builder(config)
//!         → validate_config          (all violations → InitError::Config)
//!         → SecurityMiddleware::new  (patterns, first key)
//!         → spawn MaintenanceTask    (unless disabled)
//!         → Registry
//!
//! Hot reload:
//!     ConfigWatcher → mpsc → Registry::apply → SecurityMiddleware::reload
//!
//! Teardown:
//!     Registry::teardown → Shutdown::trigger → await every background task
//! ```
//!
//! # Design Decisions
//! - Nothing is global: two registries in one process are fully independent
//! - Dropping a registry without `teardown` still signals its tasks to stop,
//!   it just does not wait for them

use std::path::Path;
use std::sync::Arc;

use arc_swap::ArcSwap;
use notify::RecommendedWatcher;
use tokio::task::JoinHandle;

use super::maintenance::MaintenanceTask;
use super::shutdown::Shutdown;
use crate::clock::{Clock, SystemClock};
use crate::config::watcher::ConfigWatcher;
use crate::config::{validate_config, GuardConfig};
use crate::crypto::{KeyCustodian, LocalCustodian};
use crate::error::InitError;
use crate::middleware::SecurityMiddleware;
use crate::observability::{EventSink, TracingEventSink};

/// Collects the injectable parts of a [`Registry`] before start.
pub struct RegistryBuilder {
    config: GuardConfig,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
    custodian: Arc<dyn KeyCustodian>,
    maintenance: bool,
}

impl RegistryBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn custodian(mut self, custodian: Arc<dyn KeyCustodian>) -> Self {
        self.custodian = custodian;
        self
    }

    /// Do not spawn the background maintenance task. Key rotation and idle
    /// eviction then only happen when driven by the caller.
    pub fn without_maintenance(mut self) -> Self {
        self.maintenance = false;
        self
    }

    /// Validate the configuration, build every component and start
    /// background tasks. Must be called inside a Tokio runtime when
    /// maintenance is enabled.
    pub fn start(self) -> Result<Registry, InitError> {
        validate_config(&self.config).map_err(InitError::Config)?;

        let middleware = Arc::new(SecurityMiddleware::new(
            &self.config,
            self.clock,
            self.events,
            self.custodian.clone(),
        )?);
        let shutdown = Shutdown::new();

        let mut tasks = Vec::new();
        if self.maintenance {
            let task = MaintenanceTask::new(middleware.clone(), &self.config);
            tasks.push(tokio::spawn(task.run(shutdown.subscribe())));
        }

        tracing::info!(
            custodian = self.custodian.name(),
            maintenance = self.maintenance,
            max_concurrent = self.config.concurrency.max_concurrent,
            "Guard registry started"
        );

        Ok(Registry {
            middleware,
            shutdown,
            tasks,
            config: Arc::new(ArcSwap::from_pointee(self.config)),
        })
    }
}

/// Running guard: the middleware plus its background tasks.
pub struct Registry {
    middleware: Arc<SecurityMiddleware>,
    shutdown: Shutdown,
    tasks: Vec<JoinHandle<()>>,
    config: Arc<ArcSwap<GuardConfig>>,
}

impl Registry {
    pub fn builder(config: GuardConfig) -> RegistryBuilder {
        RegistryBuilder {
            config,
            clock: Arc::new(SystemClock),
            events: Arc::new(TracingEventSink),
            custodian: Arc::new(LocalCustodian::new()),
            maintenance: true,
        }
    }

    pub fn middleware(&self) -> &Arc<SecurityMiddleware> {
        &self.middleware
    }

    /// The most recently applied configuration.
    pub fn config(&self) -> Arc<GuardConfig> {
        self.config.load_full()
    }

    /// Apply a new configuration to the running guard.
    ///
    /// Validation settings and threat policy are swapped in. Changes to any
    /// other section are recorded but only take effect on restart.
    pub fn apply(&self, config: GuardConfig) -> Result<(), InitError> {
        apply_config(&self.middleware, &self.config, config)
    }

    /// Watch `path` and apply every valid revision until shutdown.
    ///
    /// The returned watcher must be kept alive for updates to keep flowing.
    pub fn watch(&mut self, path: &Path) -> Result<RecommendedWatcher, notify::Error> {
        let (watcher, mut updates) = ConfigWatcher::new(path);
        let watcher = watcher.run()?;

        let middleware = self.middleware.clone();
        let config = self.config.clone();
        let mut shutdown = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    update = updates.recv() => match update {
                        Some(next) => {
                            if let Err(e) = apply_config(&middleware, &config, next) {
                                tracing::error!(error = %e, "Rejected configuration update; keeping current configuration");
                            }
                        }
                        None => break,
                    },
                    _ = shutdown.recv() => break,
                }
            }
            tracing::debug!("Config reload task stopped");
        });
        self.tasks.push(handle);
        Ok(watcher)
    }

    /// Handle for triggering shutdown from elsewhere, such as a signal task.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Stop every background task and wait for them to finish.
    pub async fn teardown(mut self) {
        self.shutdown.trigger();
        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Background task failed during teardown");
            }
        }
        tracing::info!("Guard registry stopped");
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("middleware", &self.middleware)
            .field("tasks", &self.tasks.len())
            .finish()
    }
}

fn apply_config(
    middleware: &SecurityMiddleware,
    store: &ArcSwap<GuardConfig>,
    next: GuardConfig,
) -> Result<(), InitError> {
    validate_config(&next).map_err(InitError::Config)?;
    middleware.reload(&next)?;

    for section in restart_required(&store.load(), &next) {
        tracing::warn!(section = section, "Configuration section changed; restart required to apply");
    }
    store.store(Arc::new(next));
    Ok(())
}

/// Sections that differ between `current` and `next` and cannot be applied
/// to a running guard.
fn restart_required(current: &GuardConfig, next: &GuardConfig) -> Vec<&'static str> {
    let mut changed = Vec::new();
    if current.rate_limit != next.rate_limit {
        changed.push("rate_limit");
    }
    if current.concurrency != next.concurrency {
        changed.push("concurrency");
    }
    if current.circuit_breaker != next.circuit_breaker {
        changed.push("circuit_breaker");
    }
    if current.encryption != next.encryption {
        changed.push("encryption");
    }
    if current.observability != next.observability {
        changed.push("observability");
    }
    if current.maintenance != next.maintenance {
        changed.push("maintenance");
    }
    changed
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::threat::ThreatLevel;

    #[tokio::test]
    async fn test_start_and_teardown() {
        let registry = Registry::builder(GuardConfig::default()).start().unwrap();
        let shutdown = registry.shutdown_handle();
        assert_eq!(shutdown.receiver_count(), 1);
        assert!(registry.middleware().encryption().active_key().is_some());

        tokio::time::timeout(Duration::from_secs(5), registry.teardown())
            .await
            .unwrap();
        assert_eq!(shutdown.receiver_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_config_reports_every_violation() {
        let mut config = GuardConfig::default();
        config.concurrency.max_concurrent = 0;
        config.rate_limit.capacity = 0;

        match Registry::builder(config).start() {
            Err(InitError::Config(violations)) => assert!(violations.len() >= 2),
            other => panic!("expected config error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_registries_are_independent() {
        let a = Registry::builder(GuardConfig::default()).without_maintenance().start().unwrap();
        let b = Registry::builder(GuardConfig::default()).without_maintenance().start().unwrap();

        let key_a = a.middleware().encryption().active_key().unwrap().key_id;
        let key_b = b.middleware().encryption().active_key().unwrap().key_id;
        assert_ne!(key_a, key_b);

        a.teardown().await;
        assert!(b.middleware().encryption().active_key().is_some());
        b.teardown().await;
    }

    #[tokio::test]
    async fn test_apply_swaps_threat_policy() {
        let registry = Registry::builder(GuardConfig::default()).without_maintenance().start().unwrap();
        assert!(registry.middleware().threat_policy().fail_open_on.contains(&ThreatLevel::Low));

        let mut strict = GuardConfig::default();
        strict.threat_policy.fail_open_on.clear();
        strict.rate_limit.capacity = 5;
        registry.apply(strict).unwrap();

        assert!(registry.middleware().threat_policy().fail_open_on.is_empty());
        assert_eq!(registry.config().rate_limit.capacity, 5);
        // Limiter settings are restart-only.
        assert_ne!(registry.middleware().rate_limiter().config().capacity, 5);
        registry.teardown().await;
    }

    #[tokio::test]
    async fn test_apply_rejects_invalid_config() {
        let registry = Registry::builder(GuardConfig::default()).without_maintenance().start().unwrap();
        let mut bad = GuardConfig::default();
        bad.threat_policy.fail_open_on.clear();
        bad.validation.max_depth = 0;

        assert!(registry.apply(bad).is_err());
        assert!(!registry.middleware().threat_policy().fail_open_on.is_empty());
        registry.teardown().await;
    }

    #[test]
    fn test_restart_required_sections() {
        let current = GuardConfig::default();
        let mut next = current.clone();
        next.validation.max_depth = 3;
        assert!(restart_required(&current, &next).is_empty());

        next.encryption.key_rotation_days = 7;
        next.concurrency.max_queue = 1;
        assert_eq!(restart_required(&current, &next), vec!["concurrency", "encryption"]);
    }
}
