//! Configuration file watcher for hot reload.
//!
//! Editors often produce several events for one save (truncate, write,
//! rename). Only revisions that parse, validate and differ from the last one
//! published are sent on.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::GuardConfig;

/// Publishes validated revisions of one configuration file.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<GuardConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and a receiver for validated configuration updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<GuardConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching. The returned watcher must be kept alive for events to
    /// keep flowing.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let Self { path, update_tx } = self;
        let watched = path.clone();
        let mut last: Option<GuardConfig> = load_config(&path).ok();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => match load_config(&path) {
                    Ok(next) if last.as_ref() == Some(&next) => {
                        tracing::debug!(path = ?path, "Config file touched without changes");
                    }
                    Ok(next) => {
                        tracing::info!(path = ?path, "Config file changed, publishing new revision");
                        last = Some(next.clone());
                        let _ = update_tx.send(next);
                    }
                    Err(e) => {
                        tracing::error!(path = ?path, error = %e, "Failed to reload config; keeping current configuration");
                    }
                },
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&watched, RecursiveMode::NonRecursive)?;
        tracing::info!(path = ?watched, "Config watcher started");
        Ok(watcher)
    }
}
