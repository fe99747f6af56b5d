//! Configuration file watcher for hot reload.
//!
//! Only the admission section is live-reloadable, so a reload is forwarded
//! to the server only when that section differs from the last one sent.
//! Editors tend to save in several writes; events are coalesced over
//! [`RELOAD_DEBOUNCE`] before the file is read.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::{AdmissionConfig, SidecarConfig};

/// Quiet period after a file event before the file is re-read.
pub const RELOAD_DEBOUNCE: Duration = Duration::from_millis(250);

/// Watches the configuration file and forwards admission changes.
pub struct ConfigWatcher {
    path: PathBuf,
    current: AdmissionConfig,
    update_tx: mpsc::UnboundedSender<SidecarConfig>,
}

impl ConfigWatcher {
    /// Create a watcher for `path`, where `current` is the admission section
    /// the server is running with.
    ///
    /// Returns the watcher and a receiver for reloaded configurations.
    pub fn new(
        path: &Path,
        current: AdmissionConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SidecarConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                current,
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching. Must be called from within a tokio runtime.
    ///
    /// The returned watcher must be kept alive for as long as updates are wanted.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    let _ = event_tx.send(());
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;
        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Config watcher started");
        tokio::spawn(self.forward_reloads(event_rx));
        Ok(watcher)
    }

    async fn forward_reloads(mut self, mut events: mpsc::UnboundedReceiver<()>) {
        while events.recv().await.is_some() {
            tokio::time::sleep(RELOAD_DEBOUNCE).await;
            while events.try_recv().is_ok() {}

            tracing::info!(path = ?self.path, "Config file change detected, reloading");
            self.reload();
        }
    }

    /// Re-read the file. Returns true when a new config was forwarded.
    fn reload(&mut self) -> bool {
        let config = match load_config(&self.path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(error = %e, "Failed to reload config, keeping current configuration");
                return false;
            }
        };

        if config.admission == self.current {
            tracing::debug!("Admission settings unchanged, nothing to apply");
            return false;
        }

        self.current = config.admission.clone();
        self.update_tx.send(config).is_ok()
    }
}
