//! Configuration file watcher for hot reload.
//!
//! # Design Decisions
//! - File events only signal "something changed"; a reload task coalesces
//!   them and reads the file once the burst has gone quiet
//! - Empty content is treated as a write in progress and never parsed, since
//!   an empty document would otherwise validate as the all-defaults config
//! - Content identical to the last accepted load is not forwarded again
//! - Invalid content is logged and the current configuration is kept

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::parse_config;
use crate::config::schema::GuardConfig;

/// Quiet period after the last file event before the file is read.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);

/// Watches a configuration file and forwards validated updates.
pub struct ConfigWatcher {
    path: PathBuf,
    debounce: Duration,
    update_tx: mpsc::UnboundedSender<GuardConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and a receiver for validated configuration updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<GuardConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                debounce: DEFAULT_DEBOUNCE,
                update_tx,
            },
            update_rx,
        )
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Start watching the file.
    ///
    /// Must be called from within a Tokio runtime. Dropping the returned
    /// handle stops the watcher and ends the reload task.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        // The content the process is running with counts as already applied.
        let baseline = std::fs::read_to_string(&self.path).ok();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    let _ = event_tx.send(());
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tokio::spawn(reload_loop(
            self.path.clone(),
            self.debounce,
            baseline,
            event_rx,
            self.update_tx,
        ));

        tracing::info!(
            path = ?self.path,
            debounce_ms = self.debounce.as_millis() as u64,
            "Config watcher started"
        );
        Ok(watcher)
    }
}

async fn reload_loop(
    path: PathBuf,
    debounce: Duration,
    mut last_applied: Option<String>,
    mut events: mpsc::UnboundedReceiver<()>,
    updates: mpsc::UnboundedSender<GuardConfig>,
) {
    while events.recv().await.is_some() {
        // Wait until no event has arrived for a whole debounce window.
        loop {
            match tokio::time::timeout(debounce, events.recv()).await {
                Ok(Some(())) => continue,
                Ok(None) => return,
                Err(_) => break,
            }
        }

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) => {
                tracing::error!(path = ?path, error = %e, "Failed to read config file");
                continue;
            }
        };

        if content.trim().is_empty() {
            tracing::debug!(path = ?path, "Config file empty, waiting for the write to finish");
            continue;
        }
        if last_applied.as_deref() == Some(content.as_str()) {
            tracing::debug!(path = ?path, "Config file unchanged, skipping reload");
            continue;
        }

        match parse_config(&content) {
            Ok(config) => {
                tracing::info!(path = ?path, "Config file changed, forwarding new configuration");
                last_applied = Some(content);
                if updates.send(config).is_err() {
                    return;
                }
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    "Failed to reload config, keeping current configuration"
                );
            }
        }
    }
}
