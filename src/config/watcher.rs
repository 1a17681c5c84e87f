//! Configuration file watcher for hot reload.
//!
//! The parent directory is watched rather than the file itself, so saves that
//! replace the file (write to temp, rename over) are still seen. Editors emit
//! several events per save and an in-place save truncates first, so the file
//! is only read once events have been quiet for [`SETTLE`]. Empty documents
//! and a document identical to the last one forwarded are dropped.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time;

use crate::config::loader::parse_config;
use crate::config::schema::ProxyConfig;

/// Quiet period after the last file event before the file is read.
pub const SETTLE: Duration = Duration::from_millis(200);

/// Forwards every valid revision of one config file.
///
/// Only documents that parse and validate are forwarded; a broken edit
/// leaves the running configuration in place.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<ProxyConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and a receiver for configuration updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<ProxyConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let watcher = Self {
            path: path.to_path_buf(),
            update_tx,
        };
        (watcher, update_rx)
    }

    /// Start watching. Must run inside a Tokio runtime; the returned handle
    /// must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if touches(&event, &file_name) => {
                    let _ = event_tx.send(());
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        let revisions = Revisions {
            path: self.path.clone(),
            last_seen: fs::read_to_string(&self.path).ok(),
        };
        tokio::spawn(revisions.run(event_rx, self.update_tx));

        tracing::info!(path = %self.path.display(), "Config watcher started");
        Ok(watcher)
    }
}

/// Turns settled file events into validated configs.
struct Revisions {
    path: PathBuf,
    last_seen: Option<String>,
}

impl Revisions {
    /// Ends when the notify handle is dropped or nobody receives updates.
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<()>, updates: mpsc::UnboundedSender<ProxyConfig>) {
        while events.recv().await.is_some() {
            loop {
                match time::timeout(SETTLE, events.recv()).await {
                    Ok(Some(())) => continue,
                    Ok(None) => return,
                    Err(_) => break,
                }
            }

            let content = match tokio::fs::read_to_string(&self.path).await {
                Ok(content) => content,
                Err(e) => {
                    tracing::debug!(path = %self.path.display(), error = %e, "Config file not readable");
                    continue;
                }
            };
            if let Some(config) = self.accept(content) {
                if updates.send(config).is_err() {
                    return;
                }
            }
        }
    }

    /// The config to forward for `content`, if any.
    fn accept(&mut self, content: String) -> Option<ProxyConfig> {
        if content.trim().is_empty() {
            tracing::warn!(path = %self.path.display(), "Config file is empty, keeping current configuration");
            return None;
        }
        if self.last_seen.as_deref() == Some(content.as_str()) {
            return None;
        }

        match parse_config(&content) {
            Ok(config) => {
                tracing::info!(path = %self.path.display(), "Config file changed, reloading");
                self.last_seen = Some(content);
                Some(config)
            }
            Err(e) => {
                tracing::error!(path = %self.path.display(), error = %e, "Ignoring invalid config revision");
                None
            }
        }
    }
}

/// Whether `event` may have changed the file called `file_name`.
fn touches(event: &Event, file_name: &OsString) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(file_name.as_os_str()))
}
