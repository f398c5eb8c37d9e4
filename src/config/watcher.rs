//! Hot reload of the configuration file.
//!
//! The parent directory is watched rather than the file itself: editors that
//! save by writing a temporary file and renaming it over the original would
//! otherwise leave the watch attached to a deleted inode.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::ProxyConfig;

type Overrides = Box<dyn Fn(&mut ProxyConfig) + Send + Sync + 'static>;

/// Reloads the proxy configuration whenever its file changes.
pub struct ConfigWatcher {
    path: PathBuf,
    overrides: Overrides,
    update_tx: mpsc::UnboundedSender<ProxyConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and the receiver for validated reloads.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<ProxyConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                overrides: Box::new(|_| {}),
                update_tx,
            },
            update_rx,
        )
    }

    /// Apply `overrides` to every reloaded config before it is sent, so
    /// command-line flags survive a reload.
    pub fn with_overrides<F>(mut self, overrides: F) -> Self
    where
        F: Fn(&mut ProxyConfig) + Send + Sync + 'static,
    {
        self.overrides = Box::new(overrides);
        self
    }

    /// Start watching. Reloads stop when the returned handle is dropped.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let ConfigWatcher {
            path,
            overrides,
            update_tx,
        } = self;

        let file_name = path.file_name().map(OsString::from).ok_or_else(|| {
            notify::Error::generic(&format!("not a file path: {}", path.display()))
        })?;
        let directory = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let config_path = path.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if touches(&event, &file_name) => {
                    if let Some(config) = reload(&config_path, &overrides) {
                        let _ = update_tx.send(config);
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;
        watcher.watch(&directory, RecursiveMode::NonRecursive)?;

        tracing::info!(path = %path.display(), "Watching config file");
        Ok(watcher)
    }
}

/// Whether `event` creates or modifies a file called `file_name`.
fn touches(event: &Event, file_name: &OsString) -> bool {
    (event.kind.is_modify() || event.kind.is_create())
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(file_name.as_os_str()))
}

fn reload(path: &Path, overrides: &Overrides) -> Option<ProxyConfig> {
    match load_config(path) {
        Ok(mut config) => {
            overrides(&mut config);
            tracing::info!(path = %path.display(), "Config file changed, reloaded");
            Some(config)
        }
        Err(e) => {
            tracing::error!(
                path = %path.display(),
                error = %e,
                "Reloaded config rejected, keeping current configuration"
            );
            None
        }
    }
}
