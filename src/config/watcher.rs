//! Config file watcher for hot reload

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::AppConfig;

/// Delay before re-reading, so editors can finish writing
const RELOAD_DEBOUNCE: Duration = Duration::from_millis(100);

/// Re-parses the config file on every modification and hands valid results over a channel
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<AppConfig>,
}

impl ConfigWatcher {
    /// Load `config_path` and start watching it
    pub async fn new(config_path: String) -> Result<(Self, AppConfig)> {
        let (tx, rx) = mpsc::channel(10);

        let initial_config = AppConfig::load(&config_path)
            .await
            .context("Failed to load initial config")?;

        // notify callbacks run on their own OS thread
        let runtime_handle = tokio::runtime::Handle::current();
        let watched_path = config_path.clone();

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| match res {
            Ok(event) if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) => {
                debug!("Config file changed: {:?}", event.paths);
                let path = watched_path.clone();
                let tx = tx.clone();

                runtime_handle.spawn(async move {
                    tokio::time::sleep(RELOAD_DEBOUNCE).await;

                    match AppConfig::load(&path).await {
                        Ok(config) => {
                            info!("🔄 Configuration reloaded");
                            if let Err(e) = tx.send(config).await {
                                error!("Failed to send config update: {}", e);
                            }
                        }
                        Err(e) => warn!("Failed to reload config (keeping old config): {:#}", e),
                    }
                });
            }
            Ok(_) => {}
            Err(e) => error!("Watch error: {}", e),
        })?;

        watcher
            .watch(Path::new(&config_path), RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch config file: {}", config_path))?;

        info!("👀 Watching {}", config_path);

        Ok((Self { _watcher: watcher, rx }, initial_config))
    }

    /// Wait for the next valid config; `None` once the watcher is gone
    pub async fn next_config(&mut self) -> Option<AppConfig> {
        self.rx.recv().await
    }
}
