//! Configuration file watcher for hot reload.
//!
//! Each change to the file is reloaded and validated here; only configs
//! that pass reach the receiver. A broken edit is logged and skipped, so
//! the running pools stay as they are.

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::BalancerConfig;
use crate::load_balancer::ActionRegistry;

/// Watches one configuration file.
pub struct ConfigWatcher {
    path: PathBuf,
    registry: ActionRegistry,
    updates: mpsc::UnboundedSender<BalancerConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and the receiver of validated configs.
    pub fn new(
        path: &Path,
        registry: ActionRegistry,
    ) -> (Self, mpsc::UnboundedReceiver<BalancerConfig>) {
        let (updates, rx) = mpsc::unbounded_channel();
        let watcher = Self {
            path: path.to_path_buf(),
            registry,
            updates,
        };
        (watcher, rx)
    }

    fn reload(&self) {
        match load_config(&self.path, &self.registry) {
            Ok(config) => {
                tracing::info!(path = ?self.path, pools = config.pools.len(), "Config reloaded");
                let _ = self.updates.send(config);
            }
            Err(e) => {
                tracing::error!(
                    path = ?self.path,
                    error = %e,
                    "Config reload rejected, keeping current configuration"
                );
            }
        }
    }

    /// Start watching. Dropping the returned handle stops the watch.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let path = self.path.clone();
        let config = Config::default().with_poll_interval(Duration::from_secs(2));

        let mut handle = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => self.reload(),
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            config,
        )?;
        handle.watch(&path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?path, "Config watcher started");
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_reload_forwards_valid_config_only() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let (watcher, mut rx) = ConfigWatcher::new(file.path(), ActionRegistry::with_defaults());

        let bad = "[[pools]]\nname = \"web\"\naction = \"balancer.nope\"\ntargets = \"x\"";
        writeln!(file, "{}", bad).unwrap();
        watcher.reload();
        assert!(rx.try_recv().is_err());

        file.as_file().set_len(0).unwrap();
        let mut out = file.reopen().unwrap();
        let good = "[[pools]]\nname = \"web\"\ntargets = { address = \"http://127.0.0.1:80\" }";
        writeln!(out, "{}", good).unwrap();
        watcher.reload();
        assert_eq!(rx.try_recv().unwrap().pools[0].name, "web");
    }
}
