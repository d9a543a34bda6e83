//! Config hot-reload: watch the config file and atomically swap the live
//! handle on every write, the way the original watches with `fsnotify` and
//! swaps a `viper`-backed struct. A failed reload is logged and the previous
//! configuration stays in force — a bad edit never tears down the process.
use crate::config::Config;
use arc_swap::ArcSwap;
use notify::{RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Live, swappable configuration handle shared across the process.
pub struct ConfigHandle {
    inner: ArcSwap<Config>,
    path: PathBuf,
}

impl ConfigHandle {
    pub fn load(path: impl Into<PathBuf>) -> Result<Arc<Self>, crate::config::ConfigError> {
        let path = path.into();
        let config = Config::load(&path)?;
        Ok(Arc::new(Self {
            inner: ArcSwap::from_pointee(config),
            path,
        }))
    }

    pub fn current(&self) -> Arc<Config> {
        self.inner.load_full()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn reload(&self) {
        match Config::load(&self.path) {
            Ok(new) => {
                tracing::info!(path = %self.path.display(), "config reloaded");
                self.inner.store(Arc::new(new));
            }
            Err(err) => {
                tracing::warn!(path = %self.path.display(), %err, "config reload failed, keeping previous config");
            }
        }
    }

    /// Spawns a background watcher that reloads on every write to the config
    /// file. Returns the `notify::Watcher` — drop it to stop watching.
    pub fn watch(self: &Arc<Self>) -> notify::Result<notify::RecommendedWatcher> {
        let handle = Arc::clone(self);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) if event.kind.is_modify() => handle.reload(),
                Ok(_) => {}
                Err(err) => tracing::warn!(%err, "config watcher error"),
            }
        })?;
        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;
        Ok(watcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("relayd.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn load_then_reload_swaps_on_valid_edit() {
        let dir = tempdir();
        let path = write_config(
            &dir,
            "run_mode = \"direct\"\n[inbound]\nport = 1080\n",
        );
        let handle = ConfigHandle::load(&path).unwrap();
        assert_eq!(handle.current().inbound.port, 1080);

        write_config(&dir, "run_mode = \"direct\"\n[inbound]\nport = 1081\n");
        handle.reload();
        assert_eq!(handle.current().inbound.port, 1081);
    }

    #[test]
    fn invalid_reload_keeps_previous_config() {
        let dir = tempdir();
        let path = write_config(
            &dir,
            "run_mode = \"direct\"\n[inbound]\nport = 1080\n",
        );
        let handle = ConfigHandle::load(&path).unwrap();

        write_config(&dir, "not valid toml {{{");
        handle.reload();
        assert_eq!(handle.current().inbound.port, 1080);
    }

    fn tempdir() -> PathBuf {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!("relayd-test-{}-{}", std::process::id(), n));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
