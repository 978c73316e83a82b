//! File watchers driving hot reload.
//!
//! Rule files may not exist yet when the proxy starts, so the watcher observes
//! their parent directories and filters events down to the tracked paths.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

/// A watcher that reports changes to a fixed set of paths.
pub struct FileWatcher {
    targets: Vec<PathBuf>,
    recursive: bool,
    update_tx: mpsc::UnboundedSender<PathBuf>,
}

impl FileWatcher {
    /// Create a watcher for individual files.
    ///
    /// Returns the watcher and a receiver yielding every changed path.
    pub fn files(paths: Vec<PathBuf>) -> (Self, mpsc::UnboundedReceiver<PathBuf>) {
        Self::build(paths, false)
    }

    /// Create a watcher for everything below a directory.
    pub fn directory(dir: &Path) -> (Self, mpsc::UnboundedReceiver<PathBuf>) {
        Self::build(vec![dir.to_path_buf()], true)
    }

    fn build(targets: Vec<PathBuf>, recursive: bool) -> (Self, mpsc::UnboundedReceiver<PathBuf>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        (
            Self {
                targets,
                recursive,
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching on notify's background thread.
    ///
    /// The returned handle must be kept alive for events to keep flowing.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx.clone();
        let recursive = self.recursive;
        let targets: HashSet<PathBuf> = self.targets.iter().cloned().collect();
        let roots = self.targets.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if !(event.kind.is_modify() || event.kind.is_create() || event.kind.is_remove()) {
                        return;
                    }
                    for path in event.paths {
                        let tracked = if recursive {
                            roots.iter().any(|root| path.starts_with(root))
                        } else {
                            targets.contains(&path)
                        };
                        if tracked {
                            tracing::debug!(path = ?path, "Watched file changed");
                            let _ = tx.send(path);
                        }
                    }
                }
                Err(e) => tracing::error!("Watch error: {:?}", e),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        let mut watched = HashSet::new();
        for target in &self.targets {
            let (dir, mode) = if self.recursive {
                (target.clone(), RecursiveMode::Recursive)
            } else {
                match target.parent() {
                    Some(parent) => (parent.to_path_buf(), RecursiveMode::NonRecursive),
                    None => continue,
                }
            };
            if !dir.exists() || !watched.insert(dir.clone()) {
                continue;
            }
            watcher.watch(&dir, mode)?;
        }

        tracing::info!(paths = ?self.targets, "File watcher started");
        Ok(watcher)
    }
}
