//! Keeps the registry in sync with the functions directory.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use notify::RecommendedWatcher;
use tokio::sync::broadcast;

use crate::config::watcher::FileWatcher;
use crate::functions::registry::FunctionRegistry;

/// Events arriving within this window are folded into one rescan.
const DEBOUNCE: Duration = Duration::from_millis(200);

/// Scan `dir` once and rescan whenever something below it changes.
///
/// The returned watcher must be kept alive for as long as reloads are wanted.
pub fn watch_functions(
    registry: Arc<FunctionRegistry>,
    dir: PathBuf,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<RecommendedWatcher, notify::Error> {
    let summary = registry.scan(&dir);
    tracing::info!(dir = ?dir, functions = summary.added.len(), "Functions directory scanned");

    let (watcher, mut changes) = FileWatcher::directory(&dir);
    let handle = watcher.run()?;

    tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = changes.recv() => {
                    if changed.is_none() {
                        break;
                    }
                    tokio::time::sleep(DEBOUNCE).await;
                    while changes.try_recv().is_ok() {}

                    let summary = registry.scan(&dir);
                    if !(summary.added.is_empty() && summary.removed.is_empty() && summary.rebuilt.is_empty()) {
                        tracing::info!(
                            added = ?summary.added,
                            removed = ?summary.removed,
                            rebuilt = ?summary.rebuilt,
                            "Functions reloaded"
                        );
                    }
                }
                _ = shutdown.recv() => break,
            }
        }
    });

    Ok(handle)
}
