//! Hot-swappable compiled rule state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use notify::RecommendedWatcher;
use tokio::sync::broadcast;

use crate::config::watcher::FileWatcher;
use crate::observability::metrics;
use crate::rules::{HeaderRules, RuleMatcher, RuleSources};

/// One consistent generation of rules and header rules.
#[derive(Debug, Default)]
pub struct CompiledRules {
    pub matcher: RuleMatcher,
    pub headers: HeaderRules,
}

/// Rule state shared by every request. Reloads replace it whole.
pub struct RoutingState {
    current: ArcSwap<CompiledRules>,
    sources: RuleSources,
    env: HashMap<String, String>,
}

impl RoutingState {
    /// Load rules from `sources` and compile the first generation.
    pub fn load(sources: RuleSources, env: HashMap<String, String>) -> Self {
        let state = Self {
            current: ArcSwap::from_pointee(CompiledRules::default()),
            sources,
            env,
        };
        state.reload();
        state
    }

    /// Snapshot for the duration of one request.
    pub fn snapshot(&self) -> Arc<CompiledRules> {
        self.current.load_full()
    }

    /// Re-read every source and swap the result in atomically.
    pub fn reload(&self) {
        let rules = self.sources.load_rules();
        let headers = self.sources.load_headers();
        tracing::info!(rules = rules.len(), header_rules = headers.len(), "Rules loaded");
        metrics::record_rule_reload();
        self.current.store(Arc::new(CompiledRules {
            matcher: RuleMatcher::new(rules, self.env.clone()),
            headers,
        }));
    }

    /// Reload whenever a rule file changes.
    ///
    /// The returned watcher must be kept alive.
    pub fn watch(
        self: &Arc<Self>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<RecommendedWatcher, notify::Error> {
        let (watcher, mut changes) = FileWatcher::files(self.sources.watched_paths());
        let handle = watcher.run()?;

        let state = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = changes.recv() => {
                        let Some(path) = changed else { break };
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        while changes.try_recv().is_ok() {}
                        tracing::info!(path = ?path, "Rule file changed, reloading");
                        state.reload();
                    }
                    _ = shutdown.recv() => break,
                }
            }
        });

        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::DevConfig;
    use crate::rules::MatchRequest;
    use axum::http::{HeaderMap, Uri};

    #[test]
    fn reload_swaps_in_new_rules() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("_redirects");
        std::fs::write(&file, "/a /first\n").unwrap();

        let mut config = DevConfig::default();
        config.site.publish_dir = dir.path().to_path_buf();
        config.site.project_dir = dir.path().to_path_buf();
        let state = RoutingState::load(RuleSources::from_config(&config), HashMap::new());

        let req = MatchRequest::from_parts("http", &Uri::from_static("/a"), &HeaderMap::new(), None);
        let old = state.snapshot();
        assert_eq!(old.matcher.match_request(&req).unwrap().to, "/first");

        std::fs::write(&file, "/a /second\n").unwrap();
        state.reload();

        assert_eq!(state.snapshot().matcher.match_request(&req).unwrap().to, "/second");
        assert_eq!(old.matcher.match_request(&req).unwrap().to, "/first");
    }
}
