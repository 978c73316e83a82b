//! Startup orchestration.
//!
//! Builds the shared routing state, the function registry and the
//! dispatcher from a validated [`DevConfig`], then starts the file
//! watchers that keep rules and functions current.
//!
//! Watcher failures are logged and the proxy keeps serving the state it
//! loaded at startup.

use std::sync::Arc;

use notify::RecommendedWatcher;

use crate::config::schema::DevConfig;
use crate::functions::{watch_functions, ConfiguredRoutesBuilder, FunctionRegistry};
use crate::lifecycle::Shutdown;
use crate::routing::{Dispatcher, RoutingState};
use crate::rules::RuleSources;

/// Everything a running proxy holds on to.
pub struct Services {
    pub dispatcher: Arc<Dispatcher>,
    pub rules: Arc<RoutingState>,
    pub functions: Arc<FunctionRegistry>,
    /// Dropping these stops file notifications.
    watchers: Vec<RecommendedWatcher>,
}

impl Services {
    /// Build every subsystem without starting watchers.
    pub fn build(config: &DevConfig) -> Self {
        let rules = Arc::new(RoutingState::load(
            RuleSources::from_config(config),
            config.env.clone(),
        ));

        let builder = Arc::new(ConfiguredRoutesBuilder::new(config.functions.definitions.clone()));
        let functions = Arc::new(FunctionRegistry::new(builder));

        let dispatcher = Arc::new(Dispatcher::new(config, rules.clone(), functions.clone()));

        Self {
            dispatcher,
            rules,
            functions,
            watchers: Vec::new(),
        }
    }

    /// Build every subsystem and start the rule and functions watchers.
    pub fn start(config: &DevConfig, shutdown: &Shutdown) -> Self {
        let mut services = Self::build(config);

        match services.rules.watch(shutdown.subscribe()) {
            Ok(watcher) => services.watchers.push(watcher),
            Err(e) => tracing::warn!(error = %e, "Rule files will not be reloaded"),
        }

        if let Some(dir) = &config.functions.directory {
            match watch_functions(services.functions.clone(), dir.clone(), shutdown.subscribe()) {
                Ok(watcher) => services.watchers.push(watcher),
                Err(e) => tracing::warn!(dir = ?dir, error = %e, "Functions directory will not be watched"),
            }
        }

        tracing::info!(
            functions = services.functions.len(),
            watchers = services.watchers.len(),
            "Services started"
        );
        services
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn watches_functions_directory_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let functions_dir = dir.path().join("functions");
        std::fs::create_dir_all(&functions_dir).unwrap();
        std::fs::write(functions_dir.join("hello.js"), "export default () => {}").unwrap();

        let mut config = DevConfig::default();
        config.site.publish_dir = dir.path().to_path_buf();
        config.site.project_dir = dir.path().to_path_buf();
        config.functions.directory = Some(functions_dir);

        let shutdown = Shutdown::new();
        let services = Services::start(&config, &shutdown);

        assert!(services.functions.get("hello").is_some());
        assert_eq!(services.watcher_count(), 2);
        shutdown.trigger();
    }
}
