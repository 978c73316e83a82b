//! Registered serverless functions and their route tables.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use axum::http::Method;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use regex::Regex;

use crate::functions::builder::{BuildError, FunctionBuilder, FunctionSource};

/// Language runtime a function is executed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Runtime {
    Js,
    Go,
    Rust,
}

impl Runtime {
    pub fn as_str(&self) -> &'static str {
        match self {
            Runtime::Js => "js",
            Runtime::Go => "go",
            Runtime::Rust => "rs",
        }
    }
}

/// How a route path is compared against the request path.
#[derive(Debug, Clone)]
pub enum RouteMatcher {
    /// Normalized literal path.
    Literal(String),
    /// Anchored, case-insensitive expression.
    Expression(Regex),
}

impl RouteMatcher {
    pub fn matches(&self, normalized_path: &str) -> bool {
        match self {
            RouteMatcher::Literal(lit) => lit == normalized_path,
            RouteMatcher::Expression(re) => re.is_match(normalized_path),
        }
    }
}

/// One declared route.
#[derive(Debug, Clone)]
pub struct FunctionRoute {
    /// Pattern as declared.
    pub pattern: String,
    pub matcher: RouteMatcher,
    /// Accepted methods. Empty means any.
    pub methods: Vec<Method>,
    pub prefer_static: bool,
}

impl FunctionRoute {
    pub fn accepts(&self, method: &Method) -> bool {
        self.methods.is_empty() || self.methods.contains(method)
    }
}

/// Output of a successful build.
#[derive(Debug, Clone, Default)]
pub struct BuildData {
    pub routes: Vec<FunctionRoute>,
    pub excluded_routes: Vec<RouteMatcher>,
    pub runtime_api_version: u8,
}

pub type BuildOutcome = Result<Arc<BuildData>, Arc<BuildError>>;
type BuildGate = Shared<BoxFuture<'static, BuildOutcome>>;

/// A function known to the registry.
///
/// Every read of the route table awaits the current build gate, so callers
/// arriving during a rebuild observe the rebuilt table.
pub struct RegisteredFunction {
    pub name: String,
    pub display_name: String,
    pub main_file: PathBuf,
    pub runtime: Runtime,
    pub schedule: Option<String>,
    gate: Mutex<BuildGate>,
    modified: Mutex<Option<SystemTime>>,
}

impl std::fmt::Debug for RegisteredFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredFunction")
            .field("name", &self.name)
            .field("main_file", &self.main_file)
            .field("runtime", &self.runtime)
            .finish()
    }
}

impl RegisteredFunction {
    /// Register a function and start its first build.
    pub fn new(source: FunctionSource, builder: Arc<dyn FunctionBuilder>) -> Self {
        let schedule = builder.schedule(&source.name);
        let display_name = builder
            .display_name(&source.name)
            .unwrap_or_else(|| source.name.clone());
        let modified = modified_time(&source.main_file);
        let gate = start_build(source.clone(), builder);
        Self {
            name: source.name,
            display_name,
            main_file: source.main_file,
            runtime: source.runtime,
            schedule,
            gate: Mutex::new(gate),
            modified: Mutex::new(modified),
        }
    }

    pub fn is_background(&self) -> bool {
        self.name.ends_with("-background")
    }

    pub fn source(&self) -> FunctionSource {
        FunctionSource {
            name: self.name.clone(),
            main_file: self.main_file.clone(),
            runtime: self.runtime,
        }
    }

    /// Replace the build gate with a fresh build.
    pub fn rebuild(&self, builder: Arc<dyn FunctionBuilder>) {
        let gate = start_build(self.source(), builder);
        if let Ok(mut current) = self.gate.lock() {
            *current = gate;
        }
        if let Ok(mut modified) = self.modified.lock() {
            *modified = modified_time(&self.main_file);
        }
        tracing::info!(function = %self.name, "Rebuilding function");
    }

    /// Whether the main file changed since the last build started.
    pub fn is_stale(&self) -> bool {
        let current = modified_time(&self.main_file);
        self.modified
            .lock()
            .map(|m| *m != current)
            .unwrap_or(false)
    }

    /// Wait for the current build and return its data, if it succeeded.
    pub async fn build_data(&self) -> Option<Arc<BuildData>> {
        let gate = match self.gate.lock() {
            Ok(gate) => gate.clone(),
            Err(_) => return None,
        };
        gate.await.ok()
    }

    /// Declared route patterns, after the current build.
    pub async fn route_patterns(&self) -> Vec<String> {
        self.build_data()
            .await
            .map(|data| data.routes.iter().map(|r| r.pattern.clone()).collect())
            .unwrap_or_default()
    }
}

fn start_build(source: FunctionSource, builder: Arc<dyn FunctionBuilder>) -> BuildGate {
    let gate: BuildGate = async move {
        match builder.build(&source).await {
            Ok(data) => {
                tracing::debug!(function = %source.name, routes = data.routes.len(), "Function built");
                Ok(Arc::new(data))
            }
            Err(e) => {
                tracing::error!(function = %source.name, error = %e, "Function build failed");
                Err(Arc::new(e))
            }
        }
    }
    .boxed()
    .shared();

    // Drive the build eagerly; waiters share the same outcome.
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        handle.spawn(gate.clone());
    }
    gate
}

fn modified_time(path: &std::path::Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Strip a trailing slash (except for `/`) and lowercase.
pub fn normalize_path(path: &str) -> String {
    let trimmed = if path.len() > 1 {
        path.trim_end_matches('/')
    } else {
        path
    };
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_paths() {
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("/API/Users/"), "/api/users");
        assert_eq!(normalize_path("///"), "/");
    }

    #[test]
    fn literal_and_expression_matchers() {
        assert!(RouteMatcher::Literal("/a".into()).matches("/a"));
        let re = Regex::new("(?i)^/items/[^/]+/?$").unwrap();
        assert!(RouteMatcher::Expression(re).matches("/items/42"));
    }

    #[test]
    fn empty_methods_accept_everything() {
        let route = FunctionRoute {
            pattern: "/a".into(),
            matcher: RouteMatcher::Literal("/a".into()),
            methods: vec![],
            prefer_static: false,
        };
        assert!(route.accepts(&Method::DELETE));
    }
}
