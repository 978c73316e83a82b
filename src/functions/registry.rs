//! Function registry and URL lookup.
//!
//! # Responsibilities
//! - Own the ordered set of registered functions
//! - Map a request path and method to a function (`locate`)
//! - Discover functions on disk and keep the set in sync (`scan`)
//!
//! # Design Decisions
//! - Registration order decides which function wins a shared route
//! - The list lock is never held across an await; route tables are read
//!   through each function's build gate instead

use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use axum::http::Method;

use crate::functions::builder::{FunctionBuilder, FunctionSource};
use crate::functions::function::{normalize_path, FunctionRoute, RegisteredFunction, Runtime};

/// Prefix of canonical function URLs.
pub const FUNCTIONS_PREFIX: &str = "/.netlify/functions/";
/// Prefix of canonical on-demand builder URLs.
pub const BUILDERS_PREFIX: &str = "/.netlify/builders/";

/// Function handling form submissions.
pub const SUBMISSION_FUNCTION: &str = "submission-created";

const JS_EXTENSIONS: &[&str] = &["js", "mjs", "cjs", "ts", "mts", "cts"];

/// Result of looking a path up in the registry.
#[derive(Debug, Clone)]
pub enum FunctionMatch {
    NoMatch,
    /// Canonical function URL naming an unregistered function.
    FunctionNotFound,
    Matched {
        function: Arc<RegisteredFunction>,
        /// Declared route pattern, `None` for canonical URLs.
        route: Option<String>,
    },
}

/// What a `scan` changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanSummary {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub rebuilt: Vec<String>,
}

/// Name of the function addressed by a canonical URL.
pub fn canonical_function_name(path: &str) -> Option<&str> {
    let rest = path
        .strip_prefix(FUNCTIONS_PREFIX)
        .or_else(|| path.strip_prefix(BUILDERS_PREFIX))?;
    let name = rest.split('/').next().unwrap_or(rest);
    (!name.is_empty()).then_some(name)
}

/// Whether the path is a canonical function or builder URL.
pub fn is_canonical_function_path(path: &str) -> bool {
    canonical_function_name(path).is_some()
}

/// Ordered registry of functions.
pub struct FunctionRegistry {
    functions: RwLock<Vec<Arc<RegisteredFunction>>>,
    builder: Arc<dyn FunctionBuilder>,
}

impl FunctionRegistry {
    pub fn new(builder: Arc<dyn FunctionBuilder>) -> Self {
        Self {
            functions: RwLock::new(Vec::new()),
            builder,
        }
    }

    /// Add a function, replacing any previous registration with the same name.
    pub fn register(&self, source: FunctionSource) -> Arc<RegisteredFunction> {
        let function = Arc::new(RegisteredFunction::new(source, self.builder.clone()));
        if let Ok(mut functions) = self.functions.write() {
            match functions.iter_mut().find(|f| f.name == function.name) {
                Some(slot) => *slot = function.clone(),
                None => functions.push(function.clone()),
            }
        }
        tracing::info!(
            function = %function.display_name,
            runtime = function.runtime.as_str(),
            "Loaded function"
        );
        function
    }

    pub fn unregister(&self, name: &str) -> bool {
        let removed = match self.functions.write() {
            Ok(mut functions) => {
                let before = functions.len();
                functions.retain(|f| f.name != name);
                functions.len() != before
            }
            Err(_) => false,
        };
        if removed {
            tracing::info!(function = %name, "Removed function");
        }
        removed
    }

    pub fn get(&self, name: &str) -> Option<Arc<RegisteredFunction>> {
        self.functions
            .read()
            .ok()?
            .iter()
            .find(|f| f.name == name)
            .cloned()
    }

    /// Snapshot of all functions in registration order.
    pub fn list(&self) -> Vec<Arc<RegisteredFunction>> {
        self.functions.read().map(|f| f.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.functions.read().map(|f| f.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The registered form submission handler, background variant included.
    pub fn form_handler(&self) -> Option<Arc<RegisteredFunction>> {
        self.get(SUBMISSION_FUNCTION)
            .or_else(|| self.get(&format!("{}-background", SUBMISSION_FUNCTION)))
    }

    /// Find the function serving `url_path`.
    ///
    /// `has_static_file` is only called when a `prefer_static` route matches,
    /// and at most once.
    pub async fn locate<F, Fut>(&self, url_path: &str, method: &Method, has_static_file: F) -> FunctionMatch
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = bool>,
    {
        if let Some(name) = canonical_function_name(url_path) {
            let Some(function) = self.get(name) else {
                return FunctionMatch::FunctionNotFound;
            };
            let routes = function.route_patterns().await;
            if !routes.is_empty() {
                tracing::warn!(
                    function = %function.name,
                    routes = ?routes,
                    "Function is configured with custom routes; the default URL is not served"
                );
                return FunctionMatch::NoMatch;
            }
            return FunctionMatch::Matched { function, route: None };
        }

        let path = normalize_path(url_path);
        let mut static_check = Some(has_static_file);
        let mut has_static: Option<bool> = None;

        for function in self.list() {
            let Some(data) = function.build_data().await else {
                continue;
            };
            let Some(route) = first_route(&data.routes, &path, method) else {
                continue;
            };
            if data.excluded_routes.iter().any(|ex| ex.matches(&path)) {
                continue;
            }
            if route.prefer_static {
                let found = match has_static {
                    Some(found) => found,
                    None => {
                        let found = match static_check.take() {
                            Some(check) => check().await,
                            None => false,
                        };
                        has_static = Some(found);
                        found
                    }
                };
                if found {
                    continue;
                }
            }
            return FunctionMatch::Matched {
                route: Some(route.pattern.clone()),
                function,
            };
        }

        FunctionMatch::NoMatch
    }

    /// Rebuild a function by name.
    pub fn rebuild(&self, name: &str) -> bool {
        match self.get(name) {
            Some(function) => {
                function.rebuild(self.builder.clone());
                true
            }
            None => false,
        }
    }

    /// Synchronize the registry with the functions found in `dir`.
    pub fn scan(&self, dir: &Path) -> ScanSummary {
        let found = discover(dir);
        let mut summary = ScanSummary::default();

        let names: HashSet<&str> = found.iter().map(|s| s.name.as_str()).collect();
        for existing in self.list() {
            if !names.contains(existing.name.as_str()) && self.unregister(&existing.name) {
                summary.removed.push(existing.name.clone());
            }
        }

        for source in found {
            match self.get(&source.name) {
                Some(existing) if existing.main_file == source.main_file && existing.runtime == source.runtime => {
                    if existing.is_stale() {
                        existing.rebuild(self.builder.clone());
                        summary.rebuilt.push(source.name);
                    }
                }
                _ => {
                    summary.added.push(source.name.clone());
                    self.register(source);
                }
            }
        }

        summary
    }
}

fn first_route<'a>(routes: &'a [FunctionRoute], path: &str, method: &Method) -> Option<&'a FunctionRoute> {
    routes
        .iter()
        .find(|route| route.accepts(method) && route.matcher.matches(path))
}

/// List function sources directly below `dir`, sorted by name.
pub fn discover(dir: &Path) -> Vec<FunctionSource> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(dir = ?dir, error = %e, "Could not read functions directory");
            return Vec::new();
        }
    };

    let mut sources: Vec<FunctionSource> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| detect(&entry.path()))
        .collect();
    sources.sort_by(|a, b| a.name.cmp(&b.name));
    sources.dedup_by(|a, b| a.name == b.name);
    sources
}

fn detect(path: &Path) -> Option<FunctionSource> {
    let name = path.file_stem()?.to_str()?.to_string();
    if name.starts_with('.') {
        return None;
    }

    if path.is_file() {
        let ext = path.extension()?.to_str()?;
        return JS_EXTENSIONS.contains(&ext).then(|| FunctionSource {
            name,
            main_file: path.to_path_buf(),
            runtime: Runtime::Js,
        });
    }

    if !path.is_dir() {
        return None;
    }
    let dir_name = path.file_name()?.to_str()?.to_string();

    for marker in ["main.go", "go.mod"] {
        let candidate = path.join(marker);
        if candidate.is_file() {
            return Some(FunctionSource {
                name: dir_name,
                main_file: candidate,
                runtime: Runtime::Go,
            });
        }
    }

    let cargo = path.join("Cargo.toml");
    if cargo.is_file() {
        return Some(FunctionSource {
            name: dir_name,
            main_file: cargo,
            runtime: Runtime::Rust,
        });
    }

    let entry: Option<PathBuf> = ["index", dir_name.as_str()]
        .iter()
        .flat_map(|stem| JS_EXTENSIONS.iter().map(move |ext| path.join(format!("{}.{}", stem, ext))))
        .find(|candidate| candidate.is_file());

    entry.map(|main_file| FunctionSource {
        name: dir_name,
        main_file,
        runtime: Runtime::Js,
    })
}
