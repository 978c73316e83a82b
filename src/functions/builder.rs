//! Function build seam.
//!
//! Compiling function sources is out of scope; a builder only produces the
//! routing metadata a function declares. The default builder reads it from the
//! `[functions.definitions.<name>]` config tables.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use axum::http::Method;
use regex::Regex;
use thiserror::Error;

use crate::config::schema::FunctionDefinition;
use crate::functions::function::{normalize_path, BuildData, FunctionRoute, Runtime, RouteMatcher};

/// What a builder is handed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSource {
    pub name: String,
    pub main_file: PathBuf,
    pub runtime: Runtime,
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("function '{function}' declares invalid path '{pattern}': {source}")]
    InvalidRoute {
        function: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("function '{function}' declares invalid method '{method}'")]
    InvalidMethod { function: String, method: String },

    #[error("build of '{0}' failed: {1}")]
    Failed(String, String),
}

/// Produces build data for a function.
#[async_trait]
pub trait FunctionBuilder: Send + Sync {
    async fn build(&self, source: &FunctionSource) -> Result<BuildData, BuildError>;

    /// Cron schedule declared for the function.
    fn schedule(&self, _name: &str) -> Option<String> {
        None
    }

    /// Name shown in logs.
    fn display_name(&self, _name: &str) -> Option<String> {
        None
    }
}

/// Builder driven by per-function route declarations in the dev config.
#[derive(Debug, Clone, Default)]
pub struct ConfiguredRoutesBuilder {
    definitions: HashMap<String, FunctionDefinition>,
}

impl ConfiguredRoutesBuilder {
    pub fn new(definitions: HashMap<String, FunctionDefinition>) -> Self {
        Self { definitions }
    }
}

#[async_trait]
impl FunctionBuilder for ConfiguredRoutesBuilder {
    async fn build(&self, source: &FunctionSource) -> Result<BuildData, BuildError> {
        let Some(definition) = self.definitions.get(&source.name) else {
            return Ok(BuildData {
                runtime_api_version: 1,
                ..Default::default()
            });
        };

        let methods = definition
            .method
            .iter()
            .map(|m| {
                Method::from_bytes(m.to_ascii_uppercase().as_bytes()).map_err(|_| BuildError::InvalidMethod {
                    function: source.name.clone(),
                    method: m.clone(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let compile = |pattern: &String| {
            compile_route(pattern).map_err(|e| BuildError::InvalidRoute {
                function: source.name.clone(),
                pattern: pattern.clone(),
                source: e,
            })
        };

        let routes = definition
            .path
            .iter()
            .map(|pattern| {
                Ok(FunctionRoute {
                    pattern: pattern.clone(),
                    matcher: compile(pattern)?,
                    methods: methods.clone(),
                    prefer_static: definition.prefer_static,
                })
            })
            .collect::<Result<Vec<_>, BuildError>>()?;

        let excluded_routes = definition
            .excluded_path
            .iter()
            .map(compile)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(BuildData {
            runtime_api_version: if routes.is_empty() { 1 } else { 2 },
            routes,
            excluded_routes,
        })
    }

    fn schedule(&self, name: &str) -> Option<String> {
        self.definitions.get(name).and_then(|d| d.schedule.clone())
    }
}

/// Paths without wildcards become literals; others become anchored expressions.
pub fn compile_route(pattern: &str) -> Result<RouteMatcher, regex::Error> {
    let normalized = normalize_path(pattern);
    if !normalized.contains('*') && !normalized.contains(':') {
        return Ok(RouteMatcher::Literal(normalized));
    }

    let mut expr = String::from("(?i)^");
    let mut chars = normalized.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => expr.push_str(".*"),
            ':' if chars.peek().is_some_and(|n| n.is_ascii_alphabetic()) => {
                while chars.peek().is_some_and(|n| n.is_ascii_alphanumeric() || *n == '_') {
                    chars.next();
                }
                expr.push_str("[^/]+");
            }
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr).map(RouteMatcher::Expression)
}
