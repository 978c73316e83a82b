//! Edge function routing seam.
//!
//! The edge runtime itself is an external process. The dispatcher only asks
//! whether a request belongs to it and, if so, where to send it.

use axum::http::{HeaderMap, HeaderName, HeaderValue, Method};
use url::Url;

use crate::config::schema::EdgeFunctionsConfig;
use crate::rules::pattern::PathPattern;

/// Header naming the edge functions chained for a request.
pub const EDGE_FUNCTIONS_HEADER: &str = "x-nf-edge-functions";
/// Marks a request already handled by the edge runtime.
pub const PASSTHROUGH_HEADER: &str = "x-nf-passthrough";
/// Header telling the runtime where to pass the request on.
pub const PASSTHROUGH_HOST_HEADER: &str = "x-nf-passthrough-host";
pub const PASSTHROUGH_PROTO_HEADER: &str = "x-nf-passthrough-proto";

/// Where an edge-routed request goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeRoute {
    pub target: Url,
    /// Headers added to the forwarded request.
    pub headers: Vec<(HeaderName, HeaderValue)>,
}

/// Decides whether a request is handled by edge functions.
pub trait EdgeFunctionRouter: Send + Sync {
    fn route(&self, method: &Method, path: &str, headers: &HeaderMap) -> Option<EdgeRoute>;
}

/// Router backed by `[[edge_functions.routes]]`.
pub struct ConfiguredEdgeRouter {
    target: Url,
    routes: Vec<(PathPattern, String)>,
    passthrough_host: String,
}

impl ConfiguredEdgeRouter {
    /// `None` when no runtime target is configured.
    pub fn from_config(config: &EdgeFunctionsConfig, passthrough_host: &str) -> Option<Self> {
        let target = Url::parse(config.target.as_deref()?).ok()?;
        let routes = config
            .routes
            .iter()
            .map(|r| (PathPattern::parse(&r.path), r.function.clone()))
            .collect();
        Some(Self {
            target,
            routes,
            passthrough_host: passthrough_host.to_string(),
        })
    }
}

impl EdgeFunctionRouter for ConfiguredEdgeRouter {
    fn route(&self, _method: &Method, path: &str, headers: &HeaderMap) -> Option<EdgeRoute> {
        if headers.contains_key(PASSTHROUGH_HEADER) {
            return None;
        }

        let names: Vec<&str> = self
            .routes
            .iter()
            .filter(|(pattern, _)| pattern.is_match(path))
            .map(|(_, name)| name.as_str())
            .collect();
        if names.is_empty() {
            return None;
        }

        let mut headers = Vec::new();
        if let Ok(value) = HeaderValue::from_str(&names.join(",")) {
            headers.push((HeaderName::from_static(EDGE_FUNCTIONS_HEADER), value));
        }
        headers.push((
            HeaderName::from_static(PASSTHROUGH_HEADER),
            HeaderValue::from_static("passthrough"),
        ));
        if let Ok(value) = HeaderValue::from_str(&self.passthrough_host) {
            headers.push((HeaderName::from_static(PASSTHROUGH_HOST_HEADER), value));
        }
        headers.push((
            HeaderName::from_static(PASSTHROUGH_PROTO_HEADER),
            HeaderValue::from_static("http:"),
        ));

        Some(EdgeRoute {
            target: self.target.clone(),
            headers,
        })
    }
}
