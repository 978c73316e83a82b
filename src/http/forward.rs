//! Upstream transport.
//!
//! # Responsibilities
//! - Forward requests to local origins (framework, functions server, edge
//!   runtime, image service) over a pooled hyper client
//! - Fetch external origins (rule proxies, addons) over reqwest, streaming
//!   the response back
//! - Serve the publish directory when no framework server is configured
//!
//! # Design Decisions
//! - Request bodies are already buffered by the dispatcher, so a failed
//!   attempt can be replayed once on the other IP family
//! - Hop-by-hop headers never cross the proxy

use std::error::Error as StdError;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Method, Request, Response, StatusCode, Uri};
use bytes::Bytes;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use thiserror::Error;
use tower::ServiceExt;
use tower_http::services::ServeDir;
use url::Url;

use crate::assets;

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("invalid upstream address '{0}'")]
    InvalidUri(String),

    #[error("connection refused by {0}")]
    ConnectionRefused(String),

    #[error("upstream request failed: {0}")]
    Local(#[from] hyper_util::client::legacy::Error),

    #[error("external request failed: {0}")]
    External(#[from] reqwest::Error),

    #[error("could not build upstream request: {0}")]
    Http(#[from] axum::http::Error),
}

/// Headers meaningful only for a single transport hop.
pub fn is_hop_by_hop(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let names: Vec<_> = headers
        .keys()
        .filter(|k| is_hop_by_hop(k.as_str()))
        .cloned()
        .collect();
    for name in names {
        headers.remove(name);
    }
}

/// A request ready to be sent upstream.
#[derive(Debug, Clone)]
pub struct Outgoing {
    pub method: Method,
    /// Path and query sent to the origin.
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// The framework dev server address, switchable between IP families.
pub struct FrameworkTarget {
    url: ArcSwap<Url>,
    detect_host: bool,
}

impl FrameworkTarget {
    pub fn new(url: Url, detect_host: bool) -> Self {
        Self {
            url: ArcSwap::from_pointee(url),
            detect_host,
        }
    }

    pub fn current(&self) -> Arc<Url> {
        self.url.load_full()
    }

    pub fn detect_host(&self) -> bool {
        self.detect_host
    }

    /// Flip between IPv4 and IPv6 loopback and persist the choice.
    pub fn switch_family(&self) -> Option<Arc<Url>> {
        let current = self.current();
        let next_host = match current.host() {
            Some(url::Host::Ipv6(_)) => "127.0.0.1",
            Some(url::Host::Ipv4(_)) | Some(url::Host::Domain(_)) => "[::1]",
            None => return None,
        };
        let mut next = (*current).clone();
        next.set_host(Some(next_host)).ok()?;
        let next = Arc::new(next);
        self.url.store(next.clone());
        tracing::info!(from = %current, to = %next, "Switched framework server address family");
        Some(next)
    }
}

/// Clients for every upstream kind.
#[derive(Clone)]
pub struct Forwarder {
    client: Client<HttpConnector, Body>,
    external: reqwest::Client,
}

impl Forwarder {
    pub fn new() -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        let external = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_default();
        Self { client, external }
    }

    /// Send a request to a local HTTP origin.
    pub async fn forward_local(&self, origin: &Url, outgoing: &Outgoing) -> Result<Response<Body>, ForwardError> {
        let uri = join_origin(origin, &outgoing.path_and_query)?;

        let mut builder = Request::builder().method(outgoing.method.clone()).uri(uri);
        if let Some(headers) = builder.headers_mut() {
            *headers = outgoing.headers.clone();
            strip_hop_by_hop(headers);
        }
        let request = builder.body(Body::from(outgoing.body.clone()))?;

        match self.client.request(request).await {
            Ok(response) => {
                let (mut parts, body) = response.into_parts();
                strip_hop_by_hop(&mut parts.headers);
                Ok(Response::from_parts(parts, Body::new(body)))
            }
            Err(e) if is_connection_refused(&e) => Err(ForwardError::ConnectionRefused(origin.to_string())),
            Err(e) => Err(ForwardError::Local(e)),
        }
    }

    /// Send a request to the framework, retrying once on the other IP family.
    pub async fn forward_framework(
        &self,
        target: &FrameworkTarget,
        outgoing: &Outgoing,
    ) -> Result<Response<Body>, ForwardError> {
        let origin = target.current();
        match self.forward_local(&origin, outgoing).await {
            Err(ForwardError::ConnectionRefused(addr)) if target.detect_host() => match target.switch_family() {
                Some(next) => self.forward_local(&next, outgoing).await,
                None => Err(ForwardError::ConnectionRefused(addr)),
            },
            other => other,
        }
    }

    /// Fetch an absolute external URL and stream the response back.
    pub async fn forward_external(&self, target: &Url, outgoing: &Outgoing) -> Result<Response<Body>, ForwardError> {
        let mut headers = outgoing.headers.clone();
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);

        let response = self
            .external
            .request(outgoing.method.clone(), target.clone())
            .headers(headers)
            .body(outgoing.body.clone())
            .send()
            .await?;

        let mut builder = Response::builder().status(response.status());
        if let Some(out) = builder.headers_mut() {
            *out = response.headers().clone();
            strip_hop_by_hop(out);
        }
        Ok(builder.body(Body::from_stream(response.bytes_stream()))?)
    }

    /// The reqwest client, for upgrade tunnels and activity pings.
    pub fn external_client(&self) -> &reqwest::Client {
        &self.external
    }

    /// The hyper client, for upgrade tunnels to local origins.
    pub fn local_client(&self) -> &Client<HttpConnector, Body> {
        &self.client
    }
}

impl Default for Forwarder {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the absolute URI for a local origin and a path.
pub fn join_origin(origin: &Url, path_and_query: &str) -> Result<Uri, ForwardError> {
    let base = origin.as_str().trim_end_matches('/');
    let path = if path_and_query.starts_with('/') {
        path_and_query.to_string()
    } else {
        format!("/{}", path_and_query)
    };
    let joined = format!("{}{}", base, path);
    joined.parse::<Uri>().map_err(|_| ForwardError::InvalidUri(joined))
}

fn is_connection_refused(err: &(dyn StdError + 'static)) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::ConnectionRefused {
                return true;
            }
        }
        current = e.source();
    }
    false
}

/// Serves the publish directory when there is no framework server.
#[derive(Clone)]
pub struct StaticServer {
    publish_dir: PathBuf,
    service: ServeDir,
}

impl StaticServer {
    pub fn new(publish_dir: &Path) -> Self {
        Self {
            publish_dir: publish_dir.to_path_buf(),
            // Directory indexes come from the alternative path retries.
            service: ServeDir::new(publish_dir).append_index_html_on_directories(false),
        }
    }

    /// Serve a file, answering misses with the site's 404 page.
    pub async fn serve(&self, outgoing: &Outgoing) -> Response<Body> {
        let uri = outgoing.path_and_query.parse::<Uri>().unwrap_or_else(|_| Uri::from_static("/"));
        let mut request = Request::new(Body::empty());
        *request.method_mut() = match outgoing.method {
            Method::HEAD => Method::HEAD,
            _ => Method::GET,
        };
        *request.uri_mut() = uri;
        *request.headers_mut() = outgoing.headers.clone();

        let response = match self.service.clone().oneshot(request).await {
            Ok(response) => response.map(Body::new),
            Err(e) => match e {},
        };

        if response.status() == StatusCode::NOT_FOUND {
            return self.not_found().await;
        }
        response
    }

    /// The 404 page with status 404.
    pub async fn not_found(&self) -> Response<Body> {
        let body = assets::render_404(&self.publish_dir).await;
        let mut response = Response::new(Body::from(body.clone()));
        *response.status_mut() = StatusCode::NOT_FOUND;
        let content_type = if body == assets::NOT_FOUND_BODY {
            "text/plain; charset=utf-8"
        } else {
            "text/html; charset=utf-8"
        };
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        response
            .headers_mut()
            .insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
        response
    }
}
