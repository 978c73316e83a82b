//! The dispatch state machine.
//!
//! # Responsibilities
//! - Decide, per request, between image service, edge runtime, functions
//!   server, addon origin, rule handling and the default upstream
//! - Apply a matched rule (`serve_rule`): 404s, headers, signing, JWT gate,
//!   redirects, external proxying, rewrites
//! - Drive the fallback chain when the default upstream answers 404/403
//!
//! # Design Decisions
//! - Routing decisions produce a `Step`; a single loop executes steps so the
//!   fallback chain needs no recursion
//! - Each request works against one rule snapshot
//! - The fallback pass never consults the function registry; any rewrite to a
//!   function has already been handled by the first pass

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{header, HeaderName, HeaderValue, Method, Request, Response, StatusCode, Uri};
use bytes::Bytes;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use thiserror::Error;
use url::Url;

use crate::activity::ActivityNotifier;
use crate::assets;
use crate::config::schema::{DevConfig, HtmlInjection, LimitsConfig};
use crate::functions::{FunctionMatch, FunctionRegistry};
use crate::functions::registry::is_canonical_function_path;
use crate::http::forward::{ForwardError, Forwarder, FrameworkTarget, StaticServer};
use crate::http::response::{plain_error, post_process, EtagPolicy, PostProcess};
use crate::observability::metrics;
use crate::routing::addons::Addons;
use crate::routing::context::RequestContext;
use crate::routing::edge::{ConfiguredEdgeRouter, EdgeFunctionRouter, EdgeRoute};
use crate::routing::signing::{sign_request, SIGNATURE_HEADER};
use crate::routing::state::RoutingState;
use crate::routing::upgrade;
use crate::rules::jwt::{self, INVALID_JWT_MESSAGE, JWT_COOKIE};
use crate::rules::matcher::{decode_path, parse_cookies};
use crate::rules::rule::is_redirect_status;
use crate::rules::{JwtOutcome, Match, MatchRequest};

/// Name of the function a request was routed to.
pub const FUNCTION_NAME_HEADER: &str = "x-nf-function-name";
/// Route pattern that selected the function.
pub const FUNCTION_ROUTE_HEADER: &str = "x-nf-function-route";
pub const ORIGINAL_PATHNAME_HEADER: &str = "x-netlify-original-pathname";
pub const ORIGINAL_SEARCH_HEADER: &str = "x-netlify-original-search";
/// Rule header silencing the external proxy log line.
pub const HIDDEN_PROXY_HEADER: &str = "x-nf-hidden-proxy";

/// Paths served by the image transformation service.
pub const IMAGES_PREFIX: &str = "/.netlify/images";
/// Where requests denied by the JWT gate are sent.
pub const DENIED_PATH: &str = "/.netlify/non-existent-path";

pub const EDGE_ERROR_MESSAGE: &str =
    "There was an error with an Edge Function. Please check the terminal for more details.";
pub const PROXY_ERROR_MESSAGE: &str = "Could not proxy request.";

const INTERNAL_PREFIX: &str = "/.netlify/";

// Characters escaped when a file path becomes a URL path.
const PATH_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'|')
    .add(b'\\')
    .add(b'^');

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("could not read request body: {0}")]
    Body(#[from] axum::Error),

    #[error("timed out reading request body")]
    BodyTimeout,

    #[error(transparent)]
    Forward(#[from] ForwardError),
}

/// Where a routed request is sent.
#[derive(Debug)]
enum Upstream {
    /// Framework server, or the publish directory in static mode.
    Default,
    Functions(Vec<(HeaderName, HeaderValue)>),
    Edge(EdgeRoute),
    Images,
    Addon(Url),
    External(Url),
}

impl Upstream {
    fn label(&self) -> &'static str {
        match self {
            Upstream::Default => "default",
            Upstream::Functions(_) => "functions",
            Upstream::Edge(_) => "edge",
            Upstream::Images => "images",
            Upstream::Addon(_) => "addon",
            Upstream::External(_) => "external",
        }
    }
}

enum Step {
    /// Answer without contacting an upstream.
    Respond(Response<Body>),
    Forward(Upstream),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleMode {
    Primary,
    /// Rerun after the default upstream answered 404/403.
    Fallback,
}

/// Routes every request to its target.
pub struct Dispatcher {
    site_id: String,
    site_url: String,
    publish_dir: PathBuf,
    jwt_role_path: String,
    geo_country: Option<String>,
    rules: Arc<RoutingState>,
    functions: Arc<FunctionRegistry>,
    functions_url: Option<Url>,
    framework: Option<FrameworkTarget>,
    images_url: Option<Url>,
    forwarder: Forwarder,
    static_server: StaticServer,
    addons: Addons,
    edge: Option<Box<dyn EdgeFunctionRouter>>,
    activity: Option<ActivityNotifier>,
    injections: Vec<HtmlInjection>,
    limits: LimitsConfig,
}

impl Dispatcher {
    pub fn new(config: &DevConfig, rules: Arc<RoutingState>, functions: Arc<FunctionRegistry>) -> Self {
        let forwarder = Forwarder::new();

        let functions_url = config
            .functions
            .server_port
            .and_then(|port| Url::parse(&format!("http://127.0.0.1:{}", port)).ok());

        let framework = config.framework.as_ref().and_then(|fw| {
            let host = if fw.host.contains(':') && !fw.host.starts_with('[') {
                format!("[{}]", fw.host)
            } else {
                fw.host.clone()
            };
            match Url::parse(&format!("http://{}:{}", host, fw.port)) {
                Ok(url) => Some(FrameworkTarget::new(url, fw.detect_host)),
                Err(e) => {
                    tracing::error!(host = %fw.host, port = fw.port, error = %e, "Invalid framework address");
                    None
                }
            }
        });

        let images_url = config.images.target.as_deref().and_then(|t| Url::parse(t).ok());

        let edge = ConfiguredEdgeRouter::from_config(&config.edge_functions, &config.listener.bind_address)
            .map(|router| Box::new(router) as Box<dyn EdgeFunctionRouter>);

        let activity = match &config.activity {
            Some(_) if config.site.id.is_empty() => {
                tracing::warn!("Activity pings need site.id; disabled");
                None
            }
            Some(activity) => Some(ActivityNotifier::from_config(
                &config.site.id,
                activity,
                forwarder.external_client().clone(),
            )),
            None => None,
        };

        Self {
            site_id: config.site.id.clone(),
            site_url: config.site.url.clone(),
            publish_dir: config.site.publish_dir.clone(),
            jwt_role_path: config.rules.jwt_role_path.clone(),
            geo_country: config.rules.geo_country.clone(),
            rules,
            functions,
            functions_url,
            framework,
            images_url,
            static_server: StaticServer::new(&config.site.publish_dir),
            forwarder,
            addons: Addons::new(config.addons.clone()),
            edge,
            activity,
            injections: config.html_injections.clone(),
            limits: config.limits.clone(),
        }
    }

    /// Replace the edge function router.
    pub fn with_edge_router(mut self, router: Box<dyn EdgeFunctionRouter>) -> Self {
        self.edge = Some(router);
        self
    }

    pub fn rules(&self) -> &Arc<RoutingState> {
        &self.rules
    }

    pub fn functions(&self) -> &Arc<FunctionRegistry> {
        &self.functions
    }

    /// Route one request and produce the client response.
    pub async fn dispatch(&self, request: Request<Body>, peer: SocketAddr, scheme: &'static str) -> Response<Body> {
        let started = Instant::now();
        let method = request.method().clone();

        if upgrade::is_upgrade_request(request.headers()) {
            let response = self.dispatch_upgrade(request, peer, scheme).await;
            metrics::record_dispatch(method.as_str(), response.status().as_u16(), "upgrade", started);
            return response;
        }

        let (parts, body) = request.into_parts();
        let body = match self.read_body(&parts.method, body).await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(method = %parts.method, path = %parts.uri.path(), error = %e, "Rejected request body");
                metrics::record_dispatch(method.as_str(), 500, "none", started);
                return plain_error(StatusCode::INTERNAL_SERVER_ERROR, PROXY_ERROR_MESSAGE);
            }
        };

        let mut ctx = RequestContext::new(parts.method, &parts.uri, parts.headers, body, peer, scheme);
        tracing::debug!(
            request_id = %ctx.request_id,
            method = %ctx.method,
            url = %ctx.url,
            "Dispatching request"
        );

        let (target, response) = match self.route(&mut ctx).await {
            Ok(routed) => routed,
            Err(e) => {
                tracing::error!(request_id = %ctx.request_id, url = %ctx.url, error = %e, "Proxy error");
                let message = if ctx.edge_function {
                    EDGE_ERROR_MESSAGE
                } else {
                    PROXY_ERROR_MESSAGE
                };
                ("error", plain_error(StatusCode::INTERNAL_SERVER_ERROR, message))
            }
        };

        metrics::record_dispatch(method.as_str(), response.status().as_u16(), target, started);
        response
    }

    async fn read_body(&self, method: &Method, body: Body) -> Result<Bytes, DispatchError> {
        if matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS) {
            return Ok(Bytes::new());
        }
        let deadline = Duration::from_secs(self.limits.body_timeout_secs);
        match tokio::time::timeout(deadline, axum::body::to_bytes(body, self.limits.max_body_bytes)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(DispatchError::BodyTimeout),
        }
    }

    async fn route(&self, ctx: &mut RequestContext) -> Result<(&'static str, Response<Body>), DispatchError> {
        let step = self.decide(ctx).await?;
        self.run(ctx, step).await
    }

    /// Top-level routing, up to and including the rule match.
    async fn decide(&self, ctx: &mut RequestContext) -> Result<Step, DispatchError> {
        let path = ctx.path().to_string();

        if path.starts_with(IMAGES_PREFIX) {
            return Ok(Step::Forward(Upstream::Images));
        }

        if let Some(route) = self
            .edge
            .as_ref()
            .and_then(|edge| edge.route(&ctx.method, &path, &ctx.headers))
        {
            ctx.edge_function = true;
            return Ok(Step::Forward(Upstream::Edge(route)));
        }

        if self.functions_url.is_some() {
            let decoded = decode_path(&path);
            let publish_dir = &self.publish_dir;
            let found = self
                .functions
                .locate(&path, &ctx.method, || async move {
                    assets::resolve(publish_dir, &decoded).await.is_some()
                })
                .await;
            match found {
                FunctionMatch::Matched { function, route } => {
                    return Ok(Step::Forward(Upstream::Functions(function_headers(
                        &function.name,
                        route.as_deref(),
                    ))));
                }
                FunctionMatch::FunctionNotFound => {
                    return Ok(Step::Forward(Upstream::Functions(Vec::new())));
                }
                FunctionMatch::NoMatch => {}
            }
        } else if is_canonical_function_path(&path) {
            // Answered with a 404 for want of a functions server.
            return Ok(Step::Forward(Upstream::Functions(Vec::new())));
        }

        if let Some(url) = self.addons.resolve(&ctx.url) {
            return Ok(Step::Forward(Upstream::Addon(url)));
        }

        let snapshot = self.rules.snapshot();
        let uri = ctx.url.parse::<Uri>().unwrap_or_else(|_| Uri::from_static("/"));
        let request = MatchRequest::from_parts(ctx.scheme, &uri, &ctx.headers, self.geo_country.as_deref());

        if let Some(rule) = snapshot.matcher.match_request(&request) {
            tracing::debug!(request_id = %ctx.request_id, rule = %rule.origin, to = %rule.to, "Rule matched");
            ctx.etag_policy = EtagPolicy::NotRedirect;
            if !rule.is_external() {
                self.notify_activity(&ctx.method);
            }
            return self.serve_rule(ctx, rule, RuleMode::Primary).await;
        }

        ctx.etag_policy = EtagPolicy::SuccessOnly;

        if self.functions_url.is_some()
            && self.functions.form_handler().is_some()
            && ctx.is_form_post()
            && !is_internal(&ctx.url)
        {
            return Ok(Step::Forward(Upstream::Functions(Vec::new())));
        }

        self.notify_activity(&ctx.method);
        Ok(Step::Forward(Upstream::Default))
    }

    /// Apply a matched rule.
    async fn serve_rule(&self, ctx: &mut RequestContext, rule: Match, mode: RuleMode) -> Result<Step, DispatchError> {
        // Once the upstream has reported the path missing nothing shadows the rule.
        let force = rule.force || mode == RuleMode::Fallback;

        if rule.force404 {
            return Ok(Step::Respond(self.static_server.not_found().await));
        }

        for (name, value) in &rule.proxy_headers {
            ctx.set_header(name, value);
        }

        if let Some(secret) = &rule.signing_secret {
            match sign_request(secret, &self.site_id, &self.site_url) {
                Ok(token) => ctx.set_header(SIGNATURE_HEADER, &token),
                Err(e) => tracing::warn!(rule = %rule.origin, error = %e, "Could not sign redirect"),
            }
        }

        if self.functions_url.is_some() && is_canonical_function_path(ctx.path()) {
            return Ok(Step::Forward(Upstream::Functions(Vec::new())));
        }

        if let Some(url) = self.addons.resolve(&ctx.url) {
            return Ok(Step::Forward(Upstream::Addon(url)));
        }

        if !rule.jwt_roles.is_empty() {
            let cookies = parse_cookies(&ctx.headers);
            let token = cookies.get(JWT_COOKIE).map(String::as_str);
            match jwt::evaluate(token, &rule.jwt_roles, &self.jwt_role_path) {
                JwtOutcome::Allowed => {}
                JwtOutcome::Denied => ctx.url = DENIED_PATH.to_string(),
                JwtOutcome::Malformed => {
                    return Ok(Step::Respond(plain_error(StatusCode::BAD_REQUEST, INVALID_JWT_MESSAGE)));
                }
            }
        }

        let search = ctx.query().map(|q| format!("?{}", q)).unwrap_or_default();
        let query = ctx.query().unwrap_or_default().to_string();

        let static_file = assets::resolve(&self.publish_dir, &decode_path(ctx.path())).await;
        if let Some(file) = &static_file {
            ctx.url = format!("{}{}", encode_path(file), search);
            ctx.static_file = true;
            if !force {
                if mode == RuleMode::Primary {
                    ctx.pending_rule = Some(rule);
                }
                return Ok(Step::Forward(Upstream::Default));
            }
        }

        let origin = format!("{}://{}", ctx.scheme, ctx.host());
        let dest = match destination(&origin, &rule.to, ctx.path(), &query) {
            Some(dest) => dest,
            None => {
                tracing::warn!(rule = %rule.origin, to = %rule.to, "Invalid rule destination");
                return Ok(Step::Forward(Upstream::Default));
            }
        };
        let dest_search = dest.query().map(|q| format!("?{}", q)).unwrap_or_default();
        let dest_path = format!("{}{}", dest.path(), dest_search);

        if rule.is_external() {
            if !rule.is_redirect() {
                let hidden = rule
                    .proxy_headers
                    .iter()
                    .any(|(k, v)| k.eq_ignore_ascii_case(HIDDEN_PROXY_HEADER) && v == "true");
                if !hidden {
                    tracing::info!(destination = %dest, "Proxying to external URL");
                }
                return Ok(Step::Forward(Upstream::External(dest)));
            }
            return Ok(Step::Respond(redirect_response(rule.status, dest.as_str())));
        }

        if rule.is_redirect() {
            tracing::info!(from = %ctx.url, to = %dest_path, status = rule.status, "Redirecting");
            return Ok(Step::Respond(redirect_response(rule.status, &dest_path)));
        }

        if self.functions_url.is_some() && ctx.is_form_post() && !is_internal(&ctx.url) && !is_internal(&dest_path) {
            return Ok(Step::Forward(Upstream::Functions(Vec::new())));
        }

        let dest_static = assets::resolve(&self.publish_dir, &decode_path(dest.path())).await;
        let function = if mode == RuleMode::Fallback {
            FunctionMatch::NoMatch
        } else if self.functions_url.is_none() {
            if is_canonical_function_path(dest.path()) {
                FunctionMatch::FunctionNotFound
            } else {
                FunctionMatch::NoMatch
            }
        } else {
            let has_static = dest_static.is_some();
            self.functions
                .locate(dest.path(), &ctx.method, || async move { has_static })
                .await
        };
        let has_function = !matches!(function, FunctionMatch::NoMatch);

        let rewrite = force
            || (static_file.is_none()
                && ((self.framework.is_none() && dest_static.is_some()) || is_internal(&dest_path) || has_function));
        if rewrite {
            ctx.url = match &dest_static {
                Some(file) => format!("{}{}", encode_path(file), dest_search),
                None => dest_path.clone(),
            };
            ctx.status_override = StatusCode::from_u16(rule.status).ok();
            tracing::info!(request_id = %ctx.request_id, url = %ctx.url, "Rewrote URL");
        }

        let function_headers = match function {
            FunctionMatch::Matched { function, route } => Some(function_headers(&function.name, route.as_deref())),
            FunctionMatch::FunctionNotFound => Some(Vec::new()),
            FunctionMatch::NoMatch => None,
        };
        if let Some(headers) = function_headers {
            let original = ctx.original_path().to_string();
            let original_search = ctx.original_search().to_string();
            ctx.set_header(ORIGINAL_PATHNAME_HEADER, &original);
            ctx.set_header(ORIGINAL_SEARCH_HEADER, &original_search);
            // Functions answer with their own status.
            ctx.status_override = None;
            return Ok(Step::Forward(Upstream::Functions(headers)));
        }

        if ctx.path().starts_with(IMAGES_PREFIX) {
            return Ok(Step::Forward(Upstream::Images));
        }

        if let Some(url) = self.addons.resolve(&ctx.url) {
            return Ok(Step::Forward(Upstream::Addon(url)));
        }

        if !rewrite && mode == RuleMode::Primary {
            ctx.pending_rule = Some(rule);
        }
        Ok(Step::Forward(Upstream::Default))
    }

    /// Execute steps until one produces the client response.
    async fn run(&self, ctx: &mut RequestContext, mut step: Step) -> Result<(&'static str, Response<Body>), DispatchError> {
        let mut fresh = true;
        loop {
            let upstream = match step {
                Step::Respond(response) => return Ok(("local", response)),
                Step::Forward(upstream) => upstream,
            };
            let label = upstream.label();

            let response = match upstream {
                Upstream::Default => {
                    if fresh {
                        let search = ctx.query().map(|q| format!("?{}", q)).unwrap_or_default();
                        ctx.alternative_paths = assets::alternative_paths_for(ctx.path())
                            .into_iter()
                            .map(|p| format!("{}{}", p, search))
                            .collect();
                    }
                    let response = self.forward_default(ctx).await?;
                    let status = response.status();

                    if status == StatusCode::NOT_FOUND || status == StatusCode::FORBIDDEN {
                        if !ctx.alternative_paths.is_empty() {
                            ctx.url = ctx.alternative_paths.remove(0);
                            tracing::debug!(request_id = %ctx.request_id, url = %ctx.url, "Trying alternative path");
                            fresh = false;
                            step = Step::Forward(Upstream::Default);
                            continue;
                        }
                        if let Some(rule) = ctx.pending_rule.take() {
                            tracing::debug!(request_id = %ctx.request_id, rule = %rule.origin, "Upstream missed, applying rule");
                            step = self.serve_rule(ctx, rule, RuleMode::Fallback).await?;
                            fresh = true;
                            continue;
                        }
                    }

                    if ctx.static_file && is_redirect_status(status.as_u16()) {
                        if let Some(location) = location_path(&response) {
                            ctx.url = location;
                            ctx.static_file = false;
                            fresh = true;
                            step = Step::Forward(Upstream::Default);
                            continue;
                        }
                    }

                    self.finish(ctx, response).await
                }
                Upstream::Functions(headers) => {
                    let Some(origin) = &self.functions_url else {
                        return Ok((label, plain_error(StatusCode::NOT_FOUND, "Function not found")));
                    };
                    let mut outgoing = ctx.outgoing(&ctx.url);
                    for (name, value) in headers {
                        outgoing.headers.insert(name, value);
                    }
                    let response = self.forwarder.forward_local(origin, &outgoing).await?;
                    self.finish(ctx, response).await
                }
                Upstream::Edge(route) => {
                    let mut outgoing = ctx.outgoing(&ctx.url);
                    for (name, value) in route.headers {
                        outgoing.headers.insert(name, value);
                    }
                    let response = self.forwarder.forward_local(&route.target, &outgoing).await?;
                    self.finish(ctx, response).await
                }
                Upstream::Images => {
                    let Some(origin) = &self.images_url else {
                        return Ok((
                            label,
                            plain_error(StatusCode::SERVICE_UNAVAILABLE, "Image service is not available."),
                        ));
                    };
                    self.forwarder.forward_local(origin, &ctx.outgoing(&ctx.url)).await?
                }
                Upstream::Addon(url) | Upstream::External(url) => {
                    self.forwarder.forward_external(&url, &ctx.outgoing(&ctx.url)).await?
                }
            };
            return Ok((label, response));
        }
    }

    async fn forward_default(&self, ctx: &RequestContext) -> Result<Response<Body>, DispatchError> {
        let outgoing = ctx.outgoing(&ctx.url);
        match &self.framework {
            Some(target) => Ok(self.forwarder.forward_framework(target, &outgoing).await?),
            None => Ok(self.static_server.serve(&outgoing).await),
        }
    }

    async fn finish(&self, ctx: &RequestContext, response: Response<Body>) -> Response<Body> {
        let snapshot = self.rules.snapshot();
        let opts = PostProcess {
            header_rules: snapshot.headers.headers_for_path(ctx.path()),
            status_override: ctx.status_override,
            etag_policy: ctx.etag_policy,
            if_none_match: ctx
                .headers
                .get(header::IF_NONE_MATCH)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            edge_function: ctx.edge_function,
            accepts_html: ctx.accepts_html(),
            injections: &self.injections,
        };
        post_process(response, opts).await
    }

    async fn dispatch_upgrade(&self, request: Request<Body>, peer: SocketAddr, scheme: &'static str) -> Response<Body> {
        let snapshot = self.rules.snapshot();
        let match_request =
            MatchRequest::from_parts(scheme, request.uri(), request.headers(), self.geo_country.as_deref());
        let path_and_query = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());
        let framework = self.framework.as_ref().map(|f| f.current());

        let Some(target) = upgrade::upgrade_target(
            &snapshot.matcher,
            &match_request,
            &path_and_query,
            framework.as_deref(),
        ) else {
            tracing::warn!(path = %path_and_query, "No upstream accepts upgrade requests");
            return self.static_server.not_found().await;
        };

        match upgrade::tunnel_request(&self.forwarder, &target, request, peer).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(target = %target.origin, error = %e, "Upgrade proxy error");
                plain_error(StatusCode::INTERNAL_SERVER_ERROR, PROXY_ERROR_MESSAGE)
            }
        }
    }

    fn notify_activity(&self, method: &Method) {
        if let Some(activity) = &self.activity {
            activity.notify(method);
        }
    }
}

/// Paths under `/.netlify/` are reserved for platform services.
pub fn is_internal(url: &str) -> bool {
    url.starts_with(INTERNAL_PREFIX)
}

fn function_headers(name: &str, route: Option<&str>) -> Vec<(HeaderName, HeaderValue)> {
    let mut headers = Vec::new();
    if let Ok(value) = HeaderValue::from_str(name) {
        headers.push((HeaderName::from_static(FUNCTION_NAME_HEADER), value));
    }
    if let Some(Ok(value)) = route.map(HeaderValue::from_str) {
        headers.push((HeaderName::from_static(FUNCTION_ROUTE_HEADER), value));
    }
    headers
}

/// Resolve a rule destination against the request origin.
///
/// An empty destination stands for the current path. The request query is
/// carried over only when the destination has none of its own.
fn destination(origin: &str, to: &str, path: &str, query: &str) -> Option<Url> {
    let base = Url::parse(origin).ok()?;
    let target = if to.is_empty() { path } else { to };
    let mut dest = base.join(target).ok()?;
    let has_own_query = dest.query().is_some_and(|q| !q.is_empty());
    if !has_own_query {
        dest.set_query(None);
        if !query.is_empty() {
            dest.query_pairs_mut()
                .extend_pairs(url::form_urlencoded::parse(query.as_bytes()));
        }
    }
    Some(dest)
}

fn redirect_response(status: u16, location: &str) -> Response<Body> {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::MOVED_PERMANENTLY);
    Response::builder()
        .status(status)
        .header(header::LOCATION, location)
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from(format!("Redirecting to {}", location)))
        .unwrap_or_else(|_| plain_error(StatusCode::INTERNAL_SERVER_ERROR, PROXY_ERROR_MESSAGE))
}

fn location_path(response: &Response<Body>) -> Option<String> {
    let location = response.headers().get(header::LOCATION)?.to_str().ok()?;
    let uri = location.parse::<Uri>().ok()?;
    uri.path_and_query().map(|pq| pq.as_str().to_string())
}

fn encode_path(path: &str) -> String {
    utf8_percent_encode(path, PATH_ENCODE_SET).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::{ConfiguredRoutesBuilder, FunctionSource, Runtime};
    use crate::rules::RuleSources;
    use crate::config::schema::{FunctionDefinition, RedirectConfig};
    use std::collections::HashMap;

    struct Site {
        dir: tempfile::TempDir,
        config: DevConfig,
    }

    impl Site {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let mut config = DevConfig::default();
            config.site.publish_dir = dir.path().to_path_buf();
            config.site.project_dir = dir.path().to_path_buf();
            Self { dir, config }
        }

        fn file(&self, path: &str, content: &str) {
            let full = self.dir.path().join(path.trim_start_matches('/'));
            if let Some(parent) = full.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(full, content).unwrap();
        }

        fn redirect(&mut self, from: &str, to: &str, status: u16, force: bool) {
            self.config.rules.redirects.push(RedirectConfig {
                from: from.into(),
                to: to.into(),
                status: Some(status),
                force,
                ..Default::default()
            });
        }

        fn dispatcher(&self) -> Dispatcher {
            let rules = Arc::new(RoutingState::load(RuleSources::from_config(&self.config), HashMap::new()));
            let builder = Arc::new(ConfiguredRoutesBuilder::new(self.config.functions.definitions.clone()));
            let functions = Arc::new(FunctionRegistry::new(builder));
            Dispatcher::new(&self.config, rules, functions)
        }
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header::HOST, "localhost:8888")
            .body(Body::empty())
            .unwrap()
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    async fn text(response: Response<Body>) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn destination_merges_query_only_when_missing() {
        let dest = destination("http://localhost:8888", "/b", "/a", "x=1").unwrap();
        assert_eq!(dest.as_str(), "http://localhost:8888/b?x=1");

        let dest = destination("http://localhost:8888", "/b?y=2", "/a", "x=1").unwrap();
        assert_eq!(dest.as_str(), "http://localhost:8888/b?y=2");

        let dest = destination("http://localhost:8888", "", "/a", "").unwrap();
        assert_eq!(dest.as_str(), "http://localhost:8888/a");
    }

    #[test]
    fn internal_paths() {
        assert!(is_internal("/.netlify/functions/x"));
        assert!(!is_internal("/netlify"));
    }

    #[test]
    fn encodes_file_paths() {
        assert_eq!(encode_path("/my page.html"), "/my%20page.html");
        assert_eq!(encode_path("/a/b.html"), "/a/b.html");
    }

    #[tokio::test]
    async fn redirect_rule_answers_with_location() {
        let mut site = Site::new();
        site.redirect("/old", "/new", 301, false);
        let response = site.dispatcher().dispatch(get("/old"), peer(), "http").await;

        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(response.headers()[header::LOCATION], "/new");
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");
        assert_eq!(text(response).await, "Redirecting to /new");
    }

    #[tokio::test]
    async fn redirect_keeps_request_query() {
        let mut site = Site::new();
        site.redirect("/old", "/new", 302, false);
        let response = site.dispatcher().dispatch(get("/old?page=2"), peer(), "http").await;
        assert_eq!(response.headers()[header::LOCATION], "/new?page=2");
    }

    #[tokio::test]
    async fn existing_file_shadows_unforced_rule() {
        let mut site = Site::new();
        site.file("/about.html", "<p>about</p>");
        site.redirect("/about", "/elsewhere", 301, false);
        let response = site.dispatcher().dispatch(get("/about"), peer(), "http").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(text(response).await, "<p>about</p>");
    }

    #[tokio::test]
    async fn forced_rule_wins_over_existing_file() {
        let mut site = Site::new();
        site.file("/about.html", "<p>about</p>");
        site.redirect("/about", "/elsewhere", 301, true);
        let response = site.dispatcher().dispatch(get("/about"), peer(), "http").await;
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
    }

    #[tokio::test]
    async fn rewrite_serves_destination_file_in_static_mode() {
        let mut site = Site::new();
        site.file("/index.html", "<h1>app</h1>");
        site.redirect("/*", "/index.html", 200, false);
        let response = site.dispatcher().dispatch(get("/deep/link"), peer(), "http").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(text(response).await, "<h1>app</h1>");
    }

    #[tokio::test]
    async fn rewrite_status_overrides_response() {
        let mut site = Site::new();
        site.file("/404.html", "custom missing");
        site.redirect("/*", "/404.html", 404, false);
        let response = site.dispatcher().dispatch(get("/nothing/here"), peer(), "http").await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(text(response).await, "custom missing");
    }

    #[tokio::test]
    async fn force404_renders_404_page() {
        let mut site = Site::new();
        site.file("/404.html", "<h1>gone</h1>");
        site.file("/secret.html", "hidden");
        site.config.rules.redirects.push(RedirectConfig {
            from: "/secret".into(),
            to: String::new(),
            status: Some(404),
            force: true,
            ..Default::default()
        });
        let response = site.dispatcher().dispatch(get("/secret"), peer(), "http").await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(text(response).await, "<h1>gone</h1>");
    }

    #[tokio::test]
    async fn malformed_jwt_is_rejected() {
        let mut site = Site::new();
        site.config.rules.redirects.push(RedirectConfig {
            from: "/admin/*".into(),
            to: "/admin/:splat".into(),
            status: Some(200),
            conditions: crate::config::schema::RedirectConditions {
                role: vec!["admin".into()],
                ..Default::default()
            },
            ..Default::default()
        });
        let request = Request::builder()
            .uri("/admin/panel")
            .header(header::HOST, "localhost:8888")
            .header(header::COOKIE, "nf_jwt=not-a-token")
            .body(Body::empty())
            .unwrap();
        let response = site.dispatcher().dispatch(request, peer(), "http").await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(text(response).await, INVALID_JWT_MESSAGE);
    }

    #[tokio::test]
    async fn missing_file_tries_alternatives() {
        let site = Site::new();
        site.file("/docs/index.html", "docs");
        let response = site.dispatcher().dispatch(get("/docs"), peer(), "http").await;
        assert_eq!(text(response).await, "docs");
    }

    #[tokio::test]
    async fn unknown_path_renders_404_page() {
        let site = Site::new();
        site.file("/404.html", "nope");
        let response = site.dispatcher().dispatch(get("/missing"), peer(), "http").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(text(response).await, "nope");
    }

    #[tokio::test]
    async fn images_without_service_are_unavailable() {
        let site = Site::new();
        let response = site
            .dispatcher()
            .dispatch(get("/.netlify/images?url=/a.png"), peer(), "http")
            .await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn unreachable_framework_yields_proxy_error() {
        let mut site = Site::new();
        site.config.framework = Some(crate::config::FrameworkConfig {
            host: "127.0.0.1".into(),
            port: 1,
            detect_host: false,
        });
        let response = site.dispatcher().dispatch(get("/"), peer(), "http").await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(text(response).await, PROXY_ERROR_MESSAGE);
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let mut site = Site::new();
        site.config.limits.max_body_bytes = 4;
        let request = Request::builder()
            .method(Method::POST)
            .uri("/form")
            .body(Body::from("too large"))
            .unwrap();
        let response = site.dispatcher().dispatch(request, peer(), "http").await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn unknown_function_without_functions_server_is_404() {
        let mut site = Site::new();
        site.file("/index.html", "home");
        site.redirect("/api/*", "/.netlify/functions/hello", 200, false);
        let dispatcher = site.dispatcher();

        let response = dispatcher.dispatch(get("/.netlify/functions/hello"), peer(), "http").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = dispatcher.dispatch(get("/api/greet"), peer(), "http").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn denied_jwt_rewrites_to_missing_path() {
        let mut site = Site::new();
        site.file("/404.html", "denied");
        site.config.rules.redirects.push(RedirectConfig {
            from: "/admin/*".into(),
            to: "/admin/:splat".into(),
            status: Some(200),
            conditions: crate::config::schema::RedirectConditions {
                role: vec!["admin".into()],
                ..Default::default()
            },
            ..Default::default()
        });
        let response = site.dispatcher().dispatch(get("/admin/panel"), peer(), "http").await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(text(response).await, "denied");
    }

    #[tokio::test]
    async fn function_headers_name_function_and_route() {
        let mut site = Site::new();
        site.config.functions.definitions.insert(
            "hello".into(),
            FunctionDefinition {
                path: vec!["/api/hello".into()],
                ..Default::default()
            },
        );
        let dispatcher = site.dispatcher();
        dispatcher.functions().register(FunctionSource {
            name: "hello".into(),
            main_file: site.dir.path().join("hello.js"),
            runtime: Runtime::Js,
        });

        let found = dispatcher
            .functions()
            .locate("/api/hello", &Method::GET, || async { false })
            .await;
        let FunctionMatch::Matched { function, route } = found else {
            panic!("function should match");
        };
        let headers = function_headers(&function.name, route.as_deref());
        assert_eq!(headers[0].1, "hello");
        assert_eq!(headers[1].1, "/api/hello");
    }
}
