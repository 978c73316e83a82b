//! Ordered first-match rule evaluation.
//!
//! # Responsibilities
//! - Compile the ordered rule list into path patterns once per reload
//! - Evaluate host, path, query and geo/language conditions
//! - Substitute placeholders into the destination
//!
//! # Design Decisions
//! - First match wins; later rules are never consulted
//! - Role conditions do not filter; they are carried as `jwt_roles` and
//!   enforced by the dispatcher after the match
//! - Signing secrets are resolved here so a missing variable is reported once
//!   per matching request

use std::collections::HashMap;

use axum::http::{header, HeaderMap, Uri};
use percent_encoding::percent_decode_str;

use crate::rules::pattern::{substitute, Captures, PathPattern};
use crate::rules::rule::{Match, Rule};

/// Cookie overriding the detected language.
pub const LANGUAGE_COOKIE: &str = "nf_lang";
/// Cookie overriding the detected country.
pub const COUNTRY_COOKIE: &str = "nf_country";

/// The request as seen by the rule matcher.
#[derive(Debug, Clone)]
pub struct MatchRequest {
    pub scheme: String,
    /// Host without port, lowercased.
    pub host: String,
    /// Percent-decoded path.
    pub path: String,
    pub query: Option<String>,
    pub cookies: HashMap<String, String>,
    /// Synthesized `x-language`.
    pub language: String,
    /// Synthesized `x-country`.
    pub country: String,
}

impl MatchRequest {
    /// Build from an incoming request's URI and headers.
    pub fn from_parts(scheme: &str, uri: &Uri, headers: &HeaderMap, geo_country: Option<&str>) -> Self {
        let cookies = parse_cookies(headers);

        let host = headers
            .get(header::HOST)
            .and_then(|h| h.to_str().ok())
            .or_else(|| uri.host())
            .map(strip_port)
            .unwrap_or_default()
            .to_lowercase();

        let language = cookies
            .get(LANGUAGE_COOKIE)
            .cloned()
            .or_else(|| accept_language(headers))
            .unwrap_or_else(|| "en".to_string());

        let country = cookies
            .get(COUNTRY_COOKIE)
            .cloned()
            .or_else(|| geo_country.map(str::to_string))
            .unwrap_or_else(|| "us".to_string());

        Self {
            scheme: scheme.to_string(),
            host,
            path: decode_path(uri.path()),
            query: uri.query().map(str::to_string),
            cookies,
            language,
            country,
        }
    }
}

/// Percent-decode a URL path, keeping the raw path when it is not valid UTF-8.
pub fn decode_path(path: &str) -> String {
    percent_decode_str(path)
        .decode_utf8()
        .map(|p| p.into_owned())
        .unwrap_or_else(|_| path.to_string())
}

/// Parse every `Cookie` header into a name to value map.
pub fn parse_cookies(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            Some((name.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

fn accept_language(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::ACCEPT_LANGUAGE)?.to_str().ok()?;
    let first = value.split(',').next()?.trim();
    if first.is_empty() {
        return None;
    }
    Some(first.chars().take(2).collect::<String>().to_lowercase())
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return host.split_once(']').map(|(h, _)| &h[1..]).unwrap_or(host);
    }
    host.split(':').next().unwrap_or(host)
}

#[derive(Debug)]
struct CompiledRule {
    rule: Rule,
    pattern: PathPattern,
}

/// Compiled rule set. Rebuilt and swapped whole on reload.
#[derive(Debug, Default)]
pub struct RuleMatcher {
    rules: Vec<CompiledRule>,
    env: HashMap<String, String>,
}

impl RuleMatcher {
    /// Compile rules in evaluation order. `env` backs signing secret lookup.
    pub fn new(rules: Vec<Rule>, env: HashMap<String, String>) -> Self {
        let rules = rules
            .into_iter()
            .map(|rule| CompiledRule {
                pattern: PathPattern::parse(&rule.path),
                rule,
            })
            .collect();
        Self { rules, env }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Return the first rule accepting the request.
    pub fn match_request(&self, req: &MatchRequest) -> Option<Match> {
        self.rules.iter().find_map(|compiled| self.try_rule(compiled, req))
    }

    fn try_rule(&self, compiled: &CompiledRule, req: &MatchRequest) -> Option<Match> {
        let rule = &compiled.rule;

        if let Some(host) = &rule.host {
            if host != &req.host {
                return None;
            }
        }

        let mut captures = compiled.pattern.captures(&req.path)?;

        if !params_match(&rule.params, req.query.as_deref(), &mut captures) {
            return None;
        }

        if !condition_matches(&rule.conditions.country, &req.country)
            || !condition_matches(&rule.conditions.language, &req.language)
        {
            return None;
        }

        let to = substitute(&rule.to, &captures);
        let force404 = rule.status == 404 && to.is_empty();

        Some(Match {
            origin: rule.origin.clone(),
            to,
            status: rule.status,
            force: rule.force,
            force404,
            proxy: rule.proxy,
            proxy_headers: rule.headers.clone(),
            signing_secret: rule.sign.as_deref().and_then(|name| self.resolve_secret(name)),
            jwt_roles: rule.conditions.role.clone(),
        })
    }

    fn resolve_secret(&self, name: &str) -> Option<String> {
        let value = self
            .env
            .get(name)
            .cloned()
            .or_else(|| std::env::var(name).ok());
        if value.is_none() {
            tracing::warn!(
                variable = %name,
                "Could not sign redirect because environment variable is not set"
            );
        }
        value
    }
}

fn condition_matches(allowed: &[String], actual: &str) -> bool {
    allowed.is_empty() || allowed.iter().any(|v| v.eq_ignore_ascii_case(actual))
}

fn params_match(params: &[(String, String)], query: Option<&str>, captures: &mut Captures) -> bool {
    if params.is_empty() {
        return true;
    }
    let pairs: HashMap<String, String> = url::form_urlencoded::parse(query.unwrap_or("").as_bytes())
        .into_owned()
        .collect();

    for (key, expected) in params {
        let Some(actual) = pairs.get(key) else {
            return false;
        };
        match expected.strip_prefix(':') {
            Some(name) if !name.is_empty() => {
                captures.insert(name.to_string(), actual.clone());
            }
            _ => {
                if actual != expected {
                    return false;
                }
            }
        }
    }
    true
}
