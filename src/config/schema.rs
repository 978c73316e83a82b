//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the dev proxy.
//! All types derive Serde traits for deserialization from the TOML config file.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration for the dev proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct DevConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Site identity and directories.
    pub site: SiteConfig,

    /// Framework dev server. When absent the publish directory is served directly.
    pub framework: Option<FrameworkConfig>,

    /// Serverless functions settings.
    pub functions: FunctionsConfig,

    /// Edge functions runtime settings.
    pub edge_functions: EdgeFunctionsConfig,

    /// Image transformation service.
    pub images: ImagesConfig,

    /// Redirect and header rule sources.
    pub rules: RulesConfig,

    /// Addon name to external origin.
    pub addons: HashMap<String, String>,

    /// Environment made available to rule signing.
    pub env: HashMap<String, String>,

    /// Snippets spliced into HTML responses.
    pub html_injections: Vec<HtmlInjection>,

    /// Remote dev server liveness pings.
    pub activity: Option<ActivityConfig>,

    /// Request limits.
    pub limits: LimitsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "127.0.0.1:8888").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8888".to_string(),
            tls: None,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Site identity and directory layout.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Site ID, used in signed redirect tokens and activity pings.
    pub id: String,

    /// Public site URL.
    pub url: String,

    /// Directory holding the built static assets.
    pub publish_dir: PathBuf,

    /// Project root, searched for `_redirects` and `_headers`.
    pub project_dir: PathBuf,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            url: String::new(),
            publish_dir: PathBuf::from("."),
            project_dir: PathBuf::from("."),
        }
    }
}

/// Framework dev server target.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FrameworkConfig {
    /// Host the framework server listens on.
    #[serde(default = "default_framework_host")]
    pub host: String,

    /// Port the framework server listens on.
    pub port: u16,

    /// Switch between IPv4 and IPv6 loopback when the host refuses connections.
    #[serde(default)]
    pub detect_host: bool,
}

fn default_framework_host() -> String {
    "localhost".to_string()
}

/// Serverless functions configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FunctionsConfig {
    /// Port of the local functions server. Function dispatch is disabled without it.
    pub server_port: Option<u16>,

    /// Directory scanned for function sources.
    pub directory: Option<PathBuf>,

    /// Synchronous invocation timeout handed to the functions server.
    pub timeout_sync_secs: u64,

    /// Background invocation timeout handed to the functions server.
    pub timeout_background_secs: u64,

    /// Per-function route declarations.
    pub definitions: HashMap<String, FunctionDefinition>,
}

impl Default for FunctionsConfig {
    fn default() -> Self {
        Self {
            server_port: None,
            directory: None,
            timeout_sync_secs: 30,
            timeout_background_secs: 900,
            definitions: HashMap::new(),
        }
    }
}

/// Route declaration for a single function.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct FunctionDefinition {
    /// URL paths the function is served on. `*` and `:param` are allowed.
    pub path: Vec<String>,

    /// Paths excluded from the declared routes.
    pub excluded_path: Vec<String>,

    /// Let a same-path static file win over the function.
    pub prefer_static: bool,

    /// HTTP methods accepted. Empty means any.
    pub method: Vec<String>,

    /// Cron schedule for scheduled functions.
    pub schedule: Option<String>,
}

/// Edge functions runtime configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct EdgeFunctionsConfig {
    /// Base URL of the edge functions runtime.
    pub target: Option<String>,

    /// Path patterns routed through edge functions.
    pub routes: Vec<EdgeRouteConfig>,
}

/// A path pattern claimed by an edge function.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EdgeRouteConfig {
    /// Path pattern (`*` and `:param` allowed).
    pub path: String,

    /// Edge function name.
    pub function: String,
}

/// Image transformation service configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ImagesConfig {
    /// Base URL of the image service.
    pub target: Option<String>,
}

/// Redirect and header rule sources.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RulesConfig {
    /// Dotted path of the roles claim inside `nf_jwt` tokens.
    pub jwt_role_path: String,

    /// Country reported when no `nf_country` cookie is present.
    pub geo_country: Option<String>,

    /// Inline redirect rules, evaluated after the `_redirects` files.
    pub redirects: Vec<RedirectConfig>,

    /// Inline header rules, applied after the `_headers` files.
    pub headers: Vec<HeaderRuleConfig>,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            jwt_role_path: "app_metadata.authorization.roles".to_string(),
            geo_country: None,
            redirects: Vec::new(),
            headers: Vec::new(),
        }
    }
}

/// Inline `[[rules.redirects]]` entry.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RedirectConfig {
    pub from: String,
    pub to: String,
    pub status: Option<u16>,
    pub force: bool,
    pub query: HashMap<String, String>,
    pub conditions: RedirectConditions,
    pub headers: HashMap<String, String>,
    /// Name of the environment variable holding the signing secret.
    pub signed: Option<String>,
}

/// Conditions attached to an inline redirect.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default, rename_all = "PascalCase")]
pub struct RedirectConditions {
    pub country: Vec<String>,
    pub language: Vec<String>,
    pub role: Vec<String>,
}

/// Inline `[[rules.headers]]` entry.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct HeaderRuleConfig {
    #[serde(rename = "for")]
    pub for_path: String,
    pub values: HashMap<String, String>,
}

/// Where an HTML snippet is spliced.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InjectionLocation {
    #[default]
    BeforeClosingHeadTag,
    BeforeClosingBodyTag,
}

/// An HTML snippet injected into `text/html` responses.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HtmlInjection {
    pub html: String,
    #[serde(default)]
    pub location: InjectionLocation,
}

/// Remote API used to keep the dev server record warm.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ActivityConfig {
    /// API base URL (e.g., "https://api.netlify.com/api/v1").
    pub api_url: String,

    /// Identifier of this dev server session.
    pub dev_server_id: String,

    /// Bearer token for the API.
    #[serde(default)]
    pub token: Option<String>,

    /// Minimum seconds between two pings.
    #[serde(default = "default_activity_interval")]
    pub interval_secs: u64,
}

fn default_activity_interval() -> u64 {
    30
}

/// Request limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum buffered request body in bytes.
    pub max_body_bytes: usize,

    /// Deadline for reading a request body in seconds.
    pub body_timeout_secs: u64,

    /// Total request timeout in seconds.
    pub request_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 6 * 1024 * 1024,
            body_timeout_secs: 30,
            request_secs: 300,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines instead of the human format.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
