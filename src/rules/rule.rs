//! Redirect rule and match types.

use crate::config::schema::RedirectConfig;

/// Status used when a rule does not name one.
pub const DEFAULT_STATUS: u16 = 301;

/// Conditions that narrow when a rule applies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conditions {
    pub country: Vec<String>,
    pub language: Vec<String>,
    pub role: Vec<String>,
}

/// A user-authored routing rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    /// Source as written, either a path or an absolute URL.
    pub origin: String,
    /// Path component of `origin`.
    pub path: String,
    /// Host condition derived from an absolute `origin`.
    pub host: Option<String>,
    pub to: String,
    pub status: u16,
    pub force: bool,
    pub conditions: Conditions,
    /// Destination is an external origin fetched transparently.
    pub proxy: bool,
    /// Required query parameters. A `:name` value binds a placeholder.
    pub params: Vec<(String, String)>,
    /// Headers added to the outgoing request.
    pub headers: Vec<(String, String)>,
    /// Environment variable holding the signing secret.
    pub sign: Option<String>,
}

impl Rule {
    /// Build a rule from its source and destination, deriving host and proxy flags.
    pub fn new(origin: &str, to: &str, status: u16, force: bool) -> Self {
        let (host, path) = split_origin(origin);
        let proxy = is_external(to) && status == 200;
        Self {
            origin: origin.to_string(),
            path,
            host,
            to: to.to_string(),
            status,
            force,
            conditions: Conditions::default(),
            proxy,
            params: Vec::new(),
            headers: Vec::new(),
            sign: None,
        }
    }

    /// Build a rule from an inline config entry.
    pub fn from_config(entry: &RedirectConfig) -> Self {
        let mut rule = Rule::new(
            &entry.from,
            &entry.to,
            entry.status.unwrap_or(DEFAULT_STATUS),
            entry.force,
        );
        rule.conditions = Conditions {
            country: entry.conditions.country.clone(),
            language: entry.conditions.language.clone(),
            role: entry.conditions.role.clone(),
        };

        let mut params: Vec<_> = entry.query.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        params.sort();
        rule.params = params;

        let mut headers: Vec<_> = entry.headers.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        headers.sort();
        rule.headers = headers;

        rule.sign = entry.signed.clone();
        rule
    }

    /// Status 300 through 400 inclusive terminates dispatch with a redirect.
    pub fn is_redirect(&self) -> bool {
        is_redirect_status(self.status)
    }
}

/// Result of evaluating the rule set against a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    /// Source pattern of the winning rule.
    pub origin: String,
    /// Destination with placeholders substituted.
    pub to: String,
    pub status: u16,
    pub force: bool,
    /// Status 404 with an empty destination.
    pub force404: bool,
    pub proxy: bool,
    pub proxy_headers: Vec<(String, String)>,
    /// Resolved signing secret value.
    pub signing_secret: Option<String>,
    /// Roles required by the rule. Empty means no JWT gate.
    pub jwt_roles: Vec<String>,
}

impl Match {
    pub fn is_redirect(&self) -> bool {
        is_redirect_status(self.status)
    }

    pub fn is_external(&self) -> bool {
        is_external(&self.to)
    }
}

pub fn is_redirect_status(status: u16) -> bool {
    (300..=400).contains(&status)
}

/// Whether a destination points at another origin.
pub fn is_external(to: &str) -> bool {
    to.starts_with("http://") || to.starts_with("https://")
}

fn split_origin(origin: &str) -> (Option<String>, String) {
    if !is_external(origin) {
        return (None, origin.to_string());
    }
    match url::Url::parse(origin) {
        Ok(url) => (
            url.host_str().map(|h| h.to_lowercase()),
            url.path().to_string(),
        ),
        Err(_) => (None, origin.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_origin_adds_host_condition() {
        let rule = Rule::new("https://Blog.Example.com/posts/*", "/blog/:splat", 301, false);
        assert_eq!(rule.host.as_deref(), Some("blog.example.com"));
        assert_eq!(rule.path, "/posts/*");
    }

    #[test]
    fn external_200_is_proxy() {
        assert!(Rule::new("/api/*", "https://api.example.com/:splat", 200, false).proxy);
        assert!(!Rule::new("/api/*", "https://api.example.com/:splat", 301, false).proxy);
        assert!(!Rule::new("/api/*", "/internal", 200, false).proxy);
    }

    #[test]
    fn redirect_range_is_inclusive() {
        assert!(is_redirect_status(300));
        assert!(is_redirect_status(400));
        assert!(!is_redirect_status(200));
        assert!(!is_redirect_status(404));
    }
}
