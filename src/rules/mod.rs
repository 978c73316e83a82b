//! Rule subsystem: redirects, rewrites, proxies and custom headers.
//!
//! # Data Flow
//! ```text
//! _redirects files ─┐
//! [[rules.redirects]] ┴→ parser.rs → Vec<Rule> → matcher.rs (RuleMatcher)
//!
//! _headers files ───┐
//! [[rules.headers]] ─┴→ headers.rs → HeaderRules
//!
//! Request → MatchRequest → RuleMatcher::match_request → Option<Match>
//!                                 → jwt.rs gate when the match carries roles
//! ```
//!
//! # Design Decisions
//! - File rules come before inline config rules
//! - Parsing is lenient: invalid entries are logged and skipped
//! - Compiled rule sets are immutable; reload builds a new one

pub mod headers;
pub mod jwt;
pub mod matcher;
pub mod parser;
pub mod pattern;
pub mod rule;

use std::path::{Path, PathBuf};

use crate::config::schema::{DevConfig, HeaderRuleConfig, RedirectConfig};

pub use headers::HeaderRules;
pub use jwt::JwtOutcome;
pub use matcher::{MatchRequest, RuleMatcher};
pub use rule::{Match, Rule};

pub const REDIRECTS_FILE: &str = "_redirects";
pub const HEADERS_FILE: &str = "_headers";

/// Everywhere rules are read from.
#[derive(Debug, Clone, Default)]
pub struct RuleSources {
    redirect_files: Vec<PathBuf>,
    header_files: Vec<PathBuf>,
    inline_redirects: Vec<RedirectConfig>,
    inline_headers: Vec<HeaderRuleConfig>,
}

impl RuleSources {
    pub fn from_config(config: &DevConfig) -> Self {
        let dirs = dedup_dirs(&[&config.site.publish_dir, &config.site.project_dir]);
        Self {
            redirect_files: dirs.iter().map(|d| d.join(REDIRECTS_FILE)).collect(),
            header_files: dirs.iter().map(|d| d.join(HEADERS_FILE)).collect(),
            inline_redirects: config.rules.redirects.clone(),
            inline_headers: config.rules.headers.clone(),
        }
    }

    /// Files worth watching for changes.
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.redirect_files
            .iter()
            .chain(self.header_files.iter())
            .cloned()
            .collect()
    }

    /// Read every redirect source in precedence order.
    pub fn load_rules(&self) -> Vec<Rule> {
        let mut rules = Vec::new();
        for path in &self.redirect_files {
            if let Some(content) = read_optional(path) {
                rules.extend(parser::parse_redirects(&content, &path.display().to_string()));
            }
        }
        rules.extend(self.inline_redirects.iter().map(Rule::from_config));
        rules
    }

    /// Read every header source in precedence order.
    pub fn load_headers(&self) -> HeaderRules {
        let mut rules = HeaderRules::default();
        for path in &self.header_files {
            if let Some(content) = read_optional(path) {
                rules.extend(headers::parse_headers(&content, &path.display().to_string()));
            }
        }
        rules.extend(headers::from_config(&self.inline_headers));
        rules
    }
}

fn read_optional(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => Some(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            tracing::warn!(path = ?path, error = %e, "Could not read rule file");
            None
        }
    }
}

fn dedup_dirs(dirs: &[&Path]) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = Vec::new();
    for dir in dirs {
        let canonical = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
        if !out.contains(&canonical) {
            out.push(canonical);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn files_precede_inline_rules_and_dirs_are_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(REDIRECTS_FILE), "/a /from-file\n").unwrap();
        std::fs::write(dir.path().join(HEADERS_FILE), "/*\n  X-Test: 1\n").unwrap();

        let mut config = DevConfig::default();
        config.site.publish_dir = dir.path().to_path_buf();
        config.site.project_dir = dir.path().to_path_buf();
        config.rules.redirects.push(RedirectConfig {
            from: "/a".into(),
            to: "/from-config".into(),
            ..Default::default()
        });

        let sources = RuleSources::from_config(&config);
        let rules = sources.load_rules();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].to, "/from-file");
        assert_eq!(rules[1].to, "/from-config");

        assert_eq!(sources.load_headers().len(), 1);
        assert_eq!(sources.watched_paths().len(), 2);
    }
}
