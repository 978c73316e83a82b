//! `_headers` parsing and per-path header lookup.
//!
//! ```text
//! /assets/*
//!   Cache-Control: public, max-age=31536000
//! /admin/:page
//!   X-Frame-Options: DENY
//! ```
//!
//! Every entry whose pattern matches contributes its values. Entries are
//! applied in order, so a later entry overwrites an earlier one's key.

use regex::Regex;

use crate::config::schema::HeaderRuleConfig;

/// One `for` block with its header values.
#[derive(Debug, Clone)]
pub struct HeaderRule {
    pub for_path: String,
    pattern: Regex,
    pub values: Vec<(String, String)>,
}

impl HeaderRule {
    pub fn new(for_path: &str, values: Vec<(String, String)>) -> Result<Self, regex::Error> {
        Ok(Self {
            for_path: for_path.to_string(),
            pattern: compile_pattern(for_path)?,
            values,
        })
    }

    pub fn matches(&self, path: &str) -> bool {
        self.pattern.is_match(path)
    }
}

/// Ordered header rules.
#[derive(Debug, Clone, Default)]
pub struct HeaderRules {
    rules: Vec<HeaderRule>,
}

impl HeaderRules {
    pub fn new(rules: Vec<HeaderRule>) -> Self {
        Self { rules }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Headers to add to a response for `path`, later entries winning per key.
    pub fn headers_for_path(&self, path: &str) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = Vec::new();
        for rule in self.rules.iter().filter(|r| r.matches(path)) {
            for (name, value) in &rule.values {
                match out.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
                    Some(slot) => slot.1 = value.clone(),
                    None => out.push((name.clone(), value.clone())),
                }
            }
        }
        out
    }

    pub fn extend(&mut self, other: HeaderRules) {
        self.rules.extend(other.rules);
    }
}

/// Turn a `for` pattern into an anchored regex.
///
/// `*` matches anything including slashes, `:name` matches one segment, and
/// an optional trailing slash is accepted.
pub fn compile_pattern(for_path: &str) -> Result<Regex, regex::Error> {
    let trimmed = if for_path.len() > 1 {
        for_path.trim_end_matches('/')
    } else {
        for_path
    };

    let mut expr = String::from("^");
    let mut chars = trimmed.chars().peekable();
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
    expr.push_str("/?$");
    Regex::new(&expr)
}

/// Parse a `_headers` document. Invalid entries are logged and dropped.
pub fn parse_headers(content: &str, source: &str) -> HeaderRules {
    let mut rules = Vec::new();
    let mut current: Option<(String, Vec<(String, String)>)> = None;

    let flush = |entry: Option<(String, Vec<(String, String)>)>, rules: &mut Vec<HeaderRule>| {
        if let Some((path, values)) = entry {
            if values.is_empty() {
                tracing::warn!(file = %source, path = %path, "Header path has no values");
                return;
            }
            match HeaderRule::new(&path, values) {
                Ok(rule) => rules.push(rule),
                Err(e) => tracing::warn!(file = %source, path = %path, error = %e, "Invalid header path"),
            }
        }
    };

    for (index, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let indented = raw.starts_with(' ') || raw.starts_with('\t');
        if !indented && (line.starts_with('/') || line.starts_with("http")) {
            flush(current.take(), &mut rules);
            current = Some((line.to_string(), Vec::new()));
            continue;
        }

        let Some((_, values)) = current.as_mut() else {
            tracing::warn!(file = %source, line = index + 1, "Header value before any path");
            continue;
        };
        match line.split_once(':') {
            Some((name, value)) if !name.trim().is_empty() => {
                let name = name.trim().to_string();
                let value = value.trim().to_string();
                match values.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(&name)) {
                    Some(slot) => {
                        slot.1.push_str(", ");
                        slot.1.push_str(&value);
                    }
                    None => values.push((name, value)),
                }
            }
            _ => tracing::warn!(file = %source, line = index + 1, "Expected 'Name: value'"),
        }
    }
    flush(current.take(), &mut rules);

    HeaderRules::new(rules)
}

/// Convert inline `[[rules.headers]]` entries.
pub fn from_config(entries: &[HeaderRuleConfig]) -> HeaderRules {
    let rules = entries
        .iter()
        .filter_map(|entry| {
            let mut values: Vec<_> = entry
                .values
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            values.sort();
            match HeaderRule::new(&entry.for_path, values) {
                Ok(rule) => Some(rule),
                Err(e) => {
                    tracing::warn!(path = %entry.for_path, error = %e, "Invalid header path in config");
                    None
                }
            }
        })
        .collect();
    HeaderRules::new(rules)
}
