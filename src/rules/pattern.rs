//! Path patterns used by redirect rules.
//!
//! A pattern is a slash separated list of segments:
//! - a literal segment compares case-insensitively
//! - `:name` captures exactly one segment
//! - a trailing `*` captures zero or more segments, bound as `splat`
//!
//! A trailing slash on either the pattern or the path is ignored.

use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// A compiled rule path.
#[derive(Debug, Clone)]
pub struct PathPattern {
    segments: Vec<Segment>,
    splat: bool,
}

/// Placeholder values captured during a match.
pub type Captures = HashMap<String, String>;

impl PathPattern {
    /// Compile a pattern from its textual form.
    pub fn parse(pattern: &str) -> Self {
        let mut segments = Vec::new();
        let mut splat = false;

        let parts: Vec<&str> = split_segments(pattern).collect();
        for (i, part) in parts.iter().enumerate() {
            if *part == "*" && i == parts.len() - 1 {
                splat = true;
            } else if let Some(name) = part.strip_prefix(':').filter(|n| !n.is_empty()) {
                segments.push(Segment::Param(name.to_string()));
            } else {
                segments.push(Segment::Literal(part.to_lowercase()));
            }
        }

        Self { segments, splat }
    }

    /// Match a decoded request path, returning the captured placeholders.
    pub fn captures(&self, path: &str) -> Option<Captures> {
        let parts: Vec<&str> = split_segments(path).collect();

        if parts.len() < self.segments.len() {
            return None;
        }
        if !self.splat && parts.len() != self.segments.len() {
            return None;
        }

        let mut captures = Captures::new();
        for (segment, part) in self.segments.iter().zip(parts.iter()) {
            match segment {
                Segment::Literal(lit) => {
                    if !lit.eq_ignore_ascii_case(part) {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    captures.insert(name.clone(), (*part).to_string());
                }
            }
        }

        if self.splat {
            captures.insert("splat".to_string(), parts[self.segments.len()..].join("/"));
        }

        Some(captures)
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.captures(path).is_some()
    }
}

fn split_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Replace `:name` placeholders in a destination with captured values.
///
/// Unknown placeholders are left untouched. A placeholder must start with an
/// ASCII letter so port numbers in absolute URLs survive.
pub fn substitute(template: &str, captures: &Captures) -> String {
    let bytes = template.as_bytes();
    let mut out = String::with_capacity(template.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b':' && i + 1 < bytes.len() && bytes[i + 1].is_ascii_alphabetic() {
            let start = i + 1;
            let mut end = start;
            while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
                end += 1;
            }
            let name = &template[start..end];
            match captures.get(name) {
                Some(value) => out.push_str(value),
                None => out.push_str(&template[i..end]),
            }
            i = end;
        } else {
            let ch = template[i..].chars().next().unwrap_or_default();
            out.push(ch);
            i += ch.len_utf8().max(1);
        }
    }

    out
}
