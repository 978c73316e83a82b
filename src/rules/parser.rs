//! `_redirects` file parser.
//!
//! Each non-comment line reads:
//!
//! ```text
//! <from> [<param>=<value> ...] <to> [<status>[!]] [Country=a,b] [Language=a,b] [Role=a,b] [Sign=VAR]
//! ```
//!
//! A destination may be omitted when the status follows `from` directly
//! (`/secret 404`). Invalid lines are logged and dropped.

use crate::rules::rule::{Rule, DEFAULT_STATUS};

/// Parse a whole `_redirects` document. `source` names the file in log lines.
pub fn parse_redirects(content: &str, source: &str) -> Vec<Rule> {
    content
        .lines()
        .enumerate()
        .filter_map(|(index, line)| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            match parse_line(line) {
                Ok(rule) => Some(rule),
                Err(reason) => {
                    tracing::warn!(
                        file = %source,
                        line = index + 1,
                        reason = %reason,
                        "Skipping invalid redirect rule"
                    );
                    None
                }
            }
        })
        .collect()
}

fn parse_line(line: &str) -> Result<Rule, String> {
    let line = line.split(" #").next().unwrap_or(line);
    let mut tokens = line.split_whitespace().peekable();

    let from = tokens.next().ok_or("missing source path")?;
    if !(from.starts_with('/') || from.starts_with("http://") || from.starts_with("https://")) {
        return Err(format!("source '{}' must be a path or absolute URL", from));
    }

    let mut params = Vec::new();
    while let Some(token) = tokens.peek() {
        if is_destination(token) || parse_status(token).is_some() {
            break;
        }
        let (key, value) = token
            .split_once('=')
            .ok_or_else(|| format!("unexpected token '{}'", token))?;
        params.push((key.to_string(), value.to_string()));
        tokens.next();
    }

    let to = match tokens.peek() {
        Some(token) if is_destination(token) => {
            let to = token.to_string();
            tokens.next();
            to
        }
        Some(_) => String::new(),
        None => return Err("missing destination".to_string()),
    };

    let (status, force) = match tokens.peek().and_then(|t| parse_status(t)) {
        Some(parsed) => {
            tokens.next();
            parsed
        }
        None => (DEFAULT_STATUS, false),
    };

    if to.is_empty() && status != 404 {
        return Err("missing destination".to_string());
    }

    let mut rule = Rule::new(from, &to, status, force);
    rule.params = params;

    for token in tokens {
        let (key, value) = token
            .split_once('=')
            .ok_or_else(|| format!("unexpected token '{}'", token))?;
        let values = || value.split(',').map(str::to_string).filter(|v| !v.is_empty()).collect();
        match key.to_ascii_lowercase().as_str() {
            "country" => rule.conditions.country = values(),
            "language" => rule.conditions.language = values(),
            "role" => rule.conditions.role = values(),
            "sign" | "signed" => rule.sign = Some(value.to_string()),
            _ => return Err(format!("unknown condition '{}'", key)),
        }
    }

    Ok(rule)
}

fn is_destination(token: &str) -> bool {
    token.starts_with('/') || token.starts_with("http://") || token.starts_with("https://")
}

fn parse_status(token: &str) -> Option<(u16, bool)> {
    let (digits, force) = match token.strip_suffix('!') {
        Some(d) => (d, true),
        None => (token, false),
    };
    if digits.len() != 3 {
        return None;
    }
    digits.parse::<u16>().ok().map(|status| (status, force))
}
