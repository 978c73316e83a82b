//! Role gate for rules carrying a `Role` condition.
//!
//! The `nf_jwt` cookie is decoded without signature verification. Tokens are
//! minted by the identity service in production; locally only their claims
//! matter for routing.

use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde_json::Value;

/// Cookie carrying the identity token.
pub const JWT_COOKIE: &str = "nf_jwt";

/// Body returned when the token cannot be interpreted.
pub const INVALID_JWT_MESSAGE: &str = "Invalid JWT provided. Please see logs for more info.";

/// Outcome of the role gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JwtOutcome {
    Allowed,
    /// Missing, expired or insufficient token. The request is rerouted.
    Denied,
    /// Undecodable token or non-array role claim. The request is rejected.
    Malformed,
}

/// Evaluate a token against the roles a rule requires.
pub fn evaluate(token: Option<&str>, required_roles: &[String], role_path: &str) -> JwtOutcome {
    let Some(token) = token.filter(|t| !t.is_empty()) else {
        return JwtOutcome::Denied;
    };

    let claims = match decode_claims(token) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::warn!(error = %e, "Could not decode JWT from nf_jwt cookie");
            return JwtOutcome::Malformed;
        }
    };

    if is_expired(&claims) {
        tracing::warn!("Expired JWT provided in request");
        return JwtOutcome::Denied;
    }

    let roles = match lookup(&claims, role_path) {
        None => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(other) => {
            tracing::warn!(role_path = %role_path, claim = %other, "JWT role claim is not an array");
            return JwtOutcome::Malformed;
        }
    };

    let allowed = required_roles
        .iter()
        .map(|r| r.trim_start_matches(':'))
        .any(|required| roles.iter().any(|role| role == required));

    if allowed {
        JwtOutcome::Allowed
    } else {
        JwtOutcome::Denied
    }
}

fn decode_claims(token: &str) -> Result<Value, jsonwebtoken::errors::Error> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    decode::<Value>(token, &DecodingKey::from_secret(&[]), &validation).map(|data| data.claims)
}

fn is_expired(claims: &Value) -> bool {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    match claims.get("exp").and_then(Value::as_f64) {
        Some(exp) => exp < now as f64,
        None => true,
    }
}

fn lookup<'a>(claims: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|p| !p.is_empty())
        .try_fold(claims, |value, key| value.get(key))
}
