//! Signed proxy tokens (`x-nf-sign`).
//!
//! Rules carrying a signing secret forward an HS256 JWT so the destination can
//! verify the request came through the platform.

use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{encode, EncodingKey, Header};
use serde::Serialize;
use thiserror::Error;

/// Header carrying the signed token.
pub const SIGNATURE_HEADER: &str = "x-nf-sign";

const TOKEN_TTL_SECS: u64 = 5 * 60;

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("could not sign request: {0}")]
    Encode(#[from] jsonwebtoken::errors::Error),
}

#[derive(Debug, Serialize)]
struct SignedClaims<'a> {
    deploy_context: &'a str,
    netlify_id: &'a str,
    site_url: &'a str,
    iss: &'a str,
    exp: u64,
}

/// Mint the token for a signed rule.
pub fn sign_request(secret: &str, site_id: &str, site_url: &str) -> Result<String, SigningError> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let claims = SignedClaims {
        deploy_context: "dev",
        netlify_id: site_id,
        site_url,
        iss: "netlify",
        exp: now + TOKEN_TTL_SECS,
    };
    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

    #[test]
    fn token_verifies_with_the_secret() {
        let token = sign_request("s3cret", "site-1", "https://example.com").unwrap();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&["netlify"]);
        let data = decode::<serde_json::Value>(&token, &DecodingKey::from_secret(b"s3cret"), &validation).unwrap();
        assert_eq!(data.claims["deploy_context"], "dev");
        assert_eq!(data.claims["netlify_id"], "site-1");
        assert_eq!(data.claims["site_url"], "https://example.com");

        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
        let exp = data.claims["exp"].as_u64().unwrap();
        assert!(exp <= now + TOKEN_TTL_SECS && exp + 5 >= now + TOKEN_TTL_SECS);

        assert!(decode::<serde_json::Value>(&token, &DecodingKey::from_secret(b"wrong"), &validation).is_err());
    }
}
