//! Response post-processing.
//!
//! # Responsibilities
//! - Apply header rules and the rule status override
//! - Generate weak ETags and answer conditional requests with 304
//! - Splice configured snippets into HTML documents
//! - Render uncaught edge function errors
//!
//! # Design Decisions
//! - Responses without `Content-Length` are streamed through untouched;
//!   buffering would break streaming and the rewrites need the full body
//! - Injection decodes and re-encodes with the upstream's own encoding

use axum::body::Body;
use axum::http::{header, HeaderName, HeaderValue, Response, StatusCode};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::config::schema::{HtmlInjection, InjectionLocation};
use crate::http::encoding::{self, ContentEncoding};

/// Upstream header flagging an uncaught edge function error.
pub const UNCAUGHT_ERROR_HEADER: &str = "x-nf-uncaught-error";

const ERROR_TEMPLATE: &str = include_str!("../../templates/function-error.html");

/// Which statuses get an ETag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EtagPolicy {
    #[default]
    Disabled,
    /// Default upstream traffic: 2xx only.
    SuccessOnly,
    /// Rule-driven traffic: anything but 300-399.
    NotRedirect,
}

impl EtagPolicy {
    pub fn accepts(&self, status: StatusCode) -> bool {
        match self {
            EtagPolicy::Disabled => false,
            EtagPolicy::SuccessOnly => status.is_success(),
            EtagPolicy::NotRedirect => !(300..400).contains(&status.as_u16()),
        }
    }
}

/// Weak ETag over a buffered body: `W/"<len hex>-<sha256 base64 prefix>"`.
pub fn weak_etag(body: &[u8]) -> String {
    let digest = STANDARD.encode(Sha256::digest(body));
    format!("W/\"{:x}-{}\"", body.len(), &digest[..27])
}

/// Splice every snippet into the document.
///
/// Each snippet goes before the first `</head>` or `</body>`; documents
/// without the tag are left unchanged for that snippet.
pub fn inject_html(html: &str, injections: &[HtmlInjection]) -> String {
    let mut out = html.to_string();
    for injection in injections {
        let tag = match injection.location {
            InjectionLocation::BeforeClosingHeadTag => "</head>",
            InjectionLocation::BeforeClosingBodyTag => "</body>",
        };
        if let Some(index) = out.find(tag) {
            out.insert_str(index, &injection.html);
        }
    }
    out
}

/// Inputs decided by the dispatcher.
#[derive(Debug, Default)]
pub struct PostProcess<'a> {
    /// Header rules matching the final request path.
    pub header_rules: Vec<(String, String)>,
    pub status_override: Option<StatusCode>,
    pub etag_policy: EtagPolicy,
    pub if_none_match: Option<String>,
    pub edge_function: bool,
    pub accepts_html: bool,
    pub injections: &'a [HtmlInjection],
}

/// Rewrite an upstream response before it reaches the client.
pub async fn post_process(response: Response<Body>, opts: PostProcess<'_>) -> Response<Body> {
    let (mut parts, body) = response.into_parts();

    for (name, value) in &opts.header_rules {
        match (HeaderName::try_from(name.as_str()), HeaderValue::try_from(value.as_str())) {
            (Ok(name), Ok(value)) => {
                parts.headers.insert(name, value);
            }
            _ => tracing::warn!(header = %name, "Skipping invalid header rule value"),
        }
    }
    if let Some(status) = opts.status_override {
        parts.status = status;
    }

    let uncaught = opts.edge_function
        && parts
            .headers
            .get(UNCAUGHT_ERROR_HEADER)
            .is_some_and(|v| v.as_bytes() == b"1");

    let is_html = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("text/html"));
    let inject = is_html && !opts.injections.is_empty();

    if !uncaught && !parts.headers.contains_key(header::CONTENT_LENGTH) {
        return Response::from_parts(parts, body);
    }
    if !uncaught && !inject && opts.etag_policy == EtagPolicy::Disabled {
        return Response::from_parts(parts, body);
    }

    let mut bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(error = %e, "Failed to read upstream response body");
            return plain_error(StatusCode::INTERNAL_SERVER_ERROR, "Could not proxy request.");
        }
    };

    let encoding = parts
        .headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    if uncaught {
        let decoded = match ContentEncoding::parse(encoding.as_deref()) {
            Ok(enc) => encoding::decode(enc, bytes.clone()).await.unwrap_or(bytes),
            Err(_) => bytes,
        };
        return render_edge_error(&decoded, opts.accepts_html);
    }

    if inject {
        match inject_encoded(bytes.clone(), encoding.as_deref(), opts.injections).await {
            Ok(injected) => {
                bytes = injected;
                parts.headers.remove(header::TRANSFER_ENCODING);
            }
            Err(e) => tracing::warn!(error = %e, "Skipping HTML injection"),
        }
    }

    if opts.etag_policy.accepts(parts.status) {
        let etag = weak_etag(&bytes);
        let not_modified = opts.if_none_match.as_deref() == Some(etag.as_str());
        if let Ok(value) = HeaderValue::from_str(&etag) {
            parts.headers.insert(header::ETAG, value);
        }
        if not_modified {
            parts.status = StatusCode::NOT_MODIFIED;
            parts.headers.remove(header::CONTENT_LENGTH);
            return Response::from_parts(parts, Body::empty());
        }
    }

    parts.headers.insert(header::CONTENT_LENGTH, HeaderValue::from(bytes.len()));
    Response::from_parts(parts, Body::from(bytes))
}

async fn inject_encoded(
    body: Bytes,
    encoding: Option<&str>,
    injections: &[HtmlInjection],
) -> Result<Bytes, encoding::EncodingError> {
    let enc = ContentEncoding::parse(encoding)?;
    let decoded = encoding::decode(enc, body).await?;
    let html = String::from_utf8_lossy(&decoded);
    let injected = inject_html(&html, injections);
    encoding::encode(enc, Bytes::from(injected)).await
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetails,
}

#[derive(Debug, Deserialize)]
struct ErrorDetails {
    #[serde(default)]
    name: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    stack: String,
}

/// Render an edge function error envelope as HTML or JSON, always with 500.
pub fn render_edge_error(body: &[u8], accepts_html: bool) -> Response<Body> {
    let details = match serde_json::from_slice::<ErrorEnvelope>(body) {
        Ok(envelope) => envelope.error,
        Err(e) => {
            tracing::warn!(error = %e, "Edge function error payload is not a valid envelope");
            ErrorDetails {
                name: "Error".to_string(),
                message: String::from_utf8_lossy(body).into_owned(),
                stack: String::new(),
            }
        }
    };
    tracing::error!(
        error_type = %details.name,
        message = %details.message,
        "Uncaught error in edge function"
    );

    let trace: Vec<&str> = details.stack.split('\n').collect();
    let (content_type, rendered) = if accepts_html {
        let html = ERROR_TEMPLATE
            .replace("{{kind}}", "edge function")
            .replace("{{errorType}}", &escape_html(&details.name))
            .replace("{{errorMessage}}", &escape_html(&details.message))
            .replace("{{trace}}", &escape_html(&details.stack));
        ("text/html; charset=utf-8", html)
    } else {
        let json = serde_json::json!({
            "errorType": details.name,
            "errorMessage": details.message,
            "trace": trace,
        });
        ("application/json", json.to_string())
    };

    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, rendered.len())
        .body(Body::from(rendered))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

/// A `text/plain` response with the given status.
pub fn plain_error(status: StatusCode, message: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(message));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn html_response(body: &'static str) -> Response<Body> {
        Response::builder()
            .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
            .header(header::CONTENT_LENGTH, body.len())
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_of(response: Response<Body>) -> Bytes {
        axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap()
    }

    fn snippet(html: &str, location: InjectionLocation) -> HtmlInjection {
        HtmlInjection {
            html: html.to_string(),
            location,
        }
    }

    #[test]
    fn etag_is_weak_and_stable() {
        let a = weak_etag(b"hello world");
        assert_eq!(a, weak_etag(b"hello world"));
        assert!(a.starts_with("W/\"b-"));
        assert_ne!(a, weak_etag(b"hello worle"));
    }

    #[test]
    fn etag_policies() {
        assert!(EtagPolicy::SuccessOnly.accepts(StatusCode::OK));
        assert!(!EtagPolicy::SuccessOnly.accepts(StatusCode::NOT_FOUND));
        assert!(EtagPolicy::NotRedirect.accepts(StatusCode::NOT_FOUND));
        assert!(!EtagPolicy::NotRedirect.accepts(StatusCode::MOVED_PERMANENTLY));
        assert!(!EtagPolicy::Disabled.accepts(StatusCode::OK));
    }

    #[test]
    fn injects_before_first_closing_tag() {
        let html = "<html><head></head><body></body></html>";
        let out = inject_html(
            html,
            &[
                snippet("<script>h</script>", InjectionLocation::BeforeClosingHeadTag),
                snippet("<div>b</div>", InjectionLocation::BeforeClosingBodyTag),
            ],
        );
        assert_eq!(
            out,
            "<html><head><script>h</script></head><body><div>b</div></body></html>"
        );
    }

    #[tokio::test]
    async fn zero_injections_leave_the_response_identical() {
        let original = "<html><head></head><body>x</body></html>";
        let response = post_process(html_response(original), PostProcess::default()).await;
        assert_eq!(
            response.headers()[header::CONTENT_LENGTH],
            original.len().to_string().as_str()
        );
        assert_eq!(body_of(response).await, original.as_bytes());
    }

    #[tokio::test]
    async fn injection_round_trips_through_gzip() {
        let html = "<html><head></head><body></body></html>";
        let packed = encoding::encode(ContentEncoding::Gzip, Bytes::from_static(html.as_bytes()))
            .await
            .unwrap();
        let response = Response::builder()
            .header(header::CONTENT_TYPE, "text/html")
            .header(header::CONTENT_ENCODING, "gzip")
            .header(header::CONTENT_LENGTH, packed.len())
            .body(Body::from(packed))
            .unwrap();

        let injections = [snippet("<x/>", InjectionLocation::BeforeClosingHeadTag)];
        let out = post_process(
            response,
            PostProcess {
                injections: &injections,
                ..Default::default()
            },
        )
        .await;

        let length: usize = out.headers()[header::CONTENT_LENGTH].to_str().unwrap().parse().unwrap();
        let body = body_of(out).await;
        assert_eq!(length, body.len());
        let plain = encoding::decode(ContentEncoding::Gzip, body).await.unwrap();
        assert_eq!(plain, "<html><head><x/></head><body></body></html>".as_bytes());
    }

    #[tokio::test]
    async fn matching_if_none_match_yields_304_with_etag() {
        let body = "<p>cached</p>";
        let etag = weak_etag(body.as_bytes());
        let response = post_process(
            html_response(body),
            PostProcess {
                etag_policy: EtagPolicy::SuccessOnly,
                if_none_match: Some(etag.clone()),
                ..Default::default()
            },
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
        assert_eq!(response.headers()[header::ETAG], etag.as_str());
        assert!(body_of(response).await.is_empty());
    }

    #[tokio::test]
    async fn streamed_responses_pass_through() {
        let response = Response::builder()
            .header(header::CONTENT_TYPE, "text/html")
            .body(Body::from("<head></head>"))
            .unwrap();
        let injections = [snippet("<x/>", InjectionLocation::BeforeClosingHeadTag)];
        let out = post_process(
            response,
            PostProcess {
                injections: &injections,
                etag_policy: EtagPolicy::SuccessOnly,
                header_rules: vec![("x-rule".into(), "1".into())],
                ..Default::default()
            },
        )
        .await;
        assert!(out.headers().get(header::ETAG).is_none());
        assert_eq!(out.headers()["x-rule"], "1");
        assert_eq!(body_of(out).await, "<head></head>".as_bytes());
    }

    #[tokio::test]
    async fn uncaught_edge_errors_render_json_or_html() {
        let envelope = r#"{"error":{"name":"TypeError","message":"boom","stack":"at a\nat b"}}"#;
        let upstream = || {
            Response::builder()
                .header(UNCAUGHT_ERROR_HEADER, "1")
                .header(header::CONTENT_LENGTH, envelope.len())
                .body(Body::from(envelope))
                .unwrap()
        };

        let json = post_process(
            upstream(),
            PostProcess {
                edge_function: true,
                ..Default::default()
            },
        )
        .await;
        assert_eq!(json.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let value: serde_json::Value = serde_json::from_slice(&body_of(json).await).unwrap();
        assert_eq!(value["errorType"], "TypeError");
        assert_eq!(value["errorMessage"], "boom");
        assert_eq!(value["trace"], serde_json::json!(["at a", "at b"]));

        let html = post_process(
            upstream(),
            PostProcess {
                edge_function: true,
                accepts_html: true,
                ..Default::default()
            },
        )
        .await;
        assert_eq!(html.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = String::from_utf8(body_of(html).await.to_vec()).unwrap();
        assert!(body.contains("TypeError"));
        assert!(body.contains("boom"));
    }

    #[tokio::test]
    async fn status_override_applies() {
        let out = post_process(
            html_response("ok"),
            PostProcess {
                status_override: Some(StatusCode::ACCEPTED),
                ..Default::default()
            },
        )
        .await;
        assert_eq!(out.status(), StatusCode::ACCEPTED);
    }
}
