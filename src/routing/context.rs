//! Per-request dispatch state.

use std::net::SocketAddr;

use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use bytes::Bytes;

use crate::http::forward::Outgoing;
use crate::http::response::EtagPolicy;
use crate::rules::Match;

/// Header carrying the request id, also sent upstream.
pub const REQUEST_ID_HEADER: &str = "x-nf-request-id";

/// Mutable state threaded through one dispatch. Dropped with the response.
#[derive(Debug)]
pub struct RequestContext {
    pub method: Method,
    /// URL as received, path and query.
    pub original_url: String,
    /// URL as currently rewritten, path and query.
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub peer: SocketAddr,
    pub scheme: &'static str,
    pub request_id: String,
    /// Pretty-URL candidates still to try when the upstream answers 404/403.
    pub alternative_paths: Vec<String>,
    /// The rule that produced this dispatch, kept for the fallback chain.
    pub pending_rule: Option<Match>,
    /// Status imposed on the final response by a rewrite.
    pub status_override: Option<StatusCode>,
    pub etag_policy: EtagPolicy,
    pub edge_function: bool,
    /// Request resolved to a file in the publish directory.
    pub static_file: bool,
}

impl RequestContext {
    pub fn new(
        method: Method,
        uri: &Uri,
        headers: HeaderMap,
        body: Bytes,
        peer: SocketAddr,
        scheme: &'static str,
    ) -> Self {
        let url = uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());
        let request_id = headers
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string();
        Self {
            method,
            original_url: url.clone(),
            url,
            headers,
            body,
            peer,
            scheme,
            request_id,
            alternative_paths: Vec::new(),
            pending_rule: None,
            status_override: None,
            etag_policy: EtagPolicy::Disabled,
            edge_function: false,
            static_file: false,
        }
    }

    /// Path of the current URL.
    pub fn path(&self) -> &str {
        self.url.split('?').next().unwrap_or(&self.url)
    }

    /// Query of the current URL, without `?`.
    pub fn query(&self) -> Option<&str> {
        self.url.split_once('?').map(|(_, q)| q)
    }

    /// Query of the URL as received, with `?`, or empty.
    pub fn original_search(&self) -> &str {
        self.original_url
            .find('?')
            .map(|i| &self.original_url[i..])
            .unwrap_or("")
    }

    pub fn original_path(&self) -> &str {
        self.original_url.split('?').next().unwrap_or(&self.original_url)
    }

    pub fn host(&self) -> &str {
        self.headers
            .get(header::HOST)
            .and_then(|h| h.to_str().ok())
            .unwrap_or("localhost")
    }

    pub fn set_header(&mut self, name: &str, value: &str) {
        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => tracing::warn!(header = %name, "Skipping invalid request header"),
        }
    }

    pub fn accepts_html(&self) -> bool {
        self.headers
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("text/html"))
    }

    /// `application/x-www-form-urlencoded` or `multipart/form-data` POST.
    pub fn is_form_post(&self) -> bool {
        if self.method != Method::POST {
            return false;
        }
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| {
                ct.starts_with("application/x-www-form-urlencoded") || ct.starts_with("multipart/form-data")
            })
    }

    /// Snapshot for sending to `path_and_query`.
    pub fn outgoing(&self, path_and_query: &str) -> Outgoing {
        let mut headers = self.headers.clone();
        if let Ok(value) = HeaderValue::from_str(&self.peer.ip().to_string()) {
            headers.insert("x-forwarded-for", value);
        }
        Outgoing {
            method: self.method.clone(),
            path_and_query: path_and_query.to_string(),
            headers,
            body: self.body.clone(),
        }
    }
}
