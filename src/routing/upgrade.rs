//! Protocol upgrades (WebSocket).
//!
//! Upgrades get reduced routing: only the rule matcher runs. An external
//! rule sends the upgrade to the destination origin, anything else goes to
//! the framework server untouched. Once both sides switch protocols the two
//! connections are spliced together.

use std::net::SocketAddr;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Request, Response, StatusCode, Version};
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use url::Url;

use crate::http::forward::{join_origin, ForwardError, Forwarder};
use crate::rules::{Match, MatchRequest, RuleMatcher};

/// Where an upgrade request is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeTarget {
    pub origin: Url,
    pub path_and_query: String,
    /// Destination came from an external rule.
    pub external: bool,
}

/// `Connection: upgrade` together with an `Upgrade` header.
pub fn is_upgrade_request(headers: &HeaderMap) -> bool {
    let connection_upgrade = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
    connection_upgrade && headers.contains_key(header::UPGRADE)
}

/// Pick the upstream for an upgrade.
pub fn upgrade_target(
    matcher: &RuleMatcher,
    request: &MatchRequest,
    path_and_query: &str,
    framework: Option<&Url>,
) -> Option<UpgradeTarget> {
    if let Some(target) = matcher
        .match_request(request)
        .and_then(|m| external_target(&m, request))
    {
        return Some(target);
    }
    framework.map(|origin| UpgradeTarget {
        origin: origin.clone(),
        path_and_query: path_and_query.to_string(),
        external: false,
    })
}

fn external_target(m: &Match, request: &MatchRequest) -> Option<UpgradeTarget> {
    if m.force404 || !m.is_external() {
        return None;
    }
    let base = Url::parse(&format!("{}://{}", request.scheme, request.host)).ok()?;
    let dest = base.join(&m.to).ok()?;
    let mut path_and_query = dest.path().to_string();
    if let Some(query) = dest.query() {
        path_and_query.push('?');
        path_and_query.push_str(query);
    }
    let mut origin = dest;
    origin.set_path("/");
    origin.set_query(None);
    origin.set_fragment(None);
    Some(UpgradeTarget {
        origin,
        path_and_query,
        external: true,
    })
}

/// Forward the upgrade and splice the connections once the upstream agrees.
pub async fn tunnel_request(
    forwarder: &Forwarder,
    target: &UpgradeTarget,
    mut request: Request<Body>,
    peer: SocketAddr,
) -> Result<Response<Body>, ForwardError> {
    let client_upgrade = hyper::upgrade::on(&mut request);
    let (parts, _) = request.into_parts();
    let mut headers = parts.headers;
    if let Ok(value) = HeaderValue::from_str(&peer.ip().to_string()) {
        headers.insert("x-forwarded-for", value);
    }

    if target.external {
        let url = target
            .origin
            .join(&target.path_and_query)
            .map_err(|_| ForwardError::InvalidUri(target.path_and_query.clone()))?;
        headers.remove(header::HOST);
        let response = forwarder
            .external_client()
            .request(parts.method, url)
            .version(Version::HTTP_11)
            .headers(headers)
            .send()
            .await?;

        let status = response.status();
        let mut builder = Response::builder().status(status);
        if let Some(out) = builder.headers_mut() {
            *out = response.headers().clone();
        }
        if status != StatusCode::SWITCHING_PROTOCOLS {
            return Ok(builder.body(Body::from_stream(response.bytes_stream()))?);
        }
        tokio::spawn(async move {
            let client = async { client_upgrade.await.map_err(|e| e.to_string()) };
            let server = async { response.upgrade().await.map_err(|e| e.to_string()) };
            match tokio::try_join!(client, server) {
                Ok((client, mut server)) => splice(TokioIo::new(client), &mut server).await,
                Err(e) => tracing::warn!(error = %e, "Upgrade handshake failed"),
            }
        });
        return Ok(builder.body(Body::empty())?);
    }

    let uri = join_origin(&target.origin, &target.path_and_query)?;
    let mut builder = Request::builder().method(parts.method).uri(uri);
    if let Some(out) = builder.headers_mut() {
        *out = headers;
    }
    let upstream = builder.body(Body::empty())?;
    let mut response = forwarder.local_client().request(upstream).await?;

    if response.status() == StatusCode::SWITCHING_PROTOCOLS {
        let server_upgrade = hyper::upgrade::on(&mut response);
        tokio::spawn(tunnel(client_upgrade, server_upgrade));
    }
    Ok(response.map(Body::new))
}

async fn tunnel(client: OnUpgrade, server: OnUpgrade) {
    match tokio::try_join!(client, server) {
        Ok((client, server)) => splice(TokioIo::new(client), &mut TokioIo::new(server)).await,
        Err(e) => tracing::warn!(error = %e, "Upgrade handshake failed"),
    }
}

async fn splice<A, B>(mut client: A, server: &mut B)
where
    A: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    B: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    match tokio::io::copy_bidirectional(&mut client, server).await {
        Ok((from_client, from_server)) => {
            tracing::debug!(from_client, from_server, "Upgraded connection closed");
        }
        Err(e) => tracing::debug!(error = %e, "Upgraded connection ended with error"),
    }
}
