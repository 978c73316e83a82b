//! Dev server liveness pings.
//!
//! GET traffic keeps the remote dev server record warm. Pings are throttled
//! on the leading edge and sent in the background; the request being served
//! never waits for them.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use axum::http::Method;

use crate::config::schema::ActivityConfig;

pub struct ActivityNotifier {
    endpoint: String,
    token: Option<String>,
    interval: Duration,
    client: reqwest::Client,
    last_sent: Mutex<Option<Instant>>,
}

impl ActivityNotifier {
    pub fn from_config(site_id: &str, config: &ActivityConfig, client: reqwest::Client) -> Self {
        let endpoint = format!(
            "{}/sites/{}/dev_servers/{}/activity",
            config.api_url.trim_end_matches('/'),
            site_id,
            config.dev_server_id
        );
        Self {
            endpoint,
            token: config.token.clone(),
            interval: Duration::from_secs(config.interval_secs),
            client,
            last_sent: Mutex::new(None),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Record a served request. Returns whether a ping was started.
    pub fn notify(&self, method: &Method) -> bool {
        if method != Method::GET || !self.claim(Instant::now()) {
            return false;
        }

        let mut request = self.client.post(&self.endpoint);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let endpoint = self.endpoint.clone();
        tokio::spawn(async move {
            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    tracing::debug!(endpoint = %endpoint, "Sent dev server activity");
                }
                Ok(response) => {
                    tracing::warn!(endpoint = %endpoint, status = %response.status(), "Activity ping rejected");
                }
                Err(e) => {
                    tracing::warn!(endpoint = %endpoint, error = %e, "Could not send activity ping");
                }
            }
        });
        true
    }

    fn claim(&self, now: Instant) -> bool {
        let Ok(mut last) = self.last_sent.lock() else {
            return false;
        };
        match *last {
            Some(sent) if now.duration_since(sent) < self.interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}
