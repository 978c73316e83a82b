//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with a single catch-all handler
//! - Wire up middleware (request id, server header, tracing, timeout)
//! - Bind the plain or TLS listener
//! - Hand every request to the [`Dispatcher`]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderName, HeaderValue, Request},
    response::Response,
    routing::any,
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    set_header::SetResponseHeaderLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::schema::DevConfig;
use crate::routing::context::REQUEST_ID_HEADER;
use crate::routing::Dispatcher;

/// Value of the `Server` header on every response.
const SERVER_NAME: &str = "Netlify";

/// How long in-flight TLS connections get to finish after shutdown.
const TLS_DRAIN: Duration = Duration::from_secs(10);

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub scheme: &'static str,
}

/// HTTP server in front of the dispatcher.
pub struct HttpServer {
    config: DevConfig,
    dispatcher: Arc<Dispatcher>,
}

impl HttpServer {
    pub fn new(config: DevConfig, dispatcher: Arc<Dispatcher>) -> Self {
        Self { config, dispatcher }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    pub fn build_router(&self, scheme: &'static str) -> Router {
        let request_id = HeaderName::from_static(REQUEST_ID_HEADER);
        let state = AppState {
            dispatcher: self.dispatcher.clone(),
            scheme,
        };

        Router::new()
            .route("/{*path}", any(dispatch_handler))
            .route("/", any(dispatch_handler))
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(self.config.limits.request_secs)))
            .layer(TraceLayer::new_for_http())
            .layer(SetResponseHeaderLayer::overriding(
                header::SERVER,
                HeaderValue::from_static(SERVER_NAME),
            ))
            .layer(PropagateRequestIdLayer::new(request_id.clone()))
            .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
    }

    /// Serve plain HTTP until `shutdown` fires.
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self
            .build_router("http")
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Serve HTTPS on `addr` until `shutdown` fires.
    pub async fn run_tls(
        self,
        addr: SocketAddr,
        tls: RustlsConfig,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        tracing::info!(address = %addr, "HTTPS server starting");

        let handle = axum_server::Handle::new();
        let signal = handle.clone();
        tokio::spawn(async move {
            let _ = shutdown.recv().await;
            signal.graceful_shutdown(Some(TLS_DRAIN));
        });

        let app = self
            .build_router("https")
            .into_make_service_with_connect_info::<SocketAddr>();

        axum_server::bind_rustls(addr, tls).handle(handle).serve(app).await?;

        tracing::info!("HTTPS server stopped");
        Ok(())
    }
}

async fn dispatch_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response<Body> {
    state.dispatcher.dispatch(request, peer, state.scheme).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::{ConfiguredRoutesBuilder, FunctionRegistry};
    use crate::routing::RoutingState;
    use crate::rules::RuleSources;
    use axum::http::StatusCode;
    use std::collections::HashMap;
    use tower::ServiceExt;

    fn server(dir: &std::path::Path) -> HttpServer {
        let mut config = DevConfig::default();
        config.site.publish_dir = dir.to_path_buf();
        config.site.project_dir = dir.to_path_buf();
        let rules = Arc::new(RoutingState::load(RuleSources::from_config(&config), HashMap::new()));
        let functions = Arc::new(FunctionRegistry::new(Arc::new(ConfiguredRoutesBuilder::new(HashMap::new()))));
        let dispatcher = Arc::new(Dispatcher::new(&config, rules, functions));
        HttpServer::new(config, dispatcher)
    }

    #[tokio::test]
    async fn responses_carry_server_and_request_id() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<html><body>home</body></html>").unwrap();
        let app = server(dir.path()).build_router("http");

        let mut request = Request::builder().uri("/").body(Body::empty()).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4000))));
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::SERVER], SERVER_NAME);
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
    }

    #[tokio::test]
    async fn incoming_request_id_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let app = server(dir.path()).build_router("http");

        let mut request = Request::builder()
            .uri("/missing")
            .header(REQUEST_ID_HEADER, "req-42")
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4000))));
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[REQUEST_ID_HEADER], "req-42");
    }
}
