//! OS signal handling.
//!
//! SIGINT and SIGTERM stop the proxy. SIGHUP rereads every rule source
//! without restarting.

use std::sync::Arc;

use crate::lifecycle::Shutdown;
use crate::routing::RoutingState;

/// Wait for a termination signal, reloading rules on SIGHUP meanwhile.
pub async fn wait_for_termination(rules: Arc<RoutingState>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (Ok(mut term), Ok(mut hup)) = (signal(SignalKind::terminate()), signal(SignalKind::hangup())) else {
            tracing::warn!("Could not install unix signal handlers; only Ctrl+C is honored");
            let _ = tokio::signal::ctrl_c().await;
            return;
        };

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                _ = term.recv() => break,
                _ = hup.recv() => {
                    tracing::info!("SIGHUP received, reloading rules");
                    rules.reload();
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = &rules;
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Could not listen for Ctrl+C");
        }
    }
}

/// Trigger `shutdown` once a termination signal arrives.
pub async fn shutdown_on_signal(rules: Arc<RoutingState>, shutdown: &Shutdown) {
    wait_for_termination(rules).await;
    tracing::info!("Shutdown signal received");
    shutdown.trigger();
}
