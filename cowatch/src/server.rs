use anyhow::Result;
use cowatch_core::{Config, SessionStore};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP server plus the session store it fronts
pub struct CoWatchServer {
    config: Arc<Config>,
    store: SessionStore,
}

impl CoWatchServer {
    pub const fn new(config: Arc<Config>, store: SessionStore) -> Self {
        Self { config, store }
    }

    /// Serve until SIGINT/SIGTERM, then tear every session down.
    pub async fn start(self) -> Result<()> {
        let shutdown = CancellationToken::new();
        let maintenance = self.store.spawn_maintenance(shutdown.child_token());

        let router = cowatch_api::create_router(self.store.clone(), Arc::clone(&self.config));
        let address = self.config.http_address();
        let listener = tokio::net::TcpListener::bind(&address)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind {address}: {e}"))?;
        info!("HTTP server listening on {}", address);

        let signal = shutdown.clone();
        let served = axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                info!("Shutdown signal received, starting graceful shutdown...");
                signal.cancel();
            });

        // Open WebSockets keep graceful shutdown waiting, so sessions are
        // closed as soon as the signal fires.
        let store = self.store.clone();
        let closer = shutdown.clone();
        let session_closer = tokio::spawn(async move {
            closer.cancelled().await;
            store.shutdown_all().await;
        });

        if let Err(e) = served.await {
            error!("HTTP server error: {}", e);
        }
        shutdown.cancel();

        if tokio::time::timeout(SHUTDOWN_TIMEOUT, session_closer)
            .await
            .is_err()
        {
            warn!("Timed out waiting for sessions to shut down");
        }
        if let Err(e) = maintenance.await {
            warn!("Session maintenance task failed: {}", e);
        }

        info!("CoWatch server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C signal");
            }
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                info!("Received SIGTERM signal");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
