mod app;
mod config;
mod routes;
mod services;
mod state;

use std::sync::Arc;

use tokio::signal;
use tracing_subscriber::EnvFilter;
use zonemap_engine::RemoteStore;

use crate::services::remote_store::HttpRemoteStore;
use crate::state::{AppState, build_http_client};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let remote: Option<Arc<dyn RemoteStore>> = match config::remote_store_url() {
        Some(url) => match HttpRemoteStore::new(build_http_client(), &url) {
            Ok(store) => {
                tracing::info!(%url, "remote document store enabled");
                Some(Arc::new(store))
            }
            Err(e) => {
                tracing::error!(error = %e, "invalid REMOTE_STORE_URL");
                return;
            }
        },
        None => {
            tracing::info!("REMOTE_STORE_URL not set; missing geometry will not be fetched");
            None
        }
    };

    let state = AppState::new(remote);
    let plans = state.plans.clone();
    let app = app::build_app(state);

    let addr = format!("0.0.0.0:{}", config::server_port());
    tracing::info!("zonemap server listening on {addr}");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, %addr, "failed to bind TCP listener");
            return;
        }
    };
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "server failed");
    }

    for entry in plans.iter() {
        entry.value().close();
    }
    tracing::info!(plans = plans.len(), "Server shut down gracefully");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                return;
            }
        };
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
