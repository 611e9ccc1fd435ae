use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, routing::get, routing::post};
use tokio::net::TcpListener;
use tower_http::decompression::RequestDecompressionLayer;
use tracing::info;

use super::{
    services::{create_post, delete_post, drain, get_post, health, list_posts, prune},
    state::AppState,
};
use crate::config::Config;
use crate::lifecycle::{Lifecycle, Schedule, scheduler};
use crate::observability::Metrics;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Build the HTTP router over an existing state
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/posts", post(create_post).get(list_posts))
        .route("/posts/{post_id}", get(get_post).delete(delete_post))
        .route("/operators/prune", post(prune))
        .route("/operators/drain", post(drain))
        .route("/operators/health", get(health))
        .route("/health", get(health))
        .with_state(state)
        // Handles Content-Encoding on request bodies before handlers see them
        .layer(RequestDecompressionLayer::new())
}

/// Serve the API until Ctrl+C or SIGTERM, running the sweep scheduler alongside
pub async fn run(config: Config, address: Option<SocketAddr>) -> Result<(), AnyError> {
    let address = address.unwrap_or(config.server.bind_addr);

    info!(
        posts = %config.server.fjall_path.display(),
        queue = %config.server.queue_path.display(),
        "Opening stores"
    );
    let lifecycle = Lifecycle::open(&config).map_err(|e| format!("Failed to open stores: {e}"))?;
    let metrics = Arc::new(Metrics::new());

    let scheduler = if config.sweep.schedule_enabled {
        Some(scheduler::spawn(
            lifecycle.prune.clone(),
            lifecycle.drain.clone(),
            metrics.clone(),
            Schedule {
                prune_every: config.sweep.prune_interval.as_duration(),
                drain_every: config.sweep.drain_interval.as_duration(),
            },
        ))
    } else {
        info!("Sweep scheduler disabled, prune and drain run only on request");
        None
    };

    let state = AppState::new(config, lifecycle.clone(), metrics);
    let app = router(state);

    let listener = TcpListener::bind(address).await?;
    info!(%address, "Sweepbox API listening");

    let served = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await;

    if let Some(handle) = scheduler {
        handle.abort();
    }
    if let Err(e) = lifecycle.store.persist() {
        tracing::warn!(error = %e, "Failed to persist post store on shutdown");
    }
    if let Err(e) = lifecycle.queue.flush() {
        tracing::warn!(error = %e, "Failed to flush deletion queue on shutdown");
    }

    served?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate())
            .expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
