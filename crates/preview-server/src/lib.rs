pub mod error;
pub mod lifecycle;
pub mod pages;
pub mod proxy;
pub mod recovery;
pub mod routes;
pub mod state;
pub mod supervisor;

use std::future::Future;
use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use preview_core::config::{ServerConfig, WarnLevel};
use preview_core::fetch::GitFetcher;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the axum Router: management endpoints, subdomain dispatch in front
/// of them, and the proxy router as fallback.
/// Used by `serve()` and available for integration testing.
pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(routes::health::healthz))
        .route("/deploy", post(routes::deployments::create_deployment))
        .route("/deployments", get(routes::deployments::list_deployments))
        .route(
            "/{id}",
            get(routes::deployments::get_deployment).delete(routes::deployments::delete_deployment),
        )
        .fallback(proxy::fallback)
        .layer(middleware::from_fn_with_state(
            app_state.clone(),
            proxy::host_dispatch,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

/// Run the preview service with a git-backed fetcher on `config.listen_port`
/// until Ctrl-C or SIGTERM.
pub async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    let fetcher = GitFetcher::new(config.fetch_timeout())?;
    let app_state = AppState::new(config, Arc::new(fetcher))?;
    let addr = format!("0.0.0.0:{}", app_state.config.listen_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    serve_on(listener, app_state, shutdown_signal()).await
}

/// Run on a pre-bound listener until `shutdown` resolves.
///
/// Recovery is submitted before the listener starts accepting. On shutdown
/// in-flight orchestrations get `shutdown_grace_secs` to finish, then every
/// supervised process is signalled; records are left as they are so the
/// next start recovers them.
pub async fn serve_on(
    listener: tokio::net::TcpListener,
    app_state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    for w in app_state.config.validate() {
        match w.level {
            WarnLevel::Error => tracing::error!("config: {}", w.message),
            WarnLevel::Warning => tracing::warn!("config: {}", w.message),
        }
    }

    recovery::recover(&app_state.lifecycle)?;

    let actual_port = listener.local_addr()?.port();
    let app = build_router(app_state.clone());
    tracing::info!("previewd listening on http://localhost:{actual_port}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("shutting down");
    app_state
        .lifecycle
        .drain(app_state.config.shutdown_grace())
        .await;
    let signalled = app_state.supervisor.shutdown();
    tracing::info!(signalled, "preview servers signalled");
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
