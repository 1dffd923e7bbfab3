use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::handlers;
use crate::middleware::ip_gate;
use crate::state::AppState;

/// Builds the panel router. Every route, `/health` included, sits behind the IP gate.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route(
            "/api/users",
            get(handlers::list_users).post(handlers::create_user),
        )
        .route(
            "/api/users/:id",
            get(handlers::get_user).delete(handlers::delete_user),
        )
        .route("/api/users/:id/block", post(handlers::block_user))
        .route("/api/users/:id/unblock", post(handlers::unblock_user))
        .route("/api/login", post(handlers::login))
        .route(
            "/api/settings",
            get(handlers::get_settings).post(handlers::update_settings),
        )
        .route("/api/statistics", get(handlers::get_statistics))
        .route(
            "/api/blocked-ips",
            get(handlers::list_blocked_ips).post(handlers::block_ip),
        )
        .route("/api/blocked-ips/:ip", delete(handlers::unblock_ip))
        .layer(middleware::from_fn_with_state(state.clone(), ip_gate))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves the router until Ctrl-C. On unix, SIGHUP reloads the record file.
pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    #[cfg(unix)]
    tokio::spawn(reload_on_hangup(state.clone()));

    let app = build_router(state);
    let listener = TcpListener::bind(addr).await?;

    info!("Admin panel listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Admin panel stopped");
    Ok(())
}

#[cfg(unix)]
async fn reload_on_hangup(state: AppState) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Failed to listen for SIGHUP, reload disabled: {}", e);
            return;
        }
    };

    while hangup.recv().await.is_some() {
        info!("SIGHUP received, reloading record file");
        if let Err(e) = state.reload().await {
            error!("Reload failed, keeping current state: {:#}", e);
        }
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            warn!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
