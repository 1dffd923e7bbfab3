//! Request admission by client IP

use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::net::{IpAddr, SocketAddr};
use tracing::{debug, info};

use crate::state::AppState;

/// Resolved client address, attached to every admitted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientIp(pub IpAddr);

/// Rejects requests from blocked addresses with 403 before any handler runs.
pub async fn ip_gate(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    mut request: Request,
    next: Next,
) -> Response {
    let peer = connect_info.map(|ConnectInfo(addr)| addr.ip());
    let Some(client_ip) = state.resolver.resolve(request.headers(), peer) else {
        debug!(path = %request.uri().path(), "No client address for request");
        return next.run(request).await;
    };

    if state.gate.is_blocked_addr(client_ip) {
        info!(ip = %client_ip, path = %request.uri().path(), "Rejected blocked IP");
        return (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({
                "success": false,
                "error": "Access denied: your IP address is blocked",
            })),
        )
            .into_response();
    }

    request.extensions_mut().insert(ClientIp(client_ip));
    next.run(request).await
}
