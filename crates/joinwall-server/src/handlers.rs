use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use joinwall_store::{BlockedIp, NewUser, SettingsUpdate, User, UserListOptions, UserStatus};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::IpAddr;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::middleware::ClientIp;
use crate::state::AppState;

type ApiResult<T> = Result<T, ApiError>;

/// A user as the API shows it. The password hash never leaves the store.
#[derive(Debug, Serialize)]
pub struct UserView {
    pub id: String,
    pub name: String,
    pub email: String,
    pub ip: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl UserView {
    fn new(id: impl Into<String>, user: &User) -> Self {
        Self {
            id: id.into(),
            name: user.name.clone(),
            email: user.email.clone(),
            ip: user.ip.clone(),
            status: user.status.to_string(),
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BlockedIpView {
    pub ip: String,
    pub reason: String,
    pub blocked_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct ListUsersQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: String,
    pub password: String,
    pub ip: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct BlockIpRequest {
    pub ip: String,
    pub reason: Option<String>,
}

pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<ListUsersQuery>,
) -> impl IntoResponse {
    let options = UserListOptions {
        status_filter: query.status.map(UserStatus::from),
        limit: query.limit,
    };
    let users: Vec<UserView> = state
        .users
        .list_users(Some(options))
        .iter()
        .map(|(id, user)| UserView::new(id.as_str(), user))
        .collect();

    Json(json!({ "success": true, "users": users }))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let user = state.users.get_user(&id)?;
    Ok(Json(json!({ "success": true, "user": UserView::new(id, &user) })))
}

/// Registers a user. The account is attributed to `ip` from the body when
/// given, otherwise to the requesting client.
pub async fn create_user(
    State(state): State<AppState>,
    client_ip: Option<Extension<ClientIp>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = payload?;

    let ip = match request.ip.as_deref().map(str::trim).filter(|ip| !ip.is_empty()) {
        Some(raw) => {
            let addr: IpAddr = raw
                .parse()
                .map_err(|_| ApiError::bad_request(format!("invalid IP address: {}", raw)))?;
            if state.gate.is_blocked_addr(addr) {
                return Err(ApiError::Forbidden(format!("IP {} is blocked", addr)));
            }
            addr.to_canonical().to_string()
        }
        None => client_ip
            .map(|Extension(ClientIp(addr))| addr.to_string())
            .unwrap_or_default(),
    };

    let id = request.id.clone();
    let user = state
        .users
        .register(NewUser {
            id: request.id,
            name: request.name,
            email: request.email,
            password: request.password,
            ip,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "user": UserView::new(id, &user) })),
    ))
}

pub async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.users.delete_user(&id).await?;
    Ok(Json(json!({ "success": true })))
}

/// Blocks the user and the IP address recorded for them.
pub async fn block_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let user = state.users.block_user(&id).await?;

    let ip_blocked = if user.ip.parse::<IpAddr>().is_ok() {
        state
            .gate
            .block(&user.ip, Some(format!("User {} blocked", id)))
            .await?;
        true
    } else {
        if !user.ip.is_empty() {
            warn!(user_id = %id, ip = %user.ip, "User has no usable IP to block");
        }
        false
    };

    Ok(Json(json!({
        "success": true,
        "user": UserView::new(id, &user),
        "ip_blocked": ip_blocked,
    })))
}

pub async fn unblock_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let user = state.users.unblock_user(&id).await?;
    Ok(Json(json!({ "success": true, "user": UserView::new(id, &user) })))
}

pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = payload?;
    let (id, user) = state.users.authenticate(&request.email, &request.password)?;
    info!(user_id = %id, "User logged in");
    Ok(Json(json!({ "success": true, "user": UserView::new(id, &user) })))
}

pub async fn get_settings(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "success": true, "settings": state.settings.current() }))
}

pub async fn update_settings(
    State(state): State<AppState>,
    payload: Result<Json<SettingsUpdate>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(update) = payload?;
    let settings = state.settings.update(update).await?;
    Ok(Json(json!({ "success": true, "settings": settings })))
}

pub async fn get_statistics(State(state): State<AppState>) -> impl IntoResponse {
    let doc = state.store.snapshot();
    Json(json!({ "success": true, "statistics": doc.statistics }))
}

pub async fn list_blocked_ips(State(state): State<AppState>) -> impl IntoResponse {
    let blocked: Vec<BlockedIpView> = state
        .gate
        .list()
        .into_iter()
        .map(|(ip, BlockedIp { reason, blocked_at })| BlockedIpView {
            ip,
            reason,
            blocked_at,
        })
        .collect();

    Json(json!({ "success": true, "blocked_ips": blocked }))
}

pub async fn block_ip(
    State(state): State<AppState>,
    payload: Result<Json<BlockIpRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = payload?;
    state.gate.block(&request.ip, request.reason).await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn unblock_ip(
    State(state): State<AppState>,
    Path(ip): Path<String>,
) -> ApiResult<impl IntoResponse> {
    if state.gate.unblock(&ip).await? {
        Ok(Json(json!({ "success": true })))
    } else {
        Err(ApiError::NotFound(format!("IP {} is not blocked", ip)))
    }
}
