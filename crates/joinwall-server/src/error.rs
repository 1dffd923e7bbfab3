//! Error types for the panel server

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use joinwall_gate::GateError;
use joinwall_store::{RecordError, StoreError};
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

impl ConfigError {
    pub fn invalid(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Record(#[from] RecordError),

    #[error(transparent)]
    Gate(#[from] GateError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Access denied: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Record(e) => match e {
                RecordError::Validation(_) => StatusCode::BAD_REQUEST,
                RecordError::UserNotFound(_) => StatusCode::NOT_FOUND,
                RecordError::UserAlreadyExists(_) => StatusCode::CONFLICT,
                RecordError::AccountLimitExceeded { .. } => StatusCode::CONFLICT,
                RecordError::InvalidCredentials => StatusCode::UNAUTHORIZED,
                RecordError::Store(_) | RecordError::PasswordHash(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ApiError::Gate(GateError::InvalidIp(_)) => StatusCode::BAD_REQUEST,
            ApiError::Gate(GateError::Persist { .. }) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::Record(err.into())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self, "request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        (
            status,
            Json(serde_json::json!({ "success": false, "error": message })),
        )
            .into_response()
    }
}
