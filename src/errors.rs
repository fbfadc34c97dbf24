use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::store::StoreError;

/// Failures detected by the gateway itself. Upstream statuses are relayed, not mapped here.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Forbidden")]
    Forbidden,

    #[error("Maximum permissible ESI error limit reached.")]
    ErrorLimitReached,

    #[error("Path cannot be empty.")]
    EmptyPath,

    #[error("Path must start with a single slash.")]
    InvalidPath,

    #[error("Public ESI routes are not allowed.")]
    PublicPath,

    #[error("The datasource parameter cannot be empty, it must contain an EVE character ID")]
    MissingDatasource,

    #[error("Character not found.")]
    CharacterNotFound,

    #[error("Character has no token.")]
    NoToken,

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Forbidden => StatusCode::FORBIDDEN,
            GatewayError::ErrorLimitReached => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::EmptyPath
            | GatewayError::InvalidPath
            | GatewayError::PublicPath
            | GatewayError::MissingDatasource
            | GatewayError::CharacterNotFound
            | GatewayError::NoToken => StatusCode::BAD_REQUEST,
            GatewayError::Store(_) | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            GatewayError::Store(e) => {
                tracing::error!("Storage error: {}", e);
                "Internal server error.".to_string()
            }
            GatewayError::Internal(e) => {
                tracing::error!("Internal error: {:#}", e);
                "Internal server error.".to_string()
            }
            other => other.to_string(),
        };

        (status, body).into_response()
    }
}
