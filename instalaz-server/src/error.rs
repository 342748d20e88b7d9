use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use libinstalaz::error::AuthError;
use libinstalaz::InstalazError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<InstalazError> for AppError {
    fn from(err: InstalazError) -> Self {
        let message = err.to_string();
        match err {
            InstalazError::NotFound(_) => AppError::NotFound(message),
            InstalazError::InvalidInput(_) => AppError::BadRequest(message),
            InstalazError::AccountBusy(_) => AppError::Conflict(message),
            InstalazError::TokenExpired { .. } => AppError::Unauthorized(message),
            InstalazError::Auth(AuthError::Upstream(_)) => AppError::Upstream(message),
            InstalazError::Auth(AuthError::AlreadyLinked(_)) => AppError::Conflict(message),
            InstalazError::Auth(_) => AppError::Unauthorized(message),
            InstalazError::Publish(_) | InstalazError::ContentSource(_) => AppError::Upstream(message),
            InstalazError::Config(_) | InstalazError::Database(_) => AppError::Internal(message),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Upstream(msg) => {
                tracing::warn!("Upstream error: {}", msg);
                (StatusCode::BAD_GATEWAY, msg.clone())
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, message).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
