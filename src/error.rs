use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Already confirmed: {0}")]
    AlreadyConfirmed(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Internal server error: {0}")]
    InternalServerError(String),
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
    #[error("Migration error: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),
    #[error("Configuration error: {0}")]
    ConfigError(#[from] config::ConfigError),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) | AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidState(_) | AppError::AlreadyConfirmed(_) | AppError::Conflict(_) => {
                StatusCode::CONFLICT
            }
            AppError::InternalServerError(_)
            | AppError::DatabaseError(_)
            | AppError::MigrationError(_)
            | AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_message = match self {
            AppError::NotFound(msg)
            | AppError::BadRequest(msg)
            | AppError::ValidationError(msg)
            | AppError::InvalidState(msg)
            | AppError::AlreadyConfirmed(msg)
            | AppError::Conflict(msg) => msg,
            AppError::InternalServerError(ref msg) => {
                tracing::error!("Internal server error: {}", msg);
                msg.clone()
            }
            AppError::DatabaseError(ref err) => {
                tracing::error!("Database error: {:?}", err);
                "Database error occurred".to_string()
            }
            AppError::MigrationError(ref err) => {
                tracing::error!("Migration error: {:?}", err);
                "Database error occurred".to_string()
            }
            AppError::ConfigError(ref err) => {
                tracing::error!("Config error: {:?}", err);
                "Configuration error occurred".to_string()
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::ValidationError(err.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
