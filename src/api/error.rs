use axum::{
    Json,
    extract::{FromRequest, Request, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

use super::ApiResponse;
use super::types::FieldError;
use crate::domain::Permission;
use crate::services::{AuthError, ReportError, TaskError};
use crate::storage::StorageError;

#[derive(Debug)]
pub enum ApiError {
    /// 400 with a per-field detail list.
    Validation {
        message: String,
        details: Vec<FieldError>,
    },

    /// Body could not be decoded into the expected shape.
    Unprocessable(String),

    UserExists,

    InvalidCredentials,

    InvalidTotp,

    InvalidSession,

    InvalidApiKey,

    Unauthorized(String),

    RateLimited,

    Forbidden {
        required: Permission,
        granted: Vec<String>,
    },

    NotFound(String),

    CannotDeleteSelf,

    DatabaseError(String),

    InternalError(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Validation { message, .. } => write!(f, "Validation error: {message}"),
            ApiError::Unprocessable(msg) => write!(f, "Unprocessable request: {msg}"),
            ApiError::UserExists => write!(f, "User already exists"),
            ApiError::InvalidCredentials => write!(f, "Invalid credentials"),
            ApiError::InvalidTotp => write!(f, "Invalid TOTP code"),
            ApiError::InvalidSession => write!(f, "Invalid or expired session"),
            ApiError::InvalidApiKey => write!(f, "Invalid API key"),
            ApiError::Unauthorized(msg) => write!(f, "Unauthorized: {msg}"),
            ApiError::RateLimited => write!(f, "Too many failed login attempts"),
            ApiError::Forbidden { required, .. } => {
                write!(f, "Insufficient permissions: {required} required")
            }
            ApiError::NotFound(msg) => write!(f, "Not found: {msg}"),
            ApiError::CannotDeleteSelf => write!(f, "Cannot delete your own account"),
            ApiError::DatabaseError(msg) => write!(f, "Database error: {msg}"),
            ApiError::InternalError(msg) => write!(f, "Internal error: {msg}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl ApiError {
    /// Machine-readable code clients branch on.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            ApiError::Validation { .. } | ApiError::Unprocessable(_) => "VALIDATION_ERROR",
            ApiError::UserExists => "USER_EXISTS",
            ApiError::InvalidCredentials => "INVALID_CREDENTIALS",
            ApiError::InvalidTotp => "INVALID_TOTP",
            ApiError::InvalidSession => "INVALID_SESSION",
            ApiError::InvalidApiKey => "INVALID_API_KEY",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::RateLimited => "RATE_LIMIT_EXCEEDED",
            ApiError::Forbidden { .. } => "INSUFFICIENT_PERMISSIONS",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::CannotDeleteSelf => "CANNOT_DELETE_SELF",
            ApiError::DatabaseError(_) | ApiError::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation { .. } | ApiError::CannotDeleteSelf => StatusCode::BAD_REQUEST,
            ApiError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::UserExists => StatusCode::CONFLICT,
            ApiError::InvalidCredentials
            | ApiError::InvalidTotp
            | ApiError::InvalidSession
            | ApiError::InvalidApiKey
            | ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Forbidden { .. } => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::DatabaseError(_) | ApiError::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        let body = match self {
            ApiError::Validation { message, details } => {
                let body = ApiResponse::<()>::error(code, message);
                if details.is_empty() {
                    body
                } else {
                    body.with_details(json!(details))
                }
            }
            ApiError::Unprocessable(msg) => ApiResponse::error(code, msg),
            ApiError::Unauthorized(msg) => ApiResponse::error(code, msg),
            ApiError::NotFound(msg) => ApiResponse::error(code, format!("{msg} not found")),
            ApiError::Forbidden { required, granted } => {
                ApiResponse::error(code, format!("Permission {required} is required"))
                    .with_details(json!({
                        "required": required,
                        "permissions": granted,
                    }))
            }
            ApiError::DatabaseError(msg) => {
                tracing::error!("Database error: {}", msg);
                ApiResponse::error(code, "A database error occurred")
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                ApiResponse::error(code, "An internal error occurred")
            }
            other => ApiResponse::error(code, other.to_string()),
        };

        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::InternalError(format!("{err:#}"))
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::UserExists => ApiError::UserExists,
            AuthError::InvalidCredentials => ApiError::InvalidCredentials,
            AuthError::RateLimitExceeded => ApiError::RateLimited,
            AuthError::InvalidTotp => ApiError::InvalidTotp,
            AuthError::TotpNotConfigured => {
                ApiError::validation("totp", "TOTP has not been set up for this account")
            }
            AuthError::InvalidSession => ApiError::InvalidSession,
            AuthError::InvalidApiKey => ApiError::InvalidApiKey,
            AuthError::UserNotFound => ApiError::NotFound("User".to_string()),
            AuthError::ApiKeyNotFound => ApiError::NotFound("API key".to_string()),
            AuthError::CannotDeleteSelf => ApiError::CannotDeleteSelf,
            AuthError::Validation(msg) => ApiError::Validation {
                message: msg,
                details: Vec::new(),
            },
            AuthError::Hash(e) => ApiError::InternalError(e.to_string()),
            AuthError::Database(msg) => ApiError::DatabaseError(msg),
            AuthError::Internal(msg) => ApiError::InternalError(msg),
        }
    }
}

impl From<TaskError> for ApiError {
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::NotFound(what) => ApiError::NotFound(what),
            TaskError::Validation(msg) => ApiError::Validation {
                message: msg,
                details: Vec::new(),
            },
            TaskError::Storage(e) => e.into(),
            TaskError::Database(msg) => ApiError::DatabaseError(msg),
            TaskError::Internal(msg) => ApiError::InternalError(msg),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(_) => ApiError::NotFound("Attachment file".to_string()),
            StorageError::InvalidPath(path) => {
                ApiError::validation("file_path", format!("invalid attachment path {path}"))
            }
            StorageError::Io(e) => ApiError::InternalError(e.to_string()),
        }
    }
}

impl From<ReportError> for ApiError {
    fn from(err: ReportError) -> Self {
        match err {
            ReportError::Validation(msg) => ApiError::Validation {
                message: msg,
                details: Vec::new(),
            },
            ReportError::SavedQueryNotFound(id) => ApiError::not_found("Saved query", id),
            ReportError::Database(msg) => ApiError::DatabaseError(msg),
            ReportError::Internal(msg) => ApiError::InternalError(msg),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::UNPROCESSABLE_ENTITY {
            ApiError::Unprocessable(rejection.body_text())
        } else {
            ApiError::Validation {
                message: rejection.body_text(),
                details: Vec::new(),
            }
        }
    }
}

impl ApiError {
    pub fn not_found(resource: &str, id: impl fmt::Display) -> Self {
        ApiError::NotFound(format!("{resource} {id}"))
    }

    /// Single-field validation failure.
    pub fn validation(field: &str, msg: impl Into<String>) -> Self {
        let msg = msg.into();
        ApiError::Validation {
            message: format!("{field}: {msg}"),
            details: vec![FieldError::new(field, msg)],
        }
    }

    pub fn invalid_fields(details: Vec<FieldError>) -> Self {
        ApiError::Validation {
            message: "Request validation failed".to_string(),
            details,
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        ApiError::InternalError(msg.into())
    }
}

/// `Json` extractor whose rejections render through [`ApiError`].
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}
