use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{AuthMethod, Permission};
use crate::models::auth::{ApiKey, Session};
use crate::models::task::{Comment, Subtask, Task, TimeEntry};
use crate::models::user::User;

/// Envelope carried by every JSON response.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn error(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: None,
            error: Some(ErrorBody {
                code,
                message: message.into(),
                details: None,
            }),
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        if let Some(error) = self.error.as_mut() {
            error.details = Some(details);
        }
        self
    }
}

impl ApiResponse<()> {
    /// Success without a payload.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: None,
            message: Some(message.into()),
            error: None,
            timestamp: Utc::now(),
        }
    }
}

// Auth

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginBody {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub totp_code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user: User,
    pub session_token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct TotpRequired {
    pub requires_totp: bool,
}

#[derive(Debug, Serialize)]
pub struct ProfileDto {
    pub user: User,
    pub permissions: Vec<Permission>,
    pub auth_method: AuthMethod,
}

#[derive(Debug, Deserialize)]
pub struct TotpCodeBody {
    #[serde(default)]
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateApiKeyBody {
    #[serde(default)]
    pub name: String,
    /// Defaults to the caller's own permissions when omitted.
    pub permissions: Option<Vec<String>>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct CreatedApiKeyDto {
    #[serde(flatten)]
    pub key: ApiKey,
    /// Shown exactly once.
    pub api_key: String,
}

#[derive(Debug, Serialize)]
pub struct SessionDto {
    #[serde(flatten)]
    pub session: Session,
    pub current: bool,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordBody {
    #[serde(default)]
    pub current_password: String,
    #[serde(default)]
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserBody {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    pub is_active: Option<bool>,
}

// Tasks

#[derive(Debug, Default, Deserialize)]
pub struct TaskListQuery {
    pub status: Option<String>,
    pub priority: Option<String>,
    /// Comma-separated; every tag must be present.
    pub tags: Option<String>,
    pub search: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
    pub sort: Option<String>,
    pub order: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskBody {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub status: Option<String>,
    pub priority: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Body of `PUT` and `PATCH /tasks/{id}`. An empty `priority` string clears it.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateTaskBody {
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct TaskDetailDto {
    #[serde(flatten)]
    pub task: Task,
    pub subtasks: Vec<Subtask>,
    pub time_entries: Vec<TimeEntry>,
    pub comments: Vec<Comment>,
    pub total_minutes: i64,
}

#[derive(Debug, Deserialize)]
pub struct TimeEntryBody {
    #[serde(default, alias = "duration_minutes")]
    pub duration: i32,
    #[serde(default)]
    pub description: String,
    /// `YYYY-MM-DD`; the entry is dated at noon UTC of that day.
    pub date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CommentBody {
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct SubtaskBody {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TimeBreakdownQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    /// Comma-separated saved query IDs.
    pub saved_query_ids: Option<String>,
    /// Comma-separated tags.
    pub excluded_tags: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthDto {
    pub status: &'static str,
    pub database: &'static str,
    pub version: &'static str,
}

