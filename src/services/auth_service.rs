//! Domain service for authentication and user management.
//!
//! Covers registration, login with rate limiting and TOTP, session and API key
//! lifecycles, password resets and the periodic cleanup of expired artifacts.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::domain::{AuthContext, Permission};
use crate::models::auth::{ApiKey, Session};
use crate::models::user::User;
use crate::security::HashError;

/// Errors specific to authentication operations.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("User already exists")]
    UserExists,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Too many failed login attempts")]
    RateLimitExceeded,

    #[error("Invalid TOTP code")]
    InvalidTotp,

    #[error("TOTP is not configured")]
    TotpNotConfigured,

    #[error("Invalid or expired session")]
    InvalidSession,

    #[error("Invalid API key")]
    InvalidApiKey,

    #[error("User not found")]
    UserNotFound,

    #[error("API key not found")]
    ApiKeyNotFound,

    #[error("Cannot delete your own account")]
    CannotDeleteSelf,

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Hash error: {0}")]
    Hash(#[from] HashError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sea_orm::DbErr> for AuthError {
    fn from(err: sea_orm::DbErr) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<anyhow::Error> for AuthError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(format!("{err:#}"))
    }
}

/// Credentials plus request metadata for a login.
#[derive(Debug, Clone, Default)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    pub totp_code: Option<String>,
    pub user_agent: String,
    pub ip_address: String,
}

/// `RequiresTotp` is a successful outcome, not an error.
#[derive(Debug, Clone)]
pub enum LoginOutcome {
    Authenticated { user: User, session: Session },
    RequiresTotp,
}

#[derive(Debug, Clone)]
pub struct NewUserRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    /// `None` means active.
    pub is_active: Option<bool>,
}

/// A freshly created key. `plaintext` is never retrievable again.
#[derive(Debug, Clone, Serialize)]
pub struct CreatedApiKey {
    pub key: ApiKey,
    pub plaintext: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TotpSetup {
    pub secret: String,
    pub provisioning_uri: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub sessions_removed: u64,
    pub login_attempts_removed: u64,
}

/// Domain service trait for authentication.
#[async_trait::async_trait]
pub trait AuthService: Send + Sync {
    /// Creates an active user.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UserExists`] if the username or email is taken.
    async fn register_user(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<User, AuthError>;

    /// Admin path: like registration, active unless `is_active == Some(false)`.
    async fn create_user(&self, request: NewUserRequest) -> Result<User, AuthError>;

    /// Every failure records exactly one failed attempt.
    ///
    /// # Errors
    ///
    /// [`AuthError::RateLimitExceeded`], [`AuthError::InvalidCredentials`] or
    /// [`AuthError::InvalidTotp`].
    async fn login(&self, request: LoginRequest) -> Result<LoginOutcome, AuthError>;

    async fn logout(&self, token: &str) -> Result<(), AuthError>;

    /// Invalidates every session of the user. Returns how many were removed.
    async fn logout_all(&self, user_id: i32) -> Result<u64, AuthError>;

    async fn validate_session(&self, token: &str) -> Result<AuthContext, AuthError>;

    async fn validate_api_key(&self, plaintext: &str) -> Result<AuthContext, AuthError>;

    async fn create_api_key(
        &self,
        user_id: i32,
        name: &str,
        permissions: Vec<Permission>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<CreatedApiKey, AuthError>;

    async fn list_api_keys(&self, user_id: i32) -> Result<Vec<ApiKey>, AuthError>;

    async fn revoke_api_key(&self, user_id: i32, key_id: i32) -> Result<(), AuthError>;

    /// Stores a new secret; TOTP stays disabled until [`AuthService::enable_totp`].
    async fn setup_totp(&self, user_id: i32) -> Result<TotpSetup, AuthError>;

    async fn enable_totp(&self, user_id: i32, code: &str) -> Result<(), AuthError>;

    async fn disable_totp(&self, user_id: i32) -> Result<(), AuthError>;

    /// Sets a new password and invalidates all of the user's sessions.
    async fn reset_password(&self, username: &str, new_password: &str) -> Result<(), AuthError>;

    async fn change_password(
        &self,
        user_id: i32,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError>;

    async fn get_user(&self, user_id: i32) -> Result<User, AuthError>;

    async fn list_sessions(&self, user_id: i32) -> Result<Vec<Session>, AuthError>;

    /// All users, including inactive and deleted ones.
    async fn list_all_users(&self) -> Result<Vec<User>, AuthError>;

    /// Soft-deletes `target_id` and revokes its sessions and keys.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::CannotDeleteSelf`] when `actor_id == target_id`.
    async fn delete_user(&self, actor_id: i32, target_id: i32) -> Result<(), AuthError>;

    /// Removes expired sessions and stale login attempts.
    async fn cleanup_expired(&self) -> Result<CleanupReport, AuthError>;
}
