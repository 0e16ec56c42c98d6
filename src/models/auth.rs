use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::Permission;

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: i32,
    pub user_id: i32,
    #[serde(skip_serializing)]
    pub token: String,
    pub user_agent: String,
    pub ip_address: String,
    pub expires_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// API key record. Only the hash and an 8-character prefix of the plaintext persist.
#[derive(Debug, Clone, Serialize)]
pub struct ApiKey {
    pub id: i32,
    pub user_id: i32,
    pub name: String,
    pub key_prefix: String,
    pub permissions: Vec<Permission>,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ApiKey {
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginAttempt {
    pub id: i32,
    pub username: String,
    pub ip_address: String,
    pub success: bool,
    pub created_at: DateTime<Utc>,
}
