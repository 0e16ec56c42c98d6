//! Domain primitives shared by the services and the HTTP layer.
//!
//! Lifecycle states, priorities and the permission taxonomy live here as
//! closed enums so that string parsing happens once, at the boundary.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::models::user::User;

/// Username that receives the admin permission set on session login.
pub const ADMIN_USERNAME: &str = "jats-admin";

/// Error returned when a string does not name a known domain value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Task lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TaskStatus {
    #[default]
    #[serde(rename = "open")]
    Open,
    #[serde(rename = "in-progress")]
    InProgress,
    #[serde(rename = "resolved")]
    Resolved,
    #[serde(rename = "closed")]
    Closed,
}

impl TaskStatus {
    pub const ALL: [Self; 4] = [Self::Open, Self::InProgress, Self::Resolved, Self::Closed];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in-progress",
            Self::Resolved => "resolved",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "open" => Ok(Self::Open),
            "in-progress" | "in_progress" => Ok(Self::InProgress),
            "resolved" => Ok(Self::Resolved),
            "closed" => Ok(Self::Closed),
            other => Err(ParseEnumError::new("status", other)),
        }
    }
}

/// Task priority. `Urgent` is accepted alongside the three base levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Priority {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "urgent" => Ok(Self::Urgent),
            other => Err(ParseEnumError::new("priority", other)),
        }
    }
}

/// Sort order enumeration to replace boolean blindness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Ascending,
    #[default]
    Descending,
}

impl SortOrder {
    #[must_use]
    pub const fn is_ascending(&self) -> bool {
        matches!(self, Self::Ascending)
    }
}

impl FromStr for SortOrder {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(Self::Ascending),
            "desc" | "descending" => Ok(Self::Descending),
            other => Err(ParseEnumError::new("sort order", other)),
        }
    }
}

/// Permission taxonomy. `AdminAll` implies every other permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "tasks:read")]
    TasksRead,
    #[serde(rename = "tasks:write")]
    TasksWrite,
    #[serde(rename = "tasks:delete")]
    TasksDelete,
    #[serde(rename = "time:read")]
    TimeRead,
    #[serde(rename = "time:write")]
    TimeWrite,
    #[serde(rename = "admin:all")]
    AdminAll,
}

impl Permission {
    pub const ALL: [Self; 6] = [
        Self::TasksRead,
        Self::TasksWrite,
        Self::TasksDelete,
        Self::TimeRead,
        Self::TimeWrite,
        Self::AdminAll,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::TasksRead => "tasks:read",
            Self::TasksWrite => "tasks:write",
            Self::TasksDelete => "tasks:delete",
            Self::TimeRead => "time:read",
            Self::TimeWrite => "time:write",
            Self::AdminAll => "admin:all",
        }
    }

    /// Permissions granted to ordinary users on session login.
    #[must_use]
    pub fn default_set() -> BTreeSet<Self> {
        BTreeSet::from([
            Self::TasksRead,
            Self::TasksWrite,
            Self::TimeRead,
            Self::TimeWrite,
        ])
    }

    #[must_use]
    pub fn admin_set() -> BTreeSet<Self> {
        Self::ALL.into_iter().collect()
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s.trim())
            .ok_or_else(|| ParseEnumError::new("permission", s))
    }
}

/// Pure permission check over a permission set.
#[must_use]
pub fn has_permission(granted: &BTreeSet<Permission>, required: Permission) -> bool {
    granted.contains(&Permission::AdminAll) || granted.contains(&required)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    Session,
    ApiKey,
}

/// Result of authenticating a request.
#[derive(Debug, Clone, Serialize)]
pub struct AuthContext {
    pub user: User,
    pub session_id: Option<i32>,
    pub api_key_id: Option<i32>,
    pub permissions: BTreeSet<Permission>,
    pub method: AuthMethod,
}

impl AuthContext {
    #[must_use]
    pub fn has_permission(&self, required: Permission) -> bool {
        has_permission(&self.permissions, required)
    }

    #[must_use]
    pub fn permission_names(&self) -> Vec<String> {
        self.permissions.iter().map(ToString::to_string).collect()
    }
}
