use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{Priority, SortOrder, TaskStatus};

#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: i32,
    pub name: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: Option<Priority>,
    pub tags: Vec<String>,
    /// Message-ID of the originating email, empty for tasks created elsewhere.
    pub email_message_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Task {
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    #[must_use]
    pub fn has_any_tag(&self, tags: &[String]) -> bool {
        self.tags.iter().any(|t| tags.contains(t))
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub name: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: Option<Priority>,
    pub tags: Vec<String>,
    pub email_message_id: String,
    /// Back-dated creation time; `None` means now.
    pub created_at: Option<DateTime<Utc>>,
}

impl NewTask {
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Partial update. `None` leaves a field untouched; `priority: Some(None)` clears it.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Option<Priority>>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Subtask {
    pub id: i32,
    pub task_id: i32,
    pub name: String,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimeEntry {
    pub id: i32,
    pub task_id: i32,
    pub description: String,
    pub duration_minutes: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewTimeEntry {
    pub description: String,
    pub duration_minutes: i32,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Comment {
    pub id: i32,
    pub task_id: i32,
    pub content: String,
    pub is_private: bool,
    pub from_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_message_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewComment {
    pub content: String,
    pub from_email: Option<String>,
    pub email_message_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Subscriber {
    pub id: i32,
    pub task_id: i32,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskSortField {
    #[default]
    UpdatedAt,
    CreatedAt,
    Name,
    Status,
    Priority,
}

impl std::str::FromStr for TaskSortField {
    type Err = crate::domain::ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "updated_at" => Ok(Self::UpdatedAt),
            "created_at" => Ok(Self::CreatedAt),
            "name" => Ok(Self::Name),
            "status" => Ok(Self::Status),
            "priority" => Ok(Self::Priority),
            other => Err(crate::domain::ParseEnumError {
                kind: "sort field",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    /// Every listed tag must be present on the task.
    pub tags: Vec<String>,
    pub search: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub sort: TaskSortField,
    pub order: SortOrder,
}

/// Trim, drop empties and de-duplicate while keeping first-seen order.
#[must_use]
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.as_ref().trim();
        if !tag.is_empty() && !out.iter().any(|t| t == tag) {
            out.push(tag.to_string());
        }
    }
    out
}
