use chrono::{DateTime, Utc};
use serde::Serialize;

/// The single owner of an attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum AttachmentParent {
    Task(i32),
    Comment(i32),
}

impl AttachmentParent {
    #[must_use]
    pub const fn task_id(&self) -> Option<i32> {
        match self {
            Self::Task(id) => Some(*id),
            Self::Comment(_) => None,
        }
    }

    #[must_use]
    pub const fn comment_id(&self) -> Option<i32> {
        match self {
            Self::Comment(id) => Some(*id),
            Self::Task(_) => None,
        }
    }
}

/// A file written to the attachment root but not yet linked to a parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub filename: String,
    pub original_name: String,
    pub content_type: String,
    /// Path relative to the attachment root.
    pub file_path: String,
    pub size: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Attachment {
    pub id: i32,
    pub parent: AttachmentParent,
    pub filename: String,
    pub original_name: String,
    pub content_type: String,
    pub file_path: String,
    pub size: i64,
    pub created_at: DateTime<Utc>,
}
