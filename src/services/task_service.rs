//! Domain service for tasks and everything hanging off them.
//!
//! Owns the lifecycle rules: `resolved_at` stamping, the automatic open to
//! in-progress move when time is logged, and `updated_at` bumps on any child write.

use serde::Serialize;
use thiserror::Error;

use crate::domain::TaskStatus;
use crate::models::attachment::{Attachment, AttachmentParent};
use crate::models::saved_query::{SavedQuery, SavedQueryInput};
use crate::models::task::{
    Comment, NewComment, NewTask, NewTimeEntry, Subscriber, Subtask, Task, TaskFilter, TaskUpdate,
    TimeEntry,
};
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Attachment storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sea_orm::DbErr> for TaskError {
    fn from(err: sea_orm::DbErr) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<anyhow::Error> for TaskError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(format!("{err:#}"))
    }
}

impl TaskError {
    pub(crate) fn task_not_found(id: i32) -> Self {
        Self::NotFound(format!("Task {id}"))
    }
}

/// Upload payload for a new attachment.
#[derive(Debug, Clone)]
pub struct NewAttachment {
    pub original_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct AttachmentContent {
    pub attachment: Attachment,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagCount {
    pub tag: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct KanbanColumn {
    pub status: TaskStatus,
    pub count: usize,
    pub tasks: Vec<Task>,
}

/// Tasks grouped by status, one column per lifecycle state in order.
#[derive(Debug, Clone, Serialize)]
pub struct KanbanBoard {
    pub tag: Option<String>,
    pub total: usize,
    pub columns: Vec<KanbanColumn>,
}

#[async_trait::async_trait]
pub trait TaskService: Send + Sync {
    /// Creates a task and schedules the creation notification.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Validation`] when the name is blank.
    async fn create_task(&self, new: NewTask) -> Result<Task, TaskError>;

    /// Creates an `open` task whose `email_message_id` is `message_id`.
    async fn create_task_from_email(&self, name: &str, message_id: &str)
    -> Result<Task, TaskError>;

    async fn get_task(&self, id: i32) -> Result<Task, TaskError>;

    async fn find_task_by_message_id(&self, message_id: &str) -> Result<Option<Task>, TaskError>;

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, TaskError>;

    /// Applies `update`, stamping `resolved_at` on a transition into `resolved`.
    async fn update_task(&self, id: i32, update: TaskUpdate) -> Result<Task, TaskError>;

    /// Soft delete; later reads by ID fail with [`TaskError::NotFound`].
    async fn delete_task(&self, id: i32) -> Result<(), TaskError>;

    /// Logs time and moves an `open` task to `in-progress`.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Validation`] when the duration is not positive.
    async fn add_time_entry(&self, task_id: i32, entry: NewTimeEntry)
    -> Result<TimeEntry, TaskError>;

    async fn list_time_entries(&self, task_id: i32) -> Result<Vec<TimeEntry>, TaskError>;

    /// Comments are always stored private.
    async fn add_comment(&self, task_id: i32, comment: NewComment) -> Result<Comment, TaskError>;

    async fn list_comments(&self, task_id: i32) -> Result<Vec<Comment>, TaskError>;

    /// True when a comment on `task_id` was already created from `message_id`.
    async fn comment_exists_for_message(
        &self,
        task_id: i32,
        message_id: &str,
    ) -> Result<bool, TaskError>;

    async fn add_subtask(&self, task_id: i32, name: &str) -> Result<Subtask, TaskError>;

    async fn toggle_subtask(&self, task_id: i32, subtask_id: i32) -> Result<Subtask, TaskError>;

    async fn delete_subtask(&self, task_id: i32, subtask_id: i32) -> Result<(), TaskError>;

    async fn list_subtasks(&self, task_id: i32) -> Result<Vec<Subtask>, TaskError>;

    /// Writes the bytes to the attachment store and links them to `parent`.
    async fn add_attachment(
        &self,
        parent: AttachmentParent,
        upload: NewAttachment,
    ) -> Result<Attachment, TaskError>;

    /// Attachments of the task and of its comments.
    async fn list_attachments(&self, task_id: i32) -> Result<Vec<Attachment>, TaskError>;

    async fn get_attachment(&self, id: i32) -> Result<AttachmentContent, TaskError>;

    /// Every tag in use with the number of live tasks carrying it, by tag name.
    async fn list_tags(&self) -> Result<Vec<TagCount>, TaskError>;

    async fn tasks_by_tag(&self, tag: &str) -> Result<Vec<Task>, TaskError>;

    async fn search_tasks(&self, query: &str) -> Result<Vec<Task>, TaskError>;

    async fn search_comments(&self, query: &str) -> Result<Vec<Comment>, TaskError>;

    /// Board over all tasks, or only those carrying `tag`.
    async fn kanban(&self, tag: Option<&str>) -> Result<KanbanBoard, TaskError>;

    async fn create_saved_query(&self, input: SavedQueryInput) -> Result<SavedQuery, TaskError>;

    async fn get_saved_query(&self, id: i32) -> Result<SavedQuery, TaskError>;

    async fn list_saved_queries(&self) -> Result<Vec<SavedQuery>, TaskError>;

    async fn update_saved_query(
        &self,
        id: i32,
        input: SavedQueryInput,
    ) -> Result<SavedQuery, TaskError>;

    async fn delete_saved_query(&self, id: i32) -> Result<(), TaskError>;

    /// Tasks matching the saved query's tag predicate.
    async fn tasks_by_saved_query(&self, id: i32) -> Result<Vec<Task>, TaskError>;

    /// Idempotent per `(task, email)`.
    async fn add_subscriber(&self, task_id: i32, email: &str) -> Result<(), TaskError>;

    async fn list_subscribers(&self, task_id: i32) -> Result<Vec<Subscriber>, TaskError>;
}
