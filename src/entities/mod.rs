pub mod prelude;

pub mod api_keys;
pub mod attachments;
pub mod comments;
pub mod login_attempts;
pub mod saved_queries;
pub mod sessions;
pub mod subtasks;
pub mod task_subscribers;
pub mod tasks;
pub mod time_entries;
pub mod users;
