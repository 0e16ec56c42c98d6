pub use super::api_keys::Entity as ApiKeys;
pub use super::attachments::Entity as Attachments;
pub use super::comments::Entity as Comments;
pub use super::login_attempts::Entity as LoginAttempts;
pub use super::saved_queries::Entity as SavedQueries;
pub use super::sessions::Entity as Sessions;
pub use super::subtasks::Entity as Subtasks;
pub use super::task_subscribers::Entity as TaskSubscribers;
pub use super::tasks::Entity as Tasks;
pub use super::time_entries::Entity as TimeEntries;
pub use super::users::Entity as Users;
