pub mod api_key;
pub mod attachment;
pub mod comment;
pub mod login_attempt;
pub mod saved_query;
pub mod session;
pub mod subscriber;
pub mod subtask;
pub mod task;
pub mod time_entry;
pub mod user;
