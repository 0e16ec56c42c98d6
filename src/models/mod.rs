pub mod attachment;
pub mod auth;
pub mod saved_query;
pub mod task;
pub mod user;
