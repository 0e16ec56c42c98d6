mod list_users;
mod reset_password;

pub use list_users::cmd_list_users;
pub use reset_password::{cmd_reset_password, validate_new_password};
