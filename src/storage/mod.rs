pub mod attachments;

pub use attachments::{AttachmentStore, StorageError};
