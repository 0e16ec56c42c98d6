//! Outbound notifications for task lifecycle events.
//!
//! Only task creation produces mail today. The remaining hooks are part of the
//! interface so that enabling them later does not change any caller.

use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::clients::smtp::{MailSender, OutgoingEmail};
use crate::db::Store;
use crate::domain::TaskStatus;
use crate::models::task::{Comment, Task};

#[async_trait::async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn notify_task_created(&self, task: &Task);

    async fn notify_status_changed(&self, _task: &Task, _previous: TaskStatus) {}

    async fn notify_comment_added(&self, _task: &Task, _comment: &Comment) {}

    async fn notify_task_updated(&self, _task: &Task) {}
}

/// Dispatcher used when SMTP is not configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotificationDispatcher;

#[async_trait::async_trait]
impl NotificationDispatcher for NoopNotificationDispatcher {
    async fn notify_task_created(&self, task: &Task) {
        debug!(task_id = task.id, "Notifications disabled, skipping");
    }
}

/// Mails every active user when a task is created.
pub struct EmailNotificationDispatcher {
    store: Store,
    mailer: Arc<dyn MailSender>,
}

impl EmailNotificationDispatcher {
    #[must_use]
    pub fn new(store: Store, mailer: Arc<dyn MailSender>) -> Self {
        Self { store, mailer }
    }
}

#[async_trait::async_trait]
impl NotificationDispatcher for EmailNotificationDispatcher {
    async fn notify_task_created(&self, task: &Task) {
        let recipients = match self.store.users().list_active().await {
            Ok(users) => users,
            Err(e) => {
                warn!(task_id = task.id, error = %e, "Failed to load notification recipients");
                return;
            }
        };

        let subject = format!("New Task: {}", task.name);
        let body = task_created_body(task);
        let in_reply_to =
            (!task.email_message_id.is_empty()).then(|| task.email_message_id.clone());

        for user in recipients {
            let email = OutgoingEmail {
                to: vec![user.email.clone()],
                subject: subject.clone(),
                body: body.clone(),
                in_reply_to: in_reply_to.clone(),
            };

            match self.mailer.send(&email).await {
                Ok(()) => {
                    metrics::counter!("notifications_sent_total", "outcome" => "sent").increment(1);
                    debug!(task_id = task.id, to = %user.email, "Sent task notification");
                }
                Err(e) => {
                    metrics::counter!("notifications_sent_total", "outcome" => "failed")
                        .increment(1);
                    warn!(task_id = task.id, to = %user.email, error = %e, "Failed to send task notification");
                }
            }
        }
    }
}

fn task_created_body(task: &Task) -> String {
    let mut body = String::from("A new task has been created.\n\n");
    let _ = writeln!(body, "Name: {}", task.name);
    if !task.description.is_empty() {
        let _ = writeln!(body, "Description: {}", task.description);
    }
    let _ = writeln!(body, "Status: {}", task.status);
    if let Some(priority) = task.priority {
        let _ = writeln!(body, "Priority: {priority}");
    }
    if !task.tags.is_empty() {
        let _ = writeln!(body, "Tags: {}", task.tags.join(", "));
    }
    body
}
