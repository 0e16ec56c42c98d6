//! Email-to-task ingestion.
//!
//! Each poll opens one mailbox session, walks the unseen messages in UID order and
//! routes each one to a new task or, when `In-Reply-To` names a known task, to a
//! comment on it. Only messages that were fully handled are flagged `\Seen`; the
//! rest stay unseen and are retried on the next poll, so both routes are idempotent
//! on the message's Message-ID.

use async_trait::async_trait;
use mail_parser::{MessageParser, MimeHeaders, PartType};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::clients::imap::{MailboxConnector, MailboxError};
use crate::db::Store;
use crate::models::attachment::{Attachment, AttachmentParent};
use crate::models::task::{Comment, NewComment, Task};
use crate::models::user::User;
use crate::services::task_service::{NewAttachment, TaskError, TaskService};

const RE_PREFIXES: [&str; 5] = ["Re:", "RE:", "Fwd:", "FWD:", "Fw:"];
const NO_SUBJECT: &str = "(no subject)";

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Failed to parse message: {0}")]
    Parse(String),

    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sea_orm::DbErr> for IngestError {
    fn from(err: sea_orm::DbErr) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<anyhow::Error> for IngestError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(format!("{err:#}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailAttachment {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// The parts of a message the pipeline acts on. Message-IDs carry no angle brackets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedEmail {
    pub subject: String,
    pub from: String,
    pub message_id: String,
    pub in_reply_to: String,
    pub body: String,
    pub attachments: Vec<EmailAttachment>,
}

/// Strip `<` `>` and surrounding whitespace.
#[must_use]
pub fn normalize_message_id(raw: &str) -> String {
    raw.trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .trim()
        .to_string()
}

/// Remove any run of reply and forward prefixes.
#[must_use]
pub fn clean_subject(subject: &str) -> String {
    let mut current = subject.trim();
    loop {
        let stripped = RE_PREFIXES
            .iter()
            .find_map(|prefix| current.strip_prefix(prefix));
        match stripped {
            Some(rest) => current = rest.trim_start(),
            None => return current.trim().to_string(),
        }
    }
}

fn content_type_of<'x>(part: &impl MimeHeaders<'x>) -> String {
    part.content_type().map_or_else(
        || "application/octet-stream".to_string(),
        |ct| match ct.subtype() {
            Some(sub) => format!("{}/{}", ct.ctype(), sub).to_ascii_lowercase(),
            None => ct.ctype().to_ascii_lowercase(),
        },
    )
}

pub fn parse_email(raw: &[u8]) -> Result<ParsedEmail, IngestError> {
    let message = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| IngestError::Parse("not a MIME message".to_string()))?;

    let from = message
        .from()
        .and_then(|f| f.first())
        .and_then(|a| a.address())
        .map(|s| s.trim().to_string())
        .unwrap_or_default();

    let body = match message
        .text_body
        .first()
        .and_then(|id| message.parts.get(*id))
        .map(|part| &part.body)
    {
        Some(PartType::Text(text)) => text.trim().to_string(),
        Some(PartType::Html(html)) => html2text::from_read(html.as_bytes(), 80)
            .map_err(|e| IngestError::Parse(format!("HTML body: {e}")))?
            .trim()
            .to_string(),
        _ => String::new(),
    };

    let attachments = message
        .attachments()
        .map(|part| EmailAttachment {
            filename: part.attachment_name().unwrap_or("attachment").to_string(),
            content_type: content_type_of(part),
            data: part.contents().to_vec(),
        })
        .collect();

    Ok(ParsedEmail {
        subject: message.subject().unwrap_or_default().trim().to_string(),
        from,
        message_id: message
            .message_id()
            .map(normalize_message_id)
            .unwrap_or_default(),
        in_reply_to: message
            .in_reply_to()
            .as_text()
            .map(normalize_message_id)
            .unwrap_or_default(),
        body,
        attachments,
    })
}

/// Narrow view of the domain the pipeline writes through.
#[async_trait]
pub trait IngestTarget: Send + Sync {
    async fn find_active_user_by_email(&self, email: &str) -> Result<Option<User>, IngestError>;

    async fn find_task_by_message_id(&self, message_id: &str)
    -> Result<Option<Task>, IngestError>;

    async fn create_task_from_email(&self, name: &str, message_id: &str)
    -> Result<Task, IngestError>;

    async fn comment_exists(&self, task_id: i32, message_id: &str) -> Result<bool, IngestError>;

    async fn add_comment(&self, task_id: i32, comment: NewComment)
    -> Result<Comment, IngestError>;

    async fn add_attachment(
        &self,
        parent: AttachmentParent,
        upload: NewAttachment,
    ) -> Result<Attachment, IngestError>;

    async fn add_subscriber(&self, task_id: i32, email: &str) -> Result<(), IngestError>;
}

/// Production target: users from the store, everything else through the task service.
pub struct ServiceIngestTarget {
    store: Store,
    tasks: Arc<dyn TaskService>,
}

impl ServiceIngestTarget {
    #[must_use]
    pub fn new(store: Store, tasks: Arc<dyn TaskService>) -> Self {
        Self { store, tasks }
    }
}

#[async_trait]
impl IngestTarget for ServiceIngestTarget {
    async fn find_active_user_by_email(&self, email: &str) -> Result<Option<User>, IngestError> {
        Ok(self.store.users().get_by_email(email).await?)
    }

    async fn find_task_by_message_id(
        &self,
        message_id: &str,
    ) -> Result<Option<Task>, IngestError> {
        Ok(self.tasks.find_task_by_message_id(message_id).await?)
    }

    async fn create_task_from_email(
        &self,
        name: &str,
        message_id: &str,
    ) -> Result<Task, IngestError> {
        Ok(self.tasks.create_task_from_email(name, message_id).await?)
    }

    async fn comment_exists(&self, task_id: i32, message_id: &str) -> Result<bool, IngestError> {
        Ok(self
            .tasks
            .comment_exists_for_message(task_id, message_id)
            .await?)
    }

    async fn add_comment(
        &self,
        task_id: i32,
        comment: NewComment,
    ) -> Result<Comment, IngestError> {
        Ok(self.tasks.add_comment(task_id, comment).await?)
    }

    async fn add_attachment(
        &self,
        parent: AttachmentParent,
        upload: NewAttachment,
    ) -> Result<Attachment, IngestError> {
        Ok(self.tasks.add_attachment(parent, upload).await?)
    }

    async fn add_subscriber(&self, task_id: i32, email: &str) -> Result<(), IngestError> {
        Ok(self.tasks.add_subscriber(task_id, email).await?)
    }
}

/// What happened to one message. Everything except `Skipped` is flagged seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Skipped { reason: &'static str },
    CreatedTask { task_id: i32, comment_id: Option<i32> },
    AddedComment { task_id: i32, comment_id: i32 },
    /// Reply without a body; its attachments went to the task.
    AttachedToTask { task_id: i32 },
    Duplicate { task_id: i32 },
}

impl ProcessOutcome {
    #[must_use]
    pub const fn marks_seen(&self) -> bool {
        !matches!(self, Self::Skipped { .. })
    }

    const fn label(&self) -> &'static str {
        match self {
            Self::Skipped { .. } => "skipped",
            Self::CreatedTask { .. } => "created_task",
            Self::AddedComment { .. } => "added_comment",
            Self::AttachedToTask { .. } => "attached_to_task",
            Self::Duplicate { .. } => "duplicate",
        }
    }
}

pub struct EmailIngestor {
    target: Arc<dyn IngestTarget>,
}

impl EmailIngestor {
    #[must_use]
    pub fn new(target: Arc<dyn IngestTarget>) -> Self {
        Self { target }
    }

    #[instrument(skip(self, raw), fields(size = raw.len()))]
    pub async fn process_message(&self, uid: u32, raw: &[u8]) -> Result<ProcessOutcome, IngestError> {
        let email = parse_email(raw)?;

        if email.from.is_empty() {
            return Ok(ProcessOutcome::Skipped {
                reason: "missing sender",
            });
        }
        if self
            .target
            .find_active_user_by_email(&email.from)
            .await?
            .is_none()
        {
            debug!(uid, from = %email.from, "Ignoring mail from unknown sender");
            return Ok(ProcessOutcome::Skipped {
                reason: "unknown sender",
            });
        }

        let thread = if email.in_reply_to.is_empty() {
            None
        } else {
            self.target
                .find_task_by_message_id(&email.in_reply_to)
                .await?
        };

        match thread {
            Some(task) => self.add_to_thread(uid, &task, &email).await,
            None => self.create_from_email(uid, &email).await,
        }
    }

    async fn create_from_email(&self, uid: u32, email: &ParsedEmail) -> Result<ProcessOutcome, IngestError> {
        let existing = if email.message_id.is_empty() {
            None
        } else {
            self.target
                .find_task_by_message_id(&email.message_id)
                .await?
        };

        let (task, created) = match existing {
            Some(task) => (task, false),
            None => {
                let name = match clean_subject(&email.subject) {
                    s if s.is_empty() => NO_SUBJECT.to_string(),
                    s => s,
                };
                let task = self
                    .target
                    .create_task_from_email(&name, &email.message_id)
                    .await?;
                info!(uid, task_id = task.id, from = %email.from, "Created task from email");
                (task, true)
            }
        };

        self.target.add_subscriber(task.id, &email.from).await?;

        let comment = self.comment_once(&task, email).await?;
        if !created && comment.is_none() {
            debug!(uid, task_id = task.id, "Message already ingested");
            return Ok(ProcessOutcome::Duplicate { task_id: task.id });
        }

        let parent = comment
            .as_ref()
            .map_or(AttachmentParent::Task(task.id), |c| AttachmentParent::Comment(c.id));
        self.save_attachments(uid, parent, email).await;

        Ok(ProcessOutcome::CreatedTask {
            task_id: task.id,
            comment_id: comment.map(|c| c.id),
        })
    }

    async fn add_to_thread(
        &self,
        uid: u32,
        task: &Task,
        email: &ParsedEmail,
    ) -> Result<ProcessOutcome, IngestError> {
        self.target.add_subscriber(task.id, &email.from).await?;

        if !email.message_id.is_empty()
            && self
                .target
                .comment_exists(task.id, &email.message_id)
                .await?
        {
            debug!(uid, task_id = task.id, "Reply already ingested");
            return Ok(ProcessOutcome::Duplicate { task_id: task.id });
        }

        let Some(comment) = self.comment_once(task, email).await? else {
            self.save_attachments(uid, AttachmentParent::Task(task.id), email)
                .await;
            info!(uid, task_id = task.id, "Linked reply attachments to task");
            return Ok(ProcessOutcome::AttachedToTask { task_id: task.id });
        };
        info!(uid, task_id = task.id, comment_id = comment.id, "Added email reply as comment");

        self.save_attachments(uid, AttachmentParent::Comment(comment.id), email)
            .await;

        Ok(ProcessOutcome::AddedComment {
            task_id: task.id,
            comment_id: comment.id,
        })
    }

    /// Adds the body as a comment unless it is empty or this Message-ID already
    /// produced one on `task`.
    async fn comment_once(
        &self,
        task: &Task,
        email: &ParsedEmail,
    ) -> Result<Option<Comment>, IngestError> {
        if email.body.is_empty() {
            return Ok(None);
        }
        if !email.message_id.is_empty()
            && self
                .target
                .comment_exists(task.id, &email.message_id)
                .await?
        {
            return Ok(None);
        }

        let comment = self
            .target
            .add_comment(
                task.id,
                NewComment {
                    content: email.body.clone(),
                    from_email: Some(email.from.clone()),
                    email_message_id: (!email.message_id.is_empty())
                        .then(|| email.message_id.clone()),
                },
            )
            .await?;
        Ok(Some(comment))
    }

    /// Write failures are logged; the task or comment stays.
    async fn save_attachments(&self, uid: u32, parent: AttachmentParent, email: &ParsedEmail) {
        for attachment in &email.attachments {
            let upload = NewAttachment {
                original_name: attachment.filename.clone(),
                content_type: attachment.content_type.clone(),
                bytes: attachment.data.clone(),
            };
            if let Err(e) = self.target.add_attachment(parent, upload).await {
                warn!(uid, file = %attachment.filename, error = %e, "Failed to store email attachment");
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub fetched: usize,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct EmailPoller {
    connector: Arc<dyn MailboxConnector>,
    ingestor: EmailIngestor,
}

impl EmailPoller {
    #[must_use]
    pub fn new(connector: Arc<dyn MailboxConnector>, ingestor: EmailIngestor) -> Self {
        Self {
            connector,
            ingestor,
        }
    }

    /// One full poll. Per-message failures are logged and leave that message unseen.
    pub async fn poll_once(&self) -> Result<PollSummary, IngestError> {
        let started = Instant::now();
        let mut session = self.connector.connect().await.inspect_err(|_| {
            metrics::counter!("email_poll_failures_total", "stage" => "connect").increment(1);
        })?;

        let messages = match session.fetch_unseen().await {
            Ok(messages) => messages,
            Err(e) => {
                metrics::counter!("email_poll_failures_total", "stage" => "fetch").increment(1);
                if let Err(logout) = session.logout().await {
                    debug!(error = %logout, "Logout after failed fetch also failed");
                }
                return Err(e.into());
            }
        };

        let mut summary = PollSummary {
            fetched: messages.len(),
            ..PollSummary::default()
        };
        let mut seen: Vec<u32> = Vec::with_capacity(messages.len());

        for message in &messages {
            match self.ingestor.process_message(message.uid, &message.raw).await {
                Ok(outcome) => {
                    metrics::counter!("email_messages_processed_total", "outcome" => outcome.label())
                        .increment(1);
                    if outcome.marks_seen() {
                        summary.processed += 1;
                        seen.push(message.uid);
                    } else {
                        summary.skipped += 1;
                    }
                }
                Err(e) => {
                    metrics::counter!("email_messages_processed_total", "outcome" => "failed")
                        .increment(1);
                    warn!(uid = message.uid, error = %e, "Failed to process email, will retry");
                    summary.failed += 1;
                }
            }
        }

        if !seen.is_empty() {
            if let Err(e) = session.mark_seen(&seen).await {
                metrics::counter!("email_poll_failures_total", "stage" => "mark_seen").increment(1);
                warn!(count = seen.len(), error = %e, "Failed to flag processed messages as seen");
            }
        }

        if let Err(e) = session.logout().await {
            debug!(error = %e, "IMAP logout failed");
        }

        if summary.fetched > 0 {
            info!(
                fetched = summary.fetched,
                processed = summary.processed,
                skipped = summary.skipped,
                failed = summary.failed,
                duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                "Email poll finished"
            );
        }
        Ok(summary)
    }
}
