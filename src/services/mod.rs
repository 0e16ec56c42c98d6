pub mod auth_service;
pub mod auth_service_impl;
pub use auth_service::{
    AuthError, AuthService, CleanupReport, CreatedApiKey, LoginOutcome, LoginRequest,
    NewUserRequest, TotpSetup,
};
pub use auth_service_impl::SeaOrmAuthService;

pub mod task_service;
pub mod task_service_impl;
pub use task_service::{
    AttachmentContent, KanbanBoard, KanbanColumn, NewAttachment, TagCount, TaskError, TaskService,
};
pub use task_service_impl::SeaOrmTaskService;

pub mod report;
pub use report::{Report, ReportError, ReportRequest, ReportService};

pub mod notification;
pub use notification::{
    EmailNotificationDispatcher, NoopNotificationDispatcher, NotificationDispatcher,
};

pub mod email_ingest;
pub use email_ingest::{
    EmailIngestor, EmailPoller, IngestError, IngestTarget, ServiceIngestTarget,
};

pub mod scheduler;
pub use scheduler::{AuthCleanupJob, EmailPollJob, Job, Scheduler};
