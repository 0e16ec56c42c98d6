use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::HeaderValue,
    middleware,
    routing::{delete, get, patch, post, put},
};
use std::net::IpAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusHandle;

use crate::clients::smtp::{MailSender, SmtpMailer};
use crate::config::Config;
use crate::db::Store;
use crate::services::{
    AuthService, EmailNotificationDispatcher, NoopNotificationDispatcher, NotificationDispatcher,
    ReportService, SeaOrmAuthService, SeaOrmTaskService, TaskService,
};
use crate::storage::AttachmentStore;

pub mod auth;
mod error;
mod kanban;
mod observability;
mod reports;
mod saved_queries;
mod search;
mod tags;
mod tasks;
mod types;
mod users;
mod validation;

pub use error::{ApiError, ApiJson};
pub use types::*;

/// HTTP-only settings resolved from the configuration.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub secure_cookies: bool,
    pub max_upload_bytes: usize,
    pub cors_allowed_origins: Vec<String>,
    pub trusted_proxies: Vec<IpAddr>,
}

impl From<&Config> for ApiSettings {
    fn from(config: &Config) -> Self {
        Self {
            secure_cookies: config.secure_cookies,
            max_upload_bytes: config.max_upload_bytes,
            cors_allowed_origins: config.cors_allowed_origins.clone(),
            trusted_proxies: config.trusted_proxies.clone(),
        }
    }
}

pub struct AppState {
    pub store: Store,

    pub auth: Arc<dyn AuthService>,

    pub tasks: Arc<dyn TaskService>,

    pub reports: ReportService,

    pub settings: ApiSettings,

    pub prometheus_handle: Option<PrometheusHandle>,
}

/// Wires the domain services over `store`.
///
/// Notifications go out over SMTP when it is configured and are dropped otherwise.
pub fn create_app_state(
    config: &Config,
    store: Store,
    prometheus_handle: Option<PrometheusHandle>,
) -> anyhow::Result<Arc<AppState>> {
    let auth: Arc<dyn AuthService> = Arc::new(
        SeaOrmAuthService::new(store.clone(), &config.security)
            .context("Failed to initialize auth service")?,
    );

    let attachments = AttachmentStore::new(&config.attachments_dir).with_context(|| {
        format!(
            "Failed to open attachment directory {}",
            config.attachments_dir
        )
    })?;

    let notifier: Arc<dyn NotificationDispatcher> = if config.email.smtp_enabled() {
        let mailer: Arc<dyn MailSender> =
            Arc::new(SmtpMailer::new(&config.email).context("Failed to configure SMTP")?);
        tracing::info!(host = %config.email.smtp_host, "Email notifications enabled");
        Arc::new(EmailNotificationDispatcher::new(store.clone(), mailer))
    } else {
        tracing::info!("SMTP not configured, email notifications disabled");
        Arc::new(NoopNotificationDispatcher)
    };

    let tasks: Arc<dyn TaskService> = Arc::new(SeaOrmTaskService::new(
        store.clone(),
        attachments,
        notifier,
    ));

    Ok(Arc::new(AppState {
        reports: ReportService::new(store.clone()),
        store,
        auth,
        tasks,
        settings: ApiSettings::from(config),
        prometheus_handle,
    }))
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors_origins = state.settings.cors_allowed_origins.clone();

    let protected_routes = create_protected_router(state.clone());

    let api_router = Router::new()
        .merge(protected_routes)
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", post(auth::logout))
        .route("/health", get(observability::health))
        .route("/metrics", get(observability::get_metrics))
        .with_state(state);

    let cors_layer = if cors_origins.iter().any(|o| o == "*") {
        CorsLayer::new().allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> =
            cors_origins.iter().filter_map(|s| s.parse().ok()).collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_credentials(true)
    };

    Router::new()
        .nest("/api/v1", api_router)
        .layer(
            cors_layer
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::PUT,
                    axum::http::Method::PATCH,
                    axum::http::Method::DELETE,
                ])
                .allow_headers([
                    axum::http::header::CONTENT_TYPE,
                    axum::http::header::AUTHORIZATION,
                    axum::http::HeaderName::from_static("x-api-key"),
                ]),
        )
        .layer(middleware::from_fn(observability::security_headers_middleware))
        .layer(middleware::from_fn(observability::logging_middleware))
        .layer(TraceLayer::new_for_http())
}

fn create_protected_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let upload_limit = state.settings.max_upload_bytes;

    Router::new()
        .route("/auth/profile", get(auth::profile))
        .route("/auth/password", put(auth::change_password))
        .route("/auth/totp/setup", post(auth::totp_setup))
        .route("/auth/totp/enable", post(auth::totp_enable))
        .route(
            "/auth/totp/disable",
            post(auth::totp_disable).delete(auth::totp_disable),
        )
        .route(
            "/auth/api-keys",
            get(auth::list_api_keys).post(auth::create_api_key),
        )
        .route(
            "/auth/api-keys/{id}",
            delete(auth::revoke_api_key),
        )
        .route("/auth/sessions", get(auth::list_sessions))
        .route("/auth/sessions/all", delete(auth::logout_all))
        .route("/users", get(users::list_users).post(users::create_user))
        .route("/users/{id}", delete(users::delete_user))
        .route("/tasks", get(tasks::list_tasks).post(tasks::create_task))
        .route(
            "/tasks/{id}",
            get(tasks::get_task)
                .put(tasks::replace_task)
                .patch(tasks::patch_task)
                .delete(tasks::delete_task),
        )
        .route(
            "/tasks/{id}/time",
            get(tasks::list_time_entries).post(tasks::add_time_entry),
        )
        .route(
            "/tasks/{id}/comments",
            get(tasks::list_comments).post(tasks::add_comment),
        )
        .route(
            "/tasks/{id}/subtasks",
            get(tasks::list_subtasks).post(tasks::add_subtask),
        )
        .route(
            "/tasks/{id}/subtasks/{sid}/toggle",
            patch(tasks::toggle_subtask),
        )
        .route(
            "/tasks/{id}/subtasks/{sid}",
            delete(tasks::delete_subtask),
        )
        .route("/tasks/{id}/subscribers", get(tasks::list_subscribers))
        .route(
            "/tasks/{id}/attachments",
            get(tasks::list_attachments)
                .post(tasks::upload_attachment)
                .layer(DefaultBodyLimit::max(upload_limit.saturating_add(64 * 1024))),
        )
        .route("/attachments/{id}", get(tasks::download_attachment))
        .route("/tags", get(tags::list_tags))
        .route("/tags/{tag}/tasks", get(tags::tasks_by_tag))
        .route("/search", get(search::search))
        .route("/kanban", get(kanban::board))
        .route("/kanban/{tag}", get(kanban::board_for_tag))
        .route(
            "/saved-queries",
            get(saved_queries::list_saved_queries).post(saved_queries::create_saved_query),
        )
        .route(
            "/saved-queries/{id}",
            get(saved_queries::get_saved_query)
                .put(saved_queries::update_saved_query)
                .delete(saved_queries::delete_saved_query),
        )
        .route(
            "/saved-queries/{id}/tasks",
            get(saved_queries::saved_query_tasks),
        )
        .route(
            "/reports/time-breakdown",
            get(reports::time_breakdown),
        )
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::auth_middleware,
        ))
}
