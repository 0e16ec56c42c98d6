pub mod api;
pub mod cli;
pub mod clients;
pub mod config;
pub mod db;
pub mod domain;
pub mod entities;
pub mod models;
pub mod parser;
pub mod security;
pub mod services;
pub mod storage;

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

use anyhow::Context;
use api::AppState;
use cli::Cli;
use clients::imap::{ImapConnector, ImapSettings, MailboxConnector};
pub use config::Config;
use db::Store;
use services::{
    AuthCleanupJob, AuthService, EmailIngestor, EmailPollJob, EmailPoller, IngestTarget,
    Scheduler, SeaOrmAuthService, ServiceIngestTarget,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse_args();
    let config = Config::load(cli.config.as_deref())?;
    config.validate()?;

    init_tracing(&config)?;

    let store = Store::with_pool_options(
        &config.database_url(),
        config.max_db_connections,
        config.min_db_connections,
    )
    .await
    .context("Failed to open database")?;

    if cli.list_users {
        let auth = SeaOrmAuthService::new(store, &config.security)?;
        return cli::cmd_list_users(&auth).await;
    }

    if let Some(username) = cli.reset_password.as_deref() {
        let auth = SeaOrmAuthService::new(store, &config.security)?;
        return cli::cmd_reset_password(&auth, username).await;
    }

    let prometheus_handle = if config.observability.metrics_enabled {
        use metrics_exporter_prometheus::PrometheusBuilder;
        let builder = PrometheusBuilder::new();
        let handle = builder
            .install_recorder()
            .context("Failed to install Prometheus recorder")?;
        info!("Prometheus metrics recorder initialized");
        Some(handle)
    } else {
        None
    };

    serve(config, store, prometheus_handle).await
}

fn init_tracing(config: &Config) -> anyhow::Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    // stdout stays clean for CLI output such as --list-users
    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    if config.observability.loki_enabled {
        let url = url::Url::parse(&config.observability.loki_url).context("Invalid Loki URL")?;

        let mut builder = tracing_loki::builder();
        for (key, value) in &config.observability.loki_labels {
            builder = builder.label(key.clone(), value.clone())?;
        }
        let (layer, task) = builder
            .extra_field("pid", std::process::id().to_string())?
            .build_url(url)?;

        tokio::spawn(task);

        registry.with(layer).init();
        info!(
            "Loki logging initialized at {}",
            config.observability.loki_url
        );
    } else {
        registry.init();
    }

    Ok(())
}

/// Background jobs: session cleanup always, IMAP polling when configured.
pub fn build_scheduler(config: &Config, state: &AppState) -> anyhow::Result<Scheduler> {
    let auth: Arc<dyn AuthService> = state.auth.clone();
    let mut scheduler = Scheduler::new().with_job(Arc::new(AuthCleanupJob::new(
        auth,
        config.security.cleanup_interval()?,
    )));

    if config.email.imap_enabled() {
        let connector: Arc<dyn MailboxConnector> =
            Arc::new(ImapConnector::new(ImapSettings::from(&config.email)));
        let target: Arc<dyn IngestTarget> = Arc::new(ServiceIngestTarget::new(
            state.store.clone(),
            state.tasks.clone(),
        ));
        let poller = Arc::new(EmailPoller::new(connector, EmailIngestor::new(target)));

        scheduler = scheduler.with_job(Arc::new(EmailPollJob::new(
            poller,
            config.email.poll_interval()?,
        )));
        info!(
            host = %config.email.imap_host,
            folder = %config.email.imap_inbox_folder,
            "Email ingestion enabled"
        );
    } else {
        info!("IMAP not configured, email ingestion disabled");
    }

    Ok(scheduler)
}

async fn serve(
    config: Config,
    store: Store,
    prometheus_handle: Option<metrics_exporter_prometheus::PrometheusHandle>,
) -> anyhow::Result<()> {
    info!("JATS v{} starting...", env!("CARGO_PKG_VERSION"));

    let state = api::create_app_state(&config, store, prometheus_handle)?;

    let scheduler = build_scheduler(&config, &state)?;
    scheduler.start().await;

    let app = api::router(state);
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Web server running at http://{}", addr);

    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    scheduler.stop().await;
    info!("Server stopped");

    served.context("Web server error")
}

async fn shutdown_signal() {
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Shutdown signal received");
        }
        Err(e) => {
            error!("Error listening for shutdown: {}", e);
        }
    }
}
