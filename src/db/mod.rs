use anyhow::{Context, Result};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub mod migrator;
pub mod repositories;

pub use repositories::api_key::ApiKeyCandidate;
pub use repositories::user::NewUser;

#[derive(Clone)]
pub struct Store {
    pub conn: DatabaseConnection,
}

impl Store {
    pub async fn new(db_url: &str) -> Result<Self> {
        Self::with_pool_options(db_url, 5, 1).await
    }

    pub async fn with_pool_options(
        db_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self> {
        use sea_orm_migration::MigratorTrait;

        if let Some(path) = sqlite_file_path(db_url) {
            if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            if !Path::new(path).exists() {
                std::fs::File::create(path)
                    .with_context(|| format!("Failed to create database file {path}"))?;
            }
        }

        let mut opt = ConnectOptions::new(db_url.to_string());
        opt.max_connections(max_connections)
            .min_connections(min_connections)
            .connect_timeout(Duration::from_secs(10))
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(300))
            .max_lifetime(Duration::from_secs(600))
            .sqlx_logging(false);

        let conn = Database::connect(opt)
            .await
            .context("Failed to connect to database")?;

        migrator::Migrator::up(&conn, None)
            .await
            .context("Failed to apply migrations")?;

        info!(
            "Database connected & migrations applied (pool: {}-{})",
            min_connections, max_connections
        );

        Ok(Self { conn })
    }

    pub async fn ping(&self) -> Result<()> {
        let backend = self.conn.get_database_backend();
        self.conn
            .query_one(Statement::from_string(backend, "SELECT 1".to_string()))
            .await?;
        Ok(())
    }

    #[must_use]
    pub fn users(&self) -> repositories::user::UserRepository {
        repositories::user::UserRepository::new(self.conn.clone())
    }

    #[must_use]
    pub fn sessions(&self) -> repositories::session::SessionRepository {
        repositories::session::SessionRepository::new(self.conn.clone())
    }

    #[must_use]
    pub fn api_keys(&self) -> repositories::api_key::ApiKeyRepository {
        repositories::api_key::ApiKeyRepository::new(self.conn.clone())
    }

    #[must_use]
    pub fn login_attempts(&self) -> repositories::login_attempt::LoginAttemptRepository {
        repositories::login_attempt::LoginAttemptRepository::new(self.conn.clone())
    }

    #[must_use]
    pub fn tasks(&self) -> repositories::task::TaskRepository {
        repositories::task::TaskRepository::new(self.conn.clone())
    }

    #[must_use]
    pub fn subtasks(&self) -> repositories::subtask::SubtaskRepository {
        repositories::subtask::SubtaskRepository::new(self.conn.clone())
    }

    #[must_use]
    pub fn time_entries(&self) -> repositories::time_entry::TimeEntryRepository {
        repositories::time_entry::TimeEntryRepository::new(self.conn.clone())
    }

    #[must_use]
    pub fn comments(&self) -> repositories::comment::CommentRepository {
        repositories::comment::CommentRepository::new(self.conn.clone())
    }

    #[must_use]
    pub fn attachments(&self) -> repositories::attachment::AttachmentRepository {
        repositories::attachment::AttachmentRepository::new(self.conn.clone())
    }

    #[must_use]
    pub fn saved_queries(&self) -> repositories::saved_query::SavedQueryRepository {
        repositories::saved_query::SavedQueryRepository::new(self.conn.clone())
    }

    #[must_use]
    pub fn subscribers(&self) -> repositories::subscriber::SubscriberRepository {
        repositories::subscriber::SubscriberRepository::new(self.conn.clone())
    }
}

/// Filesystem path of a file-backed SQLite URL, `None` for in-memory or other backends.
fn sqlite_file_path(db_url: &str) -> Option<&str> {
    let rest = db_url
        .strip_prefix("sqlite://")
        .or_else(|| db_url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next().unwrap_or(rest);
    if path.is_empty() || path == ":memory:" {
        None
    } else {
        Some(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_paths() {
        assert_eq!(
            sqlite_file_path("sqlite:data/jats.db?mode=rwc"),
            Some("data/jats.db")
        );
        assert_eq!(sqlite_file_path("sqlite:///tmp/x.db"), Some("/tmp/x.db"));
        assert_eq!(sqlite_file_path("sqlite::memory:"), None);
        assert_eq!(sqlite_file_path("postgres://db/jats"), None);
    }

    #[tokio::test]
    async fn subscriber_insert_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("t.db").display());
        let store = Store::new(&url).await.unwrap();

        let task = store
            .tasks()
            .create(&crate::models::task::NewTask::named("T"))
            .await
            .unwrap();

        store.subscribers().add(task.id, "a@x").await.unwrap();
        store.subscribers().add(task.id, "a@x").await.unwrap();
        store.subscribers().add(task.id, "b@x").await.unwrap();

        let subs = store.subscribers().list_for_task(task.id).await.unwrap();
        let emails: Vec<_> = subs.iter().map(|s| s.email.as_str()).collect();
        assert_eq!(emails, vec!["a@x", "b@x"]);
    }

    #[tokio::test]
    async fn get_all_users_ignores_active_flag() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("t.db").display());
        let store = Store::new(&url).await.unwrap();

        store
            .users()
            .create(NewUser {
                username: "bob",
                email: "bob@x",
                password_hash: "h".to_string(),
                is_active: false,
            })
            .await
            .unwrap();
        store
            .users()
            .create(NewUser {
                username: "alice",
                email: "alice@x",
                password_hash: "h".to_string(),
                is_active: true,
            })
            .await
            .unwrap();

        let all: Vec<_> = store
            .users()
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.username)
            .collect();
        assert_eq!(all, vec!["alice", "bob"]);

        assert!(store.users().get_by_email("bob@x").await.unwrap().is_none());
        assert!(store.users().get_by_email("alice@x").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn deleted_tasks_are_invisible() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("t.db").display());
        let store = Store::new(&url).await.unwrap();

        let mut new = crate::models::task::NewTask::named("from mail");
        new.email_message_id = "<m1@x>".to_string();
        let task = store.tasks().create(&new).await.unwrap();

        assert!(
            store
                .tasks()
                .get_by_email_message_id("<m1@x>")
                .await
                .unwrap()
                .is_some()
        );
        assert!(store.tasks().soft_delete(task.id).await.unwrap());
        assert!(store.tasks().get(task.id).await.unwrap().is_none());
        assert!(
            store
                .tasks()
                .get_by_email_message_id("<m1@x>")
                .await
                .unwrap()
                .is_none()
        );
    }
}
