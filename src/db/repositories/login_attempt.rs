use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, Set,
};

use crate::entities::{login_attempts, prelude::*};

pub struct LoginAttemptRepository {
    conn: DatabaseConnection,
}

impl LoginAttemptRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn record(&self, username: &str, ip_address: &str, success: bool) -> Result<()> {
        let active = login_attempts::ActiveModel {
            username: Set(username.to_string()),
            ip_address: Set(ip_address.to_string()),
            success: Set(success),
            created_at: Set(Utc::now()),
            ..Default::default()
        };

        active
            .insert(&self.conn)
            .await
            .context("Failed to record login attempt")?;

        Ok(())
    }

    pub async fn count_failed_for_username(
        &self,
        username: &str,
        since: DateTime<Utc>,
    ) -> Result<u64> {
        LoginAttempts::find()
            .filter(login_attempts::Column::Username.eq(username))
            .filter(login_attempts::Column::Success.eq(false))
            .filter(login_attempts::Column::CreatedAt.gt(since))
            .count(&self.conn)
            .await
            .context("Failed to count failed attempts by username")
    }

    pub async fn count_failed_for_ip(&self, ip_address: &str, since: DateTime<Utc>) -> Result<u64> {
        LoginAttempts::find()
            .filter(login_attempts::Column::IpAddress.eq(ip_address))
            .filter(login_attempts::Column::Success.eq(false))
            .filter(login_attempts::Column::CreatedAt.gt(since))
            .count(&self.conn)
            .await
            .context("Failed to count failed attempts by IP")
    }

    pub async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = LoginAttempts::delete_many()
            .filter(login_attempts::Column::CreatedAt.lt(cutoff))
            .exec(&self.conn)
            .await
            .context("Failed to delete old login attempts")?;

        Ok(result.rows_affected)
    }
}
