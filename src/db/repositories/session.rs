use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    sea_query::Expr,
};

use crate::entities::{prelude::*, sessions};
use crate::models::auth::Session;

impl From<sessions::Model> for Session {
    fn from(model: sessions::Model) -> Self {
        Self {
            id: model.id,
            user_id: model.user_id,
            token: model.token,
            user_agent: model.user_agent,
            ip_address: model.ip_address,
            expires_at: model.expires_at,
            last_used_at: model.last_used_at,
            created_at: model.created_at,
        }
    }
}

pub struct SessionRepository {
    conn: DatabaseConnection,
}

impl SessionRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn create(
        &self,
        user_id: i32,
        token: &str,
        user_agent: &str,
        ip_address: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Session> {
        let now = Utc::now();
        let active = sessions::ActiveModel {
            user_id: Set(user_id),
            token: Set(token.to_string()),
            user_agent: Set(user_agent.to_string()),
            ip_address: Set(ip_address.to_string()),
            expires_at: Set(expires_at),
            last_used_at: Set(now),
            created_at: Set(now),
            deleted_at: Set(None),
            ..Default::default()
        };

        let model = active
            .insert(&self.conn)
            .await
            .context("Failed to insert session")?;

        Ok(Session::from(model))
    }

    /// Lookup by token, ignoring deleted sessions and those expired at `now`.
    pub async fn find_valid(&self, token: &str, now: DateTime<Utc>) -> Result<Option<Session>> {
        let session = Sessions::find()
            .filter(sessions::Column::Token.eq(token))
            .filter(sessions::Column::DeletedAt.is_null())
            .filter(sessions::Column::ExpiresAt.gt(now))
            .one(&self.conn)
            .await
            .context("Failed to query session by token")?;

        Ok(session.map(Session::from))
    }

    pub async fn touch(&self, id: i32, now: DateTime<Utc>) -> Result<()> {
        Sessions::update_many()
            .col_expr(sessions::Column::LastUsedAt, Expr::value(now))
            .filter(sessions::Column::Id.eq(id))
            .exec(&self.conn)
            .await
            .context("Failed to update session last_used_at")?;

        Ok(())
    }

    pub async fn list_for_user(&self, user_id: i32, now: DateTime<Utc>) -> Result<Vec<Session>> {
        let rows = Sessions::find()
            .filter(sessions::Column::UserId.eq(user_id))
            .filter(sessions::Column::DeletedAt.is_null())
            .filter(sessions::Column::ExpiresAt.gt(now))
            .order_by_desc(sessions::Column::CreatedAt)
            .all(&self.conn)
            .await
            .context("Failed to list sessions")?;

        Ok(rows.into_iter().map(Session::from).collect())
    }

    pub async fn soft_delete_by_token(&self, token: &str) -> Result<bool> {
        let result = Sessions::update_many()
            .col_expr(sessions::Column::DeletedAt, Expr::value(Some(Utc::now())))
            .filter(sessions::Column::Token.eq(token))
            .filter(sessions::Column::DeletedAt.is_null())
            .exec(&self.conn)
            .await
            .context("Failed to delete session")?;

        Ok(result.rows_affected > 0)
    }

    pub async fn soft_delete_for_user(&self, user_id: i32) -> Result<u64> {
        let result = Sessions::update_many()
            .col_expr(sessions::Column::DeletedAt, Expr::value(Some(Utc::now())))
            .filter(sessions::Column::UserId.eq(user_id))
            .filter(sessions::Column::DeletedAt.is_null())
            .exec(&self.conn)
            .await
            .context("Failed to delete user sessions")?;

        Ok(result.rows_affected)
    }

    /// Remove sessions that expired at or before `now`.
    pub async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = Sessions::delete_many()
            .filter(sessions::Column::ExpiresAt.lte(now))
            .exec(&self.conn)
            .await
            .context("Failed to delete expired sessions")?;

        Ok(result.rows_affected)
    }
}
