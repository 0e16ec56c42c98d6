use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set,
};

use crate::entities::{prelude::*, users};
use crate::models::user::{User, UserCredentials};

impl From<users::Model> for User {
    fn from(model: users::Model) -> Self {
        Self {
            id: model.id,
            username: model.username,
            email: model.email,
            totp_enabled: model.totp_enabled,
            is_active: model.is_active,
            last_login_at: model.last_login_at,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

impl From<users::Model> for UserCredentials {
    fn from(model: users::Model) -> Self {
        let password_hash = model.password_hash.clone();
        let totp_secret = model.totp_secret.clone();
        Self {
            user: User::from(model),
            password_hash,
            totp_secret,
        }
    }
}

/// Fields for a new user row.
#[derive(Debug, Clone)]
pub struct NewUser<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub password_hash: String,
    pub is_active: bool,
}

pub struct UserRepository {
    conn: DatabaseConnection,
}

impl UserRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    /// Users that may authenticate: active and not soft-deleted.
    fn live() -> Condition {
        Condition::all()
            .add(users::Column::IsActive.eq(true))
            .add(users::Column::DeletedAt.is_null())
    }

    pub async fn create(&self, new: NewUser<'_>) -> Result<User> {
        let now = Utc::now();
        let active = users::ActiveModel {
            username: Set(new.username.to_string()),
            email: Set(new.email.to_string()),
            password_hash: Set(new.password_hash),
            totp_secret: Set(None),
            totp_enabled: Set(false),
            is_active: Set(new.is_active),
            last_login_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            deleted_at: Set(None),
            ..Default::default()
        };

        let model = active
            .insert(&self.conn)
            .await
            .context("Failed to insert user")?;

        Ok(User::from(model))
    }

    /// True if any row, including deleted ones, holds the username or email.
    pub async fn username_or_email_taken(&self, username: &str, email: &str) -> Result<bool> {
        let count = Users::find()
            .filter(
                Condition::any()
                    .add(users::Column::Username.eq(username))
                    .add(users::Column::Email.eq(email)),
            )
            .count(&self.conn)
            .await
            .context("Failed to check for existing user")?;

        Ok(count > 0)
    }

    pub async fn get_by_id(&self, id: i32) -> Result<Option<User>> {
        let user = Users::find_by_id(id)
            .filter(Self::live())
            .one(&self.conn)
            .await
            .context("Failed to query user by ID")?;

        Ok(user.map(User::from))
    }

    pub async fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        let user = Users::find()
            .filter(users::Column::Username.eq(username))
            .filter(Self::live())
            .one(&self.conn)
            .await
            .context("Failed to query user by username")?;

        Ok(user.map(User::from))
    }

    pub async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = Users::find()
            .filter(users::Column::Email.eq(email))
            .filter(Self::live())
            .one(&self.conn)
            .await
            .context("Failed to query user by email")?;

        Ok(user.map(User::from))
    }

    pub async fn get_credentials_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserCredentials>> {
        let user = Users::find()
            .filter(users::Column::Username.eq(username))
            .filter(Self::live())
            .one(&self.conn)
            .await
            .context("Failed to query user credentials")?;

        Ok(user.map(UserCredentials::from))
    }

    pub async fn get_credentials_by_id(&self, id: i32) -> Result<Option<UserCredentials>> {
        let user = Users::find_by_id(id)
            .filter(Self::live())
            .one(&self.conn)
            .await
            .context("Failed to query user credentials")?;

        Ok(user.map(UserCredentials::from))
    }

    /// Active users, ordered by username.
    pub async fn list_active(&self) -> Result<Vec<User>> {
        let rows = Users::find()
            .filter(Self::live())
            .order_by_asc(users::Column::Username)
            .all(&self.conn)
            .await
            .context("Failed to list active users")?;

        Ok(rows.into_iter().map(User::from).collect())
    }

    /// Every user row regardless of `is_active` or deletion, ordered by username.
    pub async fn list_all(&self) -> Result<Vec<User>> {
        let rows = Users::find()
            .order_by_asc(users::Column::Username)
            .all(&self.conn)
            .await
            .context("Failed to list users")?;

        Ok(rows.into_iter().map(User::from).collect())
    }

    async fn find_live_model(&self, id: i32) -> Result<users::Model> {
        Users::find_by_id(id)
            .filter(Self::live())
            .one(&self.conn)
            .await
            .context("Failed to query user")?
            .ok_or_else(|| anyhow::anyhow!("User not found: {id}"))
    }

    pub async fn update_password(&self, id: i32, password_hash: String) -> Result<()> {
        let user = self.find_live_model(id).await?;

        let mut active: users::ActiveModel = user.into();
        active.password_hash = Set(password_hash);
        active.updated_at = Set(Utc::now());
        active.update(&self.conn).await?;

        Ok(())
    }

    /// Store a pending TOTP secret. Leaves `totp_enabled` untouched.
    pub async fn set_totp_secret(&self, id: i32, secret: &str) -> Result<()> {
        let user = self.find_live_model(id).await?;

        let mut active: users::ActiveModel = user.into();
        active.totp_secret = Set(Some(secret.to_string()));
        active.updated_at = Set(Utc::now());
        active.update(&self.conn).await?;

        Ok(())
    }

    pub async fn enable_totp(&self, id: i32) -> Result<()> {
        let user = self.find_live_model(id).await?;

        let mut active: users::ActiveModel = user.into();
        active.totp_enabled = Set(true);
        active.updated_at = Set(Utc::now());
        active.update(&self.conn).await?;

        Ok(())
    }

    /// Clear the secret and the enabled flag in a single UPDATE.
    pub async fn disable_totp(&self, id: i32) -> Result<()> {
        let user = self.find_live_model(id).await?;

        let mut active: users::ActiveModel = user.into();
        active.totp_secret = Set(None);
        active.totp_enabled = Set(false);
        active.updated_at = Set(Utc::now());
        active.update(&self.conn).await?;

        Ok(())
    }

    pub async fn record_login(&self, id: i32, at: DateTime<Utc>) -> Result<()> {
        let user = self.find_live_model(id).await?;

        let mut active: users::ActiveModel = user.into();
        active.last_login_at = Set(Some(at));
        active.update(&self.conn).await?;

        Ok(())
    }

    pub async fn soft_delete(&self, id: i32) -> Result<bool> {
        let Some(user) = Users::find_by_id(id)
            .filter(users::Column::DeletedAt.is_null())
            .one(&self.conn)
            .await
            .context("Failed to query user for deletion")?
        else {
            return Ok(false);
        };

        let now = Utc::now();
        let mut active: users::ActiveModel = user.into();
        active.is_active = Set(false);
        active.deleted_at = Set(Some(now));
        active.updated_at = Set(now);
        active.update(&self.conn).await?;

        Ok(true)
    }
}
