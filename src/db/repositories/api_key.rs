use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    sea_query::Expr,
};
use tracing::warn;

use crate::domain::Permission;
use crate::entities::{api_keys, prelude::*};
use crate::models::auth::ApiKey;

fn decode_permissions(raw: &str) -> Vec<Permission> {
    let names: Vec<String> = serde_json::from_str(raw).unwrap_or_default();
    names
        .iter()
        .filter_map(|name| match name.parse() {
            Ok(p) => Some(p),
            Err(e) => {
                warn!(permission = %name, error = %e, "Ignoring unknown stored permission");
                None
            }
        })
        .collect()
}

impl From<api_keys::Model> for ApiKey {
    fn from(model: api_keys::Model) -> Self {
        Self {
            id: model.id,
            user_id: model.user_id,
            name: model.name,
            key_prefix: model.key_prefix,
            permissions: decode_permissions(&model.permissions),
            is_active: model.is_active,
            expires_at: model.expires_at,
            last_used_at: model.last_used_at,
            created_at: model.created_at,
        }
    }
}

/// Key candidate for verification: record plus its stored hash.
#[derive(Debug, Clone)]
pub struct ApiKeyCandidate {
    pub key: ApiKey,
    pub key_hash: String,
}

pub struct ApiKeyRepository {
    conn: DatabaseConnection,
}

impl ApiKeyRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn create(
        &self,
        user_id: i32,
        name: &str,
        key_hash: String,
        key_prefix: &str,
        permissions: &[Permission],
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<ApiKey> {
        let names: Vec<&str> = permissions.iter().map(Permission::as_str).collect();
        let now = Utc::now();

        let active = api_keys::ActiveModel {
            user_id: Set(user_id),
            name: Set(name.to_string()),
            key_hash: Set(key_hash),
            key_prefix: Set(key_prefix.to_string()),
            permissions: Set(serde_json::to_string(&names)?),
            is_active: Set(true),
            expires_at: Set(expires_at),
            last_used_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            deleted_at: Set(None),
            ..Default::default()
        };

        let model = active
            .insert(&self.conn)
            .await
            .context("Failed to insert API key")?;

        Ok(ApiKey::from(model))
    }

    /// Active, non-deleted keys sharing `prefix`. Expiry is left to the caller.
    pub async fn find_active_by_prefix(&self, prefix: &str) -> Result<Vec<ApiKeyCandidate>> {
        let rows = ApiKeys::find()
            .filter(api_keys::Column::KeyPrefix.eq(prefix))
            .filter(api_keys::Column::IsActive.eq(true))
            .filter(api_keys::Column::DeletedAt.is_null())
            .order_by_asc(api_keys::Column::Id)
            .all(&self.conn)
            .await
            .context("Failed to query API keys by prefix")?;

        Ok(rows
            .into_iter()
            .map(|model| {
                let key_hash = model.key_hash.clone();
                ApiKeyCandidate {
                    key: ApiKey::from(model),
                    key_hash,
                }
            })
            .collect())
    }

    pub async fn touch(&self, id: i32, now: DateTime<Utc>) -> Result<()> {
        ApiKeys::update_many()
            .col_expr(api_keys::Column::LastUsedAt, Expr::value(Some(now)))
            .filter(api_keys::Column::Id.eq(id))
            .exec(&self.conn)
            .await
            .context("Failed to update API key last_used_at")?;

        Ok(())
    }

    pub async fn list_for_user(&self, user_id: i32) -> Result<Vec<ApiKey>> {
        let rows = ApiKeys::find()
            .filter(api_keys::Column::UserId.eq(user_id))
            .filter(api_keys::Column::DeletedAt.is_null())
            .order_by_desc(api_keys::Column::CreatedAt)
            .all(&self.conn)
            .await
            .context("Failed to list API keys")?;

        Ok(rows.into_iter().map(ApiKey::from).collect())
    }

    /// Deactivate a key owned by `user_id`. Returns false when no such key exists.
    pub async fn revoke(&self, id: i32, user_id: i32) -> Result<bool> {
        let result = ApiKeys::update_many()
            .col_expr(api_keys::Column::IsActive, Expr::value(false))
            .col_expr(api_keys::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(api_keys::Column::Id.eq(id))
            .filter(api_keys::Column::UserId.eq(user_id))
            .filter(api_keys::Column::DeletedAt.is_null())
            .exec(&self.conn)
            .await
            .context("Failed to revoke API key")?;

        Ok(result.rows_affected > 0)
    }

    pub async fn soft_delete_for_user(&self, user_id: i32) -> Result<u64> {
        let now = Utc::now();
        let result = ApiKeys::update_many()
            .col_expr(api_keys::Column::IsActive, Expr::value(false))
            .col_expr(api_keys::Column::DeletedAt, Expr::value(Some(now)))
            .col_expr(api_keys::Column::UpdatedAt, Expr::value(now))
            .filter(api_keys::Column::UserId.eq(user_id))
            .filter(api_keys::Column::DeletedAt.is_null())
            .exec(&self.conn)
            .await
            .context("Failed to delete user API keys")?;

        Ok(result.rows_affected)
    }
}
