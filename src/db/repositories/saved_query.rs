use anyhow::{Context, Result};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};

use super::task::{decode_tags, encode_tags};
use crate::entities::{prelude::*, saved_queries};
use crate::models::saved_query::{SavedQuery, SavedQueryInput};
use crate::models::task::normalize_tags;

impl From<saved_queries::Model> for SavedQuery {
    fn from(model: saved_queries::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            included_tags: decode_tags(&model.included_tags),
            excluded_tags: decode_tags(&model.excluded_tags),
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

pub struct SavedQueryRepository {
    conn: DatabaseConnection,
}

impl SavedQueryRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn create(&self, input: &SavedQueryInput) -> Result<SavedQuery> {
        let now = Utc::now();
        let active = saved_queries::ActiveModel {
            name: Set(input.name.trim().to_string()),
            included_tags: Set(encode_tags(&normalize_tags(&input.included_tags))?),
            excluded_tags: Set(encode_tags(&normalize_tags(&input.excluded_tags))?),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };

        let model = active
            .insert(&self.conn)
            .await
            .context("Failed to insert saved query")?;

        Ok(SavedQuery::from(model))
    }

    pub async fn get(&self, id: i32) -> Result<Option<SavedQuery>> {
        let query = SavedQueries::find_by_id(id)
            .one(&self.conn)
            .await
            .context("Failed to query saved query")?;

        Ok(query.map(SavedQuery::from))
    }

    /// Fetch by IDs, returned in the order the IDs were given. Missing IDs are skipped.
    pub async fn get_many(&self, ids: &[i32]) -> Result<Vec<SavedQuery>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = SavedQueries::find()
            .filter(saved_queries::Column::Id.is_in(ids.to_vec()))
            .all(&self.conn)
            .await
            .context("Failed to query saved queries")?;

        let mut by_id: std::collections::HashMap<i32, SavedQuery> = rows
            .into_iter()
            .map(|m| (m.id, SavedQuery::from(m)))
            .collect();

        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    /// Ordered by name.
    pub async fn list(&self) -> Result<Vec<SavedQuery>> {
        let rows = SavedQueries::find()
            .order_by_asc(saved_queries::Column::Name)
            .order_by_asc(saved_queries::Column::Id)
            .all(&self.conn)
            .await
            .context("Failed to list saved queries")?;

        Ok(rows.into_iter().map(SavedQuery::from).collect())
    }

    pub async fn update(&self, id: i32, input: &SavedQueryInput) -> Result<Option<SavedQuery>> {
        let Some(model) = SavedQueries::find_by_id(id)
            .one(&self.conn)
            .await
            .context("Failed to query saved query for update")?
        else {
            return Ok(None);
        };

        let mut active: saved_queries::ActiveModel = model.into();
        active.name = Set(input.name.trim().to_string());
        active.included_tags = Set(encode_tags(&normalize_tags(&input.included_tags))?);
        active.excluded_tags = Set(encode_tags(&normalize_tags(&input.excluded_tags))?);
        active.updated_at = Set(Utc::now());
        let model = active.update(&self.conn).await?;

        Ok(Some(SavedQuery::from(model)))
    }

    pub async fn delete(&self, id: i32) -> Result<bool> {
        let result = SavedQueries::delete_many()
            .filter(saved_queries::Column::Id.eq(id))
            .exec(&self.conn)
            .await
            .context("Failed to delete saved query")?;

        Ok(result.rows_affected > 0)
    }
}
