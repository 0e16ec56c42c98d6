use anyhow::{Context, Result};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};

use crate::entities::{prelude::*, subtasks};
use crate::models::task::Subtask;

impl From<subtasks::Model> for Subtask {
    fn from(model: subtasks::Model) -> Self {
        Self {
            id: model.id,
            task_id: model.task_id,
            name: model.name,
            completed: model.completed,
            created_at: model.created_at,
        }
    }
}

pub struct SubtaskRepository {
    conn: DatabaseConnection,
}

impl SubtaskRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn create(&self, task_id: i32, name: &str) -> Result<Subtask> {
        let active = subtasks::ActiveModel {
            task_id: Set(task_id),
            name: Set(name.to_string()),
            completed: Set(false),
            created_at: Set(Utc::now()),
            ..Default::default()
        };

        let model = active
            .insert(&self.conn)
            .await
            .context("Failed to insert subtask")?;

        Ok(Subtask::from(model))
    }

    pub async fn list_for_task(&self, task_id: i32) -> Result<Vec<Subtask>> {
        let rows = Subtasks::find()
            .filter(subtasks::Column::TaskId.eq(task_id))
            .order_by_asc(subtasks::Column::CreatedAt)
            .order_by_asc(subtasks::Column::Id)
            .all(&self.conn)
            .await
            .context("Failed to list subtasks")?;

        Ok(rows.into_iter().map(Subtask::from).collect())
    }

    /// Flip completion of a subtask belonging to `task_id`.
    pub async fn toggle(&self, task_id: i32, id: i32) -> Result<Option<Subtask>> {
        let Some(model) = Subtasks::find_by_id(id)
            .filter(subtasks::Column::TaskId.eq(task_id))
            .one(&self.conn)
            .await
            .context("Failed to query subtask")?
        else {
            return Ok(None);
        };

        let completed = !model.completed;
        let mut active: subtasks::ActiveModel = model.into();
        active.completed = Set(completed);
        let model = active.update(&self.conn).await?;

        Ok(Some(Subtask::from(model)))
    }

    pub async fn delete(&self, task_id: i32, id: i32) -> Result<bool> {
        let result = Subtasks::delete_many()
            .filter(subtasks::Column::Id.eq(id))
            .filter(subtasks::Column::TaskId.eq(task_id))
            .exec(&self.conn)
            .await
            .context("Failed to delete subtask")?;

        Ok(result.rows_affected > 0)
    }
}
