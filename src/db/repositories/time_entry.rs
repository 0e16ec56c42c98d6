use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};

use crate::entities::{prelude::*, time_entries};
use crate::models::task::{NewTimeEntry, TimeEntry};

impl From<time_entries::Model> for TimeEntry {
    fn from(model: time_entries::Model) -> Self {
        Self {
            id: model.id,
            task_id: model.task_id,
            description: model.description,
            duration_minutes: model.duration_minutes,
            created_at: model.created_at,
        }
    }
}

pub struct TimeEntryRepository {
    conn: DatabaseConnection,
}

impl TimeEntryRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn create(&self, task_id: i32, entry: &NewTimeEntry) -> Result<TimeEntry> {
        let active = time_entries::ActiveModel {
            task_id: Set(task_id),
            description: Set(entry.description.clone()),
            duration_minutes: Set(entry.duration_minutes),
            created_at: Set(entry.created_at.unwrap_or_else(Utc::now)),
            ..Default::default()
        };

        let model = active
            .insert(&self.conn)
            .await
            .context("Failed to insert time entry")?;

        Ok(TimeEntry::from(model))
    }

    pub async fn list_for_task(&self, task_id: i32) -> Result<Vec<TimeEntry>> {
        let rows = TimeEntries::find()
            .filter(time_entries::Column::TaskId.eq(task_id))
            .order_by_asc(time_entries::Column::CreatedAt)
            .order_by_asc(time_entries::Column::Id)
            .all(&self.conn)
            .await
            .context("Failed to list time entries")?;

        Ok(rows.into_iter().map(TimeEntry::from).collect())
    }

    /// Entries with `start <= created_at <= end`.
    pub async fn list_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TimeEntry>> {
        let rows = TimeEntries::find()
            .filter(time_entries::Column::CreatedAt.gte(start))
            .filter(time_entries::Column::CreatedAt.lte(end))
            .order_by_asc(time_entries::Column::CreatedAt)
            .order_by_asc(time_entries::Column::Id)
            .all(&self.conn)
            .await
            .context("Failed to list time entries in range")?;

        Ok(rows.into_iter().map(TimeEntry::from).collect())
    }
}
