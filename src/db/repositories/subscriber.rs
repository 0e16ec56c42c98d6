use anyhow::{Context, Result};
use chrono::Utc;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    sea_query::OnConflict,
};

use crate::entities::{prelude::*, task_subscribers};
use crate::models::task::Subscriber;

impl From<task_subscribers::Model> for Subscriber {
    fn from(model: task_subscribers::Model) -> Self {
        Self {
            id: model.id,
            task_id: model.task_id,
            email: model.email,
            created_at: model.created_at,
        }
    }
}

pub struct SubscriberRepository {
    conn: DatabaseConnection,
}

impl SubscriberRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    /// Idempotent: a second `(task_id, email)` insert is coalesced into the existing row.
    pub async fn add(&self, task_id: i32, email: &str) -> Result<()> {
        let active = task_subscribers::ActiveModel {
            task_id: Set(task_id),
            email: Set(email.to_string()),
            created_at: Set(Utc::now()),
            ..Default::default()
        };

        TaskSubscribers::insert(active)
            .on_conflict(
                OnConflict::columns([
                    task_subscribers::Column::TaskId,
                    task_subscribers::Column::Email,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(&self.conn)
            .await
            .context("Failed to add task subscriber")?;

        Ok(())
    }

    pub async fn list_for_task(&self, task_id: i32) -> Result<Vec<Subscriber>> {
        let rows = TaskSubscribers::find()
            .filter(task_subscribers::Column::TaskId.eq(task_id))
            .order_by_asc(task_subscribers::Column::Email)
            .all(&self.conn)
            .await
            .context("Failed to list task subscribers")?;

        Ok(rows.into_iter().map(Subscriber::from).collect())
    }
}
