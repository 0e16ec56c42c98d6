use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, Order, QueryFilter,
    QueryOrder, Set, sea_query::Expr,
};
use tracing::warn;

use crate::domain::{Priority, TaskStatus};
use crate::entities::{prelude::*, tasks};
use crate::models::task::{NewTask, Task, TaskFilter, TaskSortField};

pub(crate) fn encode_tags(tags: &[String]) -> Result<String> {
    serde_json::to_string(tags).context("Failed to encode tags")
}

pub(crate) fn decode_tags(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

fn map_task(model: tasks::Model) -> Task {
    let status = model.status.parse().unwrap_or_else(|e| {
        warn!(task_id = model.id, error = %e, "Unknown stored status, treating as open");
        TaskStatus::Open
    });
    let priority = model
        .priority
        .as_deref()
        .and_then(|p| p.parse::<Priority>().ok());

    Task {
        id: model.id,
        name: model.name,
        description: model.description,
        status,
        priority,
        tags: decode_tags(&model.tags),
        email_message_id: model.email_message_id,
        created_at: model.created_at,
        updated_at: model.updated_at,
        resolved_at: model.resolved_at,
    }
}

const fn priority_rank(priority: Option<Priority>) -> u8 {
    match priority {
        None => 0,
        Some(Priority::Low) => 1,
        Some(Priority::Medium) => 2,
        Some(Priority::High) => 3,
        Some(Priority::Urgent) => 4,
    }
}

pub struct TaskRepository {
    conn: DatabaseConnection,
}

impl TaskRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn create(&self, new: &NewTask) -> Result<Task> {
        let created_at = new.created_at.unwrap_or_else(Utc::now);
        let resolved_at = (new.status == TaskStatus::Resolved).then_some(created_at);

        let active = tasks::ActiveModel {
            name: Set(new.name.clone()),
            description: Set(new.description.clone()),
            status: Set(new.status.as_str().to_string()),
            priority: Set(new.priority.map(|p| p.as_str().to_string())),
            tags: Set(encode_tags(&new.tags)?),
            email_message_id: Set(new.email_message_id.clone()),
            created_at: Set(created_at),
            updated_at: Set(created_at),
            resolved_at: Set(resolved_at),
            deleted_at: Set(None),
            ..Default::default()
        };

        let model = active
            .insert(&self.conn)
            .await
            .context("Failed to insert task")?;

        Ok(map_task(model))
    }

    pub async fn get(&self, id: i32) -> Result<Option<Task>> {
        let task = Tasks::find_by_id(id)
            .filter(tasks::Column::DeletedAt.is_null())
            .one(&self.conn)
            .await
            .context("Failed to query task by ID")?;

        Ok(task.map(map_task))
    }

    /// Point lookup on the indexed Message-ID column.
    pub async fn get_by_email_message_id(&self, message_id: &str) -> Result<Option<Task>> {
        if message_id.is_empty() {
            return Ok(None);
        }

        let task = Tasks::find()
            .filter(tasks::Column::EmailMessageId.eq(message_id))
            .filter(tasks::Column::DeletedAt.is_null())
            .order_by_asc(tasks::Column::Id)
            .one(&self.conn)
            .await
            .context("Failed to query task by email message ID")?;

        Ok(task.map(map_task))
    }

    /// All live tasks, most recently updated first.
    pub async fn list_all(&self) -> Result<Vec<Task>> {
        let rows = Tasks::find()
            .filter(tasks::Column::DeletedAt.is_null())
            .order_by_desc(tasks::Column::UpdatedAt)
            .order_by_desc(tasks::Column::Id)
            .all(&self.conn)
            .await
            .context("Failed to list tasks")?;

        Ok(rows.into_iter().map(map_task).collect())
    }

    pub async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let mut query = Tasks::find().filter(tasks::Column::DeletedAt.is_null());

        if let Some(status) = filter.status {
            query = query.filter(tasks::Column::Status.eq(status.as_str()));
        }
        if let Some(priority) = filter.priority {
            query = query.filter(tasks::Column::Priority.eq(priority.as_str()));
        }
        if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            query = query.filter(
                Condition::any()
                    .add(tasks::Column::Name.contains(search))
                    .add(tasks::Column::Description.contains(search)),
            );
        }

        let order = if filter.order.is_ascending() {
            Order::Asc
        } else {
            Order::Desc
        };
        let column = match filter.sort {
            TaskSortField::UpdatedAt | TaskSortField::Priority => tasks::Column::UpdatedAt,
            TaskSortField::CreatedAt => tasks::Column::CreatedAt,
            TaskSortField::Name => tasks::Column::Name,
            TaskSortField::Status => tasks::Column::Status,
        };
        query = query
            .order_by(column, order.clone())
            .order_by(tasks::Column::Id, order);

        let rows = query
            .all(&self.conn)
            .await
            .context("Failed to list tasks")?;

        let mut tasks: Vec<Task> = rows
            .into_iter()
            .map(map_task)
            .filter(|t| filter.tags.iter().all(|tag| t.has_tag(tag)))
            .collect();

        if filter.sort == TaskSortField::Priority {
            // Stable sort keeps updated_at order within equal priorities.
            tasks.sort_by_key(|t| priority_rank(t.priority));
            if !filter.order.is_ascending() {
                tasks.reverse();
            }
        }

        let offset = usize::try_from(filter.offset.unwrap_or(0)).unwrap_or(usize::MAX);
        let limit = filter
            .limit
            .map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX));

        Ok(tasks.into_iter().skip(offset).take(limit).collect())
    }

    /// Case-sensitive substring match on name or description.
    pub async fn search(&self, needle: &str) -> Result<Vec<Task>> {
        let rows = Tasks::find()
            .filter(tasks::Column::DeletedAt.is_null())
            .filter(
                Condition::any()
                    .add(tasks::Column::Name.contains(needle))
                    .add(tasks::Column::Description.contains(needle)),
            )
            .order_by_desc(tasks::Column::UpdatedAt)
            .order_by_desc(tasks::Column::Id)
            .all(&self.conn)
            .await
            .context("Failed to search tasks")?;

        Ok(rows.into_iter().map(map_task).collect())
    }

    /// Write every mutable column of `task`.
    pub async fn save(&self, task: &Task) -> Result<Task> {
        let existing = Tasks::find_by_id(task.id)
            .filter(tasks::Column::DeletedAt.is_null())
            .one(&self.conn)
            .await
            .context("Failed to query task for update")?
            .ok_or_else(|| anyhow::anyhow!("Task not found: {}", task.id))?;

        let mut active: tasks::ActiveModel = existing.into();
        active.name = Set(task.name.clone());
        active.description = Set(task.description.clone());
        active.status = Set(task.status.as_str().to_string());
        active.priority = Set(task.priority.map(|p| p.as_str().to_string()));
        active.tags = Set(encode_tags(&task.tags)?);
        active.updated_at = Set(task.updated_at);
        active.resolved_at = Set(task.resolved_at);

        let model = active.update(&self.conn).await?;
        Ok(map_task(model))
    }

    pub async fn touch(&self, id: i32, now: DateTime<Utc>) -> Result<()> {
        Tasks::update_many()
            .col_expr(tasks::Column::UpdatedAt, Expr::value(now))
            .filter(tasks::Column::Id.eq(id))
            .exec(&self.conn)
            .await
            .context("Failed to bump task updated_at")?;

        Ok(())
    }

    pub async fn soft_delete(&self, id: i32) -> Result<bool> {
        let now = Utc::now();
        let result = Tasks::update_many()
            .col_expr(tasks::Column::DeletedAt, Expr::value(Some(now)))
            .col_expr(tasks::Column::UpdatedAt, Expr::value(now))
            .filter(tasks::Column::Id.eq(id))
            .filter(tasks::Column::DeletedAt.is_null())
            .exec(&self.conn)
            .await
            .context("Failed to delete task")?;

        Ok(result.rows_affected > 0)
    }
}
