use anyhow::{Context, Result};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};

use crate::entities::{comments, prelude::*};
use crate::models::task::{Comment, NewComment};

impl From<comments::Model> for Comment {
    fn from(model: comments::Model) -> Self {
        Self {
            id: model.id,
            task_id: model.task_id,
            content: model.content,
            is_private: model.is_private,
            from_email: model.from_email,
            email_message_id: model.email_message_id,
            created_at: model.created_at,
        }
    }
}

pub struct CommentRepository {
    conn: DatabaseConnection,
}

impl CommentRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    /// Comments are stored private unconditionally.
    pub async fn create(&self, task_id: i32, comment: &NewComment) -> Result<Comment> {
        let active = comments::ActiveModel {
            task_id: Set(task_id),
            content: Set(comment.content.clone()),
            is_private: Set(true),
            from_email: Set(comment.from_email.clone()),
            email_message_id: Set(comment.email_message_id.clone()),
            created_at: Set(Utc::now()),
            ..Default::default()
        };

        let model = active
            .insert(&self.conn)
            .await
            .context("Failed to insert comment")?;

        Ok(Comment::from(model))
    }

    pub async fn get(&self, id: i32) -> Result<Option<Comment>> {
        let comment = Comments::find_by_id(id)
            .one(&self.conn)
            .await
            .context("Failed to query comment")?;

        Ok(comment.map(Comment::from))
    }

    /// Oldest first.
    pub async fn list_for_task(&self, task_id: i32) -> Result<Vec<Comment>> {
        let rows = Comments::find()
            .filter(comments::Column::TaskId.eq(task_id))
            .order_by_asc(comments::Column::CreatedAt)
            .order_by_asc(comments::Column::Id)
            .all(&self.conn)
            .await
            .context("Failed to list comments")?;

        Ok(rows.into_iter().map(Comment::from).collect())
    }

    pub async fn exists_for_message(&self, task_id: i32, message_id: &str) -> Result<bool> {
        let count = Comments::find()
            .filter(comments::Column::TaskId.eq(task_id))
            .filter(comments::Column::EmailMessageId.eq(message_id))
            .count(&self.conn)
            .await
            .context("Failed to check comment by message ID")?;

        Ok(count > 0)
    }

    pub async fn search(&self, needle: &str) -> Result<Vec<Comment>> {
        let rows = Comments::find()
            .filter(comments::Column::Content.contains(needle))
            .order_by_asc(comments::Column::CreatedAt)
            .order_by_asc(comments::Column::Id)
            .all(&self.conn)
            .await
            .context("Failed to search comments")?;

        Ok(rows.into_iter().map(Comment::from).collect())
    }
}
