use anyhow::{Context, Result};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};

use crate::entities::{attachments, comments, prelude::*};
use crate::models::attachment::{Attachment, AttachmentParent, StoredFile};

impl TryFrom<attachments::Model> for Attachment {
    type Error = anyhow::Error;

    fn try_from(model: attachments::Model) -> Result<Self> {
        let parent = match (model.task_id, model.comment_id) {
            (Some(task_id), None) => AttachmentParent::Task(task_id),
            (None, Some(comment_id)) => AttachmentParent::Comment(comment_id),
            (task_id, comment_id) => anyhow::bail!(
                "Attachment {} must have exactly one parent (task_id={task_id:?}, comment_id={comment_id:?})",
                model.id
            ),
        };

        Ok(Self {
            id: model.id,
            parent,
            filename: model.filename,
            original_name: model.original_name,
            content_type: model.content_type,
            file_path: model.file_path,
            size: model.size,
            created_at: model.created_at,
        })
    }
}

pub struct AttachmentRepository {
    conn: DatabaseConnection,
}

impl AttachmentRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn create(&self, parent: AttachmentParent, file: &StoredFile) -> Result<Attachment> {
        let active = attachments::ActiveModel {
            task_id: Set(parent.task_id()),
            comment_id: Set(parent.comment_id()),
            filename: Set(file.filename.clone()),
            original_name: Set(file.original_name.clone()),
            content_type: Set(file.content_type.clone()),
            file_path: Set(file.file_path.clone()),
            size: Set(file.size),
            created_at: Set(Utc::now()),
            ..Default::default()
        };

        let model = active
            .insert(&self.conn)
            .await
            .context("Failed to insert attachment")?;

        Attachment::try_from(model)
    }

    pub async fn get(&self, id: i32) -> Result<Option<Attachment>> {
        Attachments::find_by_id(id)
            .one(&self.conn)
            .await
            .context("Failed to query attachment")?
            .map(Attachment::try_from)
            .transpose()
    }

    /// Attachments owned by the task directly or by any of its comments.
    pub async fn list_for_task(&self, task_id: i32) -> Result<Vec<Attachment>> {
        let comment_ids: Vec<i32> = Comments::find()
            .select_only()
            .column(comments::Column::Id)
            .filter(comments::Column::TaskId.eq(task_id))
            .into_tuple()
            .all(&self.conn)
            .await
            .context("Failed to list comment IDs")?;

        let mut condition = Condition::any().add(attachments::Column::TaskId.eq(task_id));
        if !comment_ids.is_empty() {
            condition = condition.add(attachments::Column::CommentId.is_in(comment_ids));
        }

        let rows = Attachments::find()
            .filter(condition)
            .order_by_asc(attachments::Column::CreatedAt)
            .order_by_asc(attachments::Column::Id)
            .all(&self.conn)
            .await
            .context("Failed to list attachments")?;

        rows.into_iter().map(Attachment::try_from).collect()
    }

    pub async fn list_for_comment(&self, comment_id: i32) -> Result<Vec<Attachment>> {
        let rows = Attachments::find()
            .filter(attachments::Column::CommentId.eq(comment_id))
            .order_by_asc(attachments::Column::Id)
            .all(&self.conn)
            .await
            .context("Failed to list comment attachments")?;

        rows.into_iter().map(Attachment::try_from).collect()
    }
}
