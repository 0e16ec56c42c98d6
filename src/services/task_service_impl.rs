//! `SeaORM` implementation of the `TaskService` trait.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::db::Store;
use crate::domain::TaskStatus;
use crate::models::attachment::{Attachment, AttachmentParent};
use crate::models::saved_query::{SavedQuery, SavedQueryInput};
use crate::models::task::{
    Comment, NewComment, NewTask, NewTimeEntry, Subscriber, Subtask, Task, TaskFilter, TaskUpdate,
    TimeEntry, normalize_tags,
};
use crate::services::notification::NotificationDispatcher;
use crate::services::task_service::{
    AttachmentContent, KanbanBoard, KanbanColumn, NewAttachment, TagCount, TaskError, TaskService,
};
use crate::storage::AttachmentStore;

pub struct SeaOrmTaskService {
    store: Store,
    attachments: AttachmentStore,
    notifier: Arc<dyn NotificationDispatcher>,
}

impl SeaOrmTaskService {
    #[must_use]
    pub fn new(
        store: Store,
        attachments: AttachmentStore,
        notifier: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        Self {
            store,
            attachments,
            notifier,
        }
    }

    async fn require_task(&self, id: i32) -> Result<Task, TaskError> {
        self.store
            .tasks()
            .get(id)
            .await?
            .ok_or_else(|| TaskError::task_not_found(id))
    }

    async fn touch(&self, task_id: i32) -> Result<(), TaskError> {
        self.store.tasks().touch(task_id, Utc::now()).await?;
        Ok(())
    }

    /// Fire-and-forget so request latency never depends on SMTP.
    fn spawn_created(&self, task: &Task) {
        let notifier = self.notifier.clone();
        let task = task.clone();
        tokio::spawn(async move { notifier.notify_task_created(&task).await });
    }

    fn spawn_status_changed(&self, task: &Task, previous: TaskStatus) {
        let notifier = self.notifier.clone();
        let task = task.clone();
        tokio::spawn(async move { notifier.notify_status_changed(&task, previous).await });
    }

    fn spawn_comment_added(&self, task: &Task, comment: &Comment) {
        let notifier = self.notifier.clone();
        let task = task.clone();
        let comment = comment.clone();
        tokio::spawn(async move { notifier.notify_comment_added(&task, &comment).await });
    }

    fn validate_saved_query(input: &SavedQueryInput) -> Result<SavedQueryInput, TaskError> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(TaskError::Validation("Saved query name is required".to_string()));
        }
        Ok(SavedQueryInput {
            name: name.to_string(),
            included_tags: normalize_tags(&input.included_tags),
            excluded_tags: normalize_tags(&input.excluded_tags),
        })
    }
}

#[async_trait]
impl TaskService for SeaOrmTaskService {
    async fn create_task(&self, mut new: NewTask) -> Result<Task, TaskError> {
        new.name = new.name.trim().to_string();
        if new.name.is_empty() {
            return Err(TaskError::Validation("Task name is required".to_string()));
        }
        new.tags = normalize_tags(&new.tags);

        let task = self.store.tasks().create(&new).await?;
        let source = if task.email_message_id.is_empty() {
            "api"
        } else {
            "email"
        };
        info!(task_id = task.id, name = %task.name, source, "Created task");
        metrics::counter!("tasks_created_total", "source" => source).increment(1);

        self.spawn_created(&task);
        Ok(task)
    }

    async fn create_task_from_email(
        &self,
        name: &str,
        message_id: &str,
    ) -> Result<Task, TaskError> {
        let mut new = NewTask::named(name);
        new.email_message_id = message_id.to_string();
        self.create_task(new).await
    }

    async fn get_task(&self, id: i32) -> Result<Task, TaskError> {
        self.require_task(id).await
    }

    async fn find_task_by_message_id(&self, message_id: &str) -> Result<Option<Task>, TaskError> {
        Ok(self.store.tasks().get_by_email_message_id(message_id).await?)
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, TaskError> {
        Ok(self.store.tasks().list(filter).await?)
    }

    async fn update_task(&self, id: i32, update: TaskUpdate) -> Result<Task, TaskError> {
        let current = self.require_task(id).await?;
        let previous_status = current.status;
        let mut task = current;

        if let Some(name) = update.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(TaskError::Validation("Task name cannot be empty".to_string()));
            }
            task.name = name;
        }
        if let Some(description) = update.description {
            task.description = description;
        }
        if let Some(priority) = update.priority {
            task.priority = priority;
        }
        if let Some(tags) = update.tags {
            task.tags = normalize_tags(&tags);
        }

        let now = Utc::now();
        if let Some(status) = update.status {
            if status == TaskStatus::Resolved && previous_status != TaskStatus::Resolved {
                task.resolved_at = Some(now);
            }
            task.status = status;
        }
        task.updated_at = now;

        let saved = self.store.tasks().save(&task).await?;
        debug!(task_id = id, status = %saved.status, "Updated task");

        if saved.status != previous_status {
            self.spawn_status_changed(&saved, previous_status);
        }
        Ok(saved)
    }

    async fn delete_task(&self, id: i32) -> Result<(), TaskError> {
        if !self.store.tasks().soft_delete(id).await? {
            return Err(TaskError::task_not_found(id));
        }
        info!(task_id = id, "Deleted task");
        Ok(())
    }

    async fn add_time_entry(
        &self,
        task_id: i32,
        entry: NewTimeEntry,
    ) -> Result<TimeEntry, TaskError> {
        if entry.duration_minutes <= 0 {
            return Err(TaskError::Validation(
                "Duration must be a positive number of minutes".to_string(),
            ));
        }
        self.require_task(task_id).await?;

        let created = self.store.time_entries().create(task_id, &entry).await?;

        let mut task = self.require_task(task_id).await?;
        let now = Utc::now();
        if task.status == TaskStatus::Open {
            task.status = TaskStatus::InProgress;
            task.updated_at = now;
            let saved = self.store.tasks().save(&task).await?;
            info!(task_id, "Task moved to in-progress after time entry");
            self.spawn_status_changed(&saved, TaskStatus::Open);
        } else {
            self.store.tasks().touch(task_id, now).await?;
        }

        Ok(created)
    }

    async fn list_time_entries(&self, task_id: i32) -> Result<Vec<TimeEntry>, TaskError> {
        self.require_task(task_id).await?;
        Ok(self.store.time_entries().list_for_task(task_id).await?)
    }

    async fn add_comment(&self, task_id: i32, comment: NewComment) -> Result<Comment, TaskError> {
        if comment.content.trim().is_empty() {
            return Err(TaskError::Validation("Comment content is required".to_string()));
        }
        let task = self.require_task(task_id).await?;

        let created = self.store.comments().create(task_id, &comment).await?;
        self.touch(task_id).await?;

        self.spawn_comment_added(&task, &created);
        Ok(created)
    }

    async fn list_comments(&self, task_id: i32) -> Result<Vec<Comment>, TaskError> {
        self.require_task(task_id).await?;
        Ok(self.store.comments().list_for_task(task_id).await?)
    }

    async fn comment_exists_for_message(
        &self,
        task_id: i32,
        message_id: &str,
    ) -> Result<bool, TaskError> {
        Ok(self
            .store
            .comments()
            .exists_for_message(task_id, message_id)
            .await?)
    }

    async fn add_subtask(&self, task_id: i32, name: &str) -> Result<Subtask, TaskError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(TaskError::Validation("Subtask name is required".to_string()));
        }
        self.require_task(task_id).await?;

        let subtask = self.store.subtasks().create(task_id, name).await?;
        self.touch(task_id).await?;
        Ok(subtask)
    }

    async fn toggle_subtask(&self, task_id: i32, subtask_id: i32) -> Result<Subtask, TaskError> {
        self.require_task(task_id).await?;
        let subtask = self
            .store
            .subtasks()
            .toggle(task_id, subtask_id)
            .await?
            .ok_or_else(|| TaskError::NotFound(format!("Subtask {subtask_id}")))?;
        self.touch(task_id).await?;
        Ok(subtask)
    }

    async fn delete_subtask(&self, task_id: i32, subtask_id: i32) -> Result<(), TaskError> {
        self.require_task(task_id).await?;
        if !self.store.subtasks().delete(task_id, subtask_id).await? {
            return Err(TaskError::NotFound(format!("Subtask {subtask_id}")));
        }
        self.touch(task_id).await
    }

    async fn list_subtasks(&self, task_id: i32) -> Result<Vec<Subtask>, TaskError> {
        self.require_task(task_id).await?;
        Ok(self.store.subtasks().list_for_task(task_id).await?)
    }

    async fn add_attachment(
        &self,
        parent: AttachmentParent,
        upload: NewAttachment,
    ) -> Result<Attachment, TaskError> {
        let task_id = match parent {
            AttachmentParent::Task(id) => id,
            AttachmentParent::Comment(id) => {
                self.store
                    .comments()
                    .get(id)
                    .await?
                    .ok_or_else(|| TaskError::NotFound(format!("Comment {id}")))?
                    .task_id
            }
        };
        self.require_task(task_id).await?;

        let original_name = if upload.original_name.trim().is_empty() {
            "attachment".to_string()
        } else {
            upload.original_name
        };
        let content_type = if upload.content_type.is_empty() {
            mime_guess::from_path(&original_name)
                .first_or_octet_stream()
                .to_string()
        } else {
            upload.content_type
        };

        let file = self
            .attachments
            .save(&original_name, &content_type, &upload.bytes)
            .await?;
        let attachment = self.store.attachments().create(parent, &file).await?;
        self.touch(task_id).await?;

        info!(
            task_id,
            attachment_id = attachment.id,
            file = %attachment.filename,
            size = attachment.size,
            "Stored attachment"
        );
        Ok(attachment)
    }

    async fn list_attachments(&self, task_id: i32) -> Result<Vec<Attachment>, TaskError> {
        self.require_task(task_id).await?;
        Ok(self.store.attachments().list_for_task(task_id).await?)
    }

    async fn get_attachment(&self, id: i32) -> Result<AttachmentContent, TaskError> {
        let attachment = self
            .store
            .attachments()
            .get(id)
            .await?
            .ok_or_else(|| TaskError::NotFound(format!("Attachment {id}")))?;
        let bytes = self.attachments.get(&attachment.file_path).await?;
        Ok(AttachmentContent { attachment, bytes })
    }

    async fn list_tags(&self) -> Result<Vec<TagCount>, TaskError> {
        let tasks = self.store.tasks().list_all().await?;
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for tag in tasks.into_iter().flat_map(|t| t.tags) {
            *counts.entry(tag).or_default() += 1;
        }
        Ok(counts
            .into_iter()
            .map(|(tag, count)| TagCount { tag, count })
            .collect())
    }

    async fn tasks_by_tag(&self, tag: &str) -> Result<Vec<Task>, TaskError> {
        let tasks = self.store.tasks().list_all().await?;
        Ok(tasks.into_iter().filter(|t| t.has_tag(tag)).collect())
    }

    async fn search_tasks(&self, query: &str) -> Result<Vec<Task>, TaskError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(TaskError::Validation("Search query is required".to_string()));
        }
        Ok(self.store.tasks().search(query).await?)
    }

    async fn search_comments(&self, query: &str) -> Result<Vec<Comment>, TaskError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(TaskError::Validation("Search query is required".to_string()));
        }
        Ok(self.store.comments().search(query).await?)
    }

    async fn kanban(&self, tag: Option<&str>) -> Result<KanbanBoard, TaskError> {
        let tasks = self.store.tasks().list_all().await?;
        let tasks: Vec<Task> = match tag {
            Some(tag) => tasks.into_iter().filter(|t| t.has_tag(tag)).collect(),
            None => tasks,
        };
        let total = tasks.len();

        let mut columns: Vec<KanbanColumn> = TaskStatus::ALL
            .iter()
            .map(|&status| KanbanColumn {
                status,
                count: 0,
                tasks: Vec::new(),
            })
            .collect();
        for task in tasks {
            if let Some(column) = columns.iter_mut().find(|c| c.status == task.status) {
                column.count += 1;
                column.tasks.push(task);
            }
        }

        Ok(KanbanBoard {
            tag: tag.map(str::to_string),
            total,
            columns,
        })
    }

    async fn create_saved_query(&self, input: SavedQueryInput) -> Result<SavedQuery, TaskError> {
        let input = Self::validate_saved_query(&input)?;
        Ok(self.store.saved_queries().create(&input).await?)
    }

    async fn get_saved_query(&self, id: i32) -> Result<SavedQuery, TaskError> {
        self.store
            .saved_queries()
            .get(id)
            .await?
            .ok_or_else(|| TaskError::NotFound(format!("Saved query {id}")))
    }

    async fn list_saved_queries(&self) -> Result<Vec<SavedQuery>, TaskError> {
        Ok(self.store.saved_queries().list().await?)
    }

    async fn update_saved_query(
        &self,
        id: i32,
        input: SavedQueryInput,
    ) -> Result<SavedQuery, TaskError> {
        let input = Self::validate_saved_query(&input)?;
        self.store
            .saved_queries()
            .update(id, &input)
            .await?
            .ok_or_else(|| TaskError::NotFound(format!("Saved query {id}")))
    }

    async fn delete_saved_query(&self, id: i32) -> Result<(), TaskError> {
        if self.store.saved_queries().delete(id).await? {
            Ok(())
        } else {
            Err(TaskError::NotFound(format!("Saved query {id}")))
        }
    }

    async fn tasks_by_saved_query(&self, id: i32) -> Result<Vec<Task>, TaskError> {
        let query = self.get_saved_query(id).await?;
        let tasks = self.store.tasks().list_all().await?;
        Ok(tasks.into_iter().filter(|t| query.matches(&t.tags)).collect())
    }

    async fn add_subscriber(&self, task_id: i32, email: &str) -> Result<(), TaskError> {
        let email = email.trim();
        if email.is_empty() {
            return Err(TaskError::Validation("Subscriber email is required".to_string()));
        }
        self.require_task(task_id).await?;
        self.store.subscribers().add(task_id, email).await?;
        Ok(())
    }

    async fn list_subscribers(&self, task_id: i32) -> Result<Vec<Subscriber>, TaskError> {
        self.require_task(task_id).await?;
        Ok(self.store.subscribers().list_for_task(task_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Priority;
    use crate::services::notification::NoopNotificationDispatcher;
    use tempfile::TempDir;

    async fn service() -> (SeaOrmTaskService, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("tasks.db").display());
        let store = Store::new(&url).await.unwrap();
        let attachments = AttachmentStore::new(dir.path().join("files")).unwrap();
        let svc = SeaOrmTaskService::new(store, attachments, Arc::new(NoopNotificationDispatcher));
        (svc, dir)
    }

    fn tagged(name: &str, tags: &[&str]) -> NewTask {
        NewTask {
            tags: tags.iter().map(|t| (*t).to_string()).collect(),
            ..NewTask::named(name)
        }
    }

    fn minutes(duration_minutes: i32) -> NewTimeEntry {
        NewTimeEntry {
            duration_minutes,
            ..NewTimeEntry::default()
        }
    }

    #[tokio::test]
    async fn blank_names_are_rejected() {
        let (svc, _dir) = service().await;
        let err = svc.create_task(NewTask::named("   ")).await.unwrap_err();
        assert!(matches!(err, TaskError::Validation(_)));
    }

    #[tokio::test]
    async fn time_entry_moves_open_task_to_in_progress() {
        let (svc, _dir) = service().await;
        let task = svc.create_task(NewTask::named("T")).await.unwrap();
        assert_eq!(task.status, TaskStatus::Open);

        svc.add_time_entry(task.id, minutes(30)).await.unwrap();

        let task = svc.get_task(task.id).await.unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(svc.list_time_entries(task.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn time_entry_leaves_other_statuses_alone() {
        let (svc, _dir) = service().await;
        for status in [TaskStatus::InProgress, TaskStatus::Resolved, TaskStatus::Closed] {
            let task = svc.create_task(NewTask::named("T")).await.unwrap();
            let update = TaskUpdate {
                status: Some(status),
                ..TaskUpdate::default()
            };
            let before = svc.update_task(task.id, update).await.unwrap();

            svc.add_time_entry(task.id, minutes(15)).await.unwrap();

            let after = svc.get_task(task.id).await.unwrap();
            assert_eq!(after.status, status);
            assert!(after.updated_at >= before.updated_at);
        }
    }

    #[tokio::test]
    async fn non_positive_durations_are_rejected() {
        let (svc, _dir) = service().await;
        let task = svc.create_task(NewTask::named("T")).await.unwrap();
        for d in [0, -5] {
            let err = svc.add_time_entry(task.id, minutes(d)).await.unwrap_err();
            assert!(matches!(err, TaskError::Validation(_)));
        }
        assert_eq!(svc.get_task(task.id).await.unwrap().status, TaskStatus::Open);
    }

    #[tokio::test]
    async fn resolved_at_is_stamped_and_never_cleared() {
        let (svc, _dir) = service().await;
        let task = svc.create_task(NewTask::named("T")).await.unwrap();
        assert!(task.resolved_at.is_none());

        let set = |status| TaskUpdate {
            status: Some(status),
            ..TaskUpdate::default()
        };

        let resolved = svc.update_task(task.id, set(TaskStatus::Resolved)).await.unwrap();
        assert!(resolved.resolved_at.is_some());

        let reopened = svc.update_task(task.id, set(TaskStatus::Open)).await.unwrap();
        assert_eq!(reopened.resolved_at, resolved.resolved_at);

        let renamed = svc
            .update_task(
                task.id,
                TaskUpdate {
                    name: Some("T2".to_string()),
                    priority: Some(Some(Priority::Urgent)),
                    ..TaskUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.resolved_at, resolved.resolved_at);
        assert_eq!(renamed.priority, Some(Priority::Urgent));
    }

    #[tokio::test]
    async fn comments_are_always_private() {
        let (svc, _dir) = service().await;
        let task = svc.create_task(NewTask::named("T")).await.unwrap();
        let comment = svc
            .add_comment(
                task.id,
                NewComment {
                    content: "note".to_string(),
                    ..NewComment::default()
                },
            )
            .await
            .unwrap();
        assert!(comment.is_private);
    }

    #[tokio::test]
    async fn deleted_task_reads_fail_not_found() {
        let (svc, _dir) = service().await;
        let task = svc.create_task(NewTask::named("T")).await.unwrap();
        svc.delete_task(task.id).await.unwrap();

        assert!(matches!(svc.get_task(task.id).await, Err(TaskError::NotFound(_))));
        assert!(matches!(svc.delete_task(task.id).await, Err(TaskError::NotFound(_))));
    }

    #[tokio::test]
    async fn subtasks_toggle_and_delete() {
        let (svc, _dir) = service().await;
        let task = svc.create_task(NewTask::named("T")).await.unwrap();
        let sub = svc.add_subtask(task.id, "step").await.unwrap();
        assert!(!sub.completed);

        assert!(svc.toggle_subtask(task.id, sub.id).await.unwrap().completed);
        assert!(!svc.toggle_subtask(task.id, sub.id).await.unwrap().completed);

        svc.delete_subtask(task.id, sub.id).await.unwrap();
        assert!(svc.list_subtasks(task.id).await.unwrap().is_empty());
        assert!(matches!(
            svc.toggle_subtask(task.id, sub.id).await,
            Err(TaskError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn saved_query_predicate() {
        let (svc, _dir) = service().await;
        let both = svc.create_task(tagged("both", &["client1", "archived"])).await.unwrap();
        let one = svc.create_task(tagged("one", &["client1"])).await.unwrap();
        let other = svc.create_task(tagged("other", &["client2"])).await.unwrap();
        let bare = svc.create_task(NewTask::named("bare")).await.unwrap();

        let q = svc
            .create_saved_query(SavedQueryInput {
                name: "Client 1".to_string(),
                included_tags: vec!["client1".to_string()],
                excluded_tags: vec!["archived".to_string()],
            })
            .await
            .unwrap();
        let ids: Vec<i32> = svc
            .tasks_by_saved_query(q.id)
            .await
            .unwrap()
            .iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec![one.id]);

        let open_ended = svc
            .create_saved_query(SavedQueryInput {
                name: "Live".to_string(),
                included_tags: Vec::new(),
                excluded_tags: vec!["archived".to_string()],
            })
            .await
            .unwrap();
        let mut ids: Vec<i32> = svc
            .tasks_by_saved_query(open_ended.id)
            .await
            .unwrap()
            .iter()
            .map(|t| t.id)
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![one.id, other.id, bare.id]);
        assert!(!ids.contains(&both.id));
    }

    #[tokio::test]
    async fn kanban_groups_by_status() {
        let (svc, _dir) = service().await;
        let a = svc.create_task(tagged("a", &["ui"])).await.unwrap();
        svc.create_task(tagged("b", &["ui"])).await.unwrap();
        svc.create_task(NewTask::named("c")).await.unwrap();
        svc.update_task(
            a.id,
            TaskUpdate {
                status: Some(TaskStatus::Closed),
                ..TaskUpdate::default()
            },
        )
        .await
        .unwrap();

        let board = svc.kanban(None).await.unwrap();
        assert_eq!(board.total, 3);
        let counts: Vec<usize> = board.columns.iter().map(|c| c.count).collect();
        assert_eq!(counts, vec![2, 0, 0, 1]);

        let ui = svc.kanban(Some("ui")).await.unwrap();
        assert_eq!(ui.total, 2);
        assert_eq!(ui.columns[0].count, 1);
        assert_eq!(ui.columns[3].count, 1);
    }

    #[tokio::test]
    async fn tags_index_counts_tasks() {
        let (svc, _dir) = service().await;
        svc.create_task(tagged("a", &["ui", "bug"])).await.unwrap();
        svc.create_task(tagged("b", &["bug"])).await.unwrap();

        let tags = svc.list_tags().await.unwrap();
        assert_eq!(
            tags,
            vec![
                TagCount {
                    tag: "bug".to_string(),
                    count: 2
                },
                TagCount {
                    tag: "ui".to_string(),
                    count: 1
                },
            ]
        );
        assert_eq!(svc.tasks_by_tag("ui").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn comment_attachments_are_listed_with_the_task() {
        let (svc, _dir) = service().await;
        let task = svc.create_task(NewTask::named("T")).await.unwrap();
        let comment = svc
            .add_comment(
                task.id,
                NewComment {
                    content: "see attached".to_string(),
                    ..NewComment::default()
                },
            )
            .await
            .unwrap();

        let upload = NewAttachment {
            original_name: "report.pdf".to_string(),
            content_type: String::new(),
            bytes: b"%PDF-1.4".to_vec(),
        };
        let attachment = svc
            .add_attachment(AttachmentParent::Comment(comment.id), upload)
            .await
            .unwrap();
        assert_eq!(attachment.parent, AttachmentParent::Comment(comment.id));
        assert_eq!(attachment.content_type, "application/pdf");

        let listed = svc.list_attachments(task.id).await.unwrap();
        assert_eq!(listed.len(), 1);

        let content = svc.get_attachment(attachment.id).await.unwrap();
        assert_eq!(content.bytes, b"%PDF-1.4");
    }

    #[tokio::test]
    async fn subscribers_are_deduplicated() {
        let (svc, _dir) = service().await;
        let task = svc.create_task(NewTask::named("T")).await.unwrap();
        svc.add_subscriber(task.id, "a@x").await.unwrap();
        svc.add_subscriber(task.id, "a@x").await.unwrap();
        assert_eq!(svc.list_subscribers(task.id).await.unwrap().len(), 1);
    }
}
