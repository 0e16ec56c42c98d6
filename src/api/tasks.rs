use axum::{
    Extension, Json,
    extract::{Multipart, Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use super::auth::require_permission;
use super::types::{
    CommentBody, CreateTaskBody, SubtaskBody, TaskDetailDto, TaskListQuery, TimeEntryBody,
    UpdateTaskBody,
};
use super::validation::{
    date_at_noon, parse_date, parse_priority, parse_status, task_filter, validate_id,
    validate_required,
};
use super::{ApiError, ApiJson, ApiResponse, AppState};
use crate::domain::{AuthContext, Permission};
use crate::models::attachment::{Attachment, AttachmentParent};
use crate::models::task::{
    Comment, NewComment, NewTask, NewTimeEntry, Subscriber, Subtask, Task, TaskUpdate, TimeEntry,
};
use crate::services::NewAttachment;

/// GET /tasks
pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Query(query): Query<TaskListQuery>,
) -> Result<Json<ApiResponse<Vec<Task>>>, ApiError> {
    require_permission(&ctx, Permission::TasksRead)?;
    let filter = task_filter(&query)?;
    let tasks = state.tasks.list_tasks(&filter).await?;
    Ok(Json(ApiResponse::success(tasks)))
}

/// POST /tasks
pub async fn create_task(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    ApiJson(payload): ApiJson<CreateTaskBody>,
) -> Result<(StatusCode, Json<ApiResponse<Task>>), ApiError> {
    require_permission(&ctx, Permission::TasksWrite)?;
    let name = validate_required("name", &payload.name)?;

    let status = match payload.status.as_deref().filter(|s| !s.trim().is_empty()) {
        Some(s) => parse_status(s)?,
        None => Default::default(),
    };
    let priority = match payload.priority.as_deref().filter(|p| !p.trim().is_empty()) {
        Some(p) => Some(parse_priority(p)?),
        None => None,
    };

    let task = state
        .tasks
        .create_task(NewTask {
            name: name.to_string(),
            description: payload.description,
            status,
            priority,
            tags: payload.tags,
            ..NewTask::default()
        })
        .await?;

    tracing::info!(task_id = task.id, user_id = ctx.user.id, "Task created");

    Ok((StatusCode::CREATED, Json(ApiResponse::success(task))))
}

/// GET /tasks/{id}
/// The task with its subtasks, time entries and comments.
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<i32>,
) -> Result<Json<ApiResponse<TaskDetailDto>>, ApiError> {
    require_permission(&ctx, Permission::TasksRead)?;
    let id = validate_id("id", id)?;

    let task = state.tasks.get_task(id).await?;
    let subtasks = state.tasks.list_subtasks(id).await?;
    let time_entries = state.tasks.list_time_entries(id).await?;
    let comments = state.tasks.list_comments(id).await?;
    let total_minutes = time_entries
        .iter()
        .map(|e| i64::from(e.duration_minutes))
        .sum();

    Ok(Json(ApiResponse::success(TaskDetailDto {
        task,
        subtasks,
        time_entries,
        comments,
        total_minutes,
    })))
}

/// PUT /tasks/{id}
pub async fn replace_task(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<i32>,
    ApiJson(payload): ApiJson<UpdateTaskBody>,
) -> Result<Json<ApiResponse<Task>>, ApiError> {
    require_permission(&ctx, Permission::TasksWrite)?;
    if payload.name.is_none() {
        return Err(ApiError::validation("name", "is required"));
    }
    update(&state, id, payload).await
}

/// PATCH /tasks/{id}
pub async fn patch_task(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<i32>,
    ApiJson(payload): ApiJson<UpdateTaskBody>,
) -> Result<Json<ApiResponse<Task>>, ApiError> {
    require_permission(&ctx, Permission::TasksWrite)?;
    update(&state, id, payload).await
}

async fn update(
    state: &AppState,
    id: i32,
    payload: UpdateTaskBody,
) -> Result<Json<ApiResponse<Task>>, ApiError> {
    let id = validate_id("id", id)?;
    let update = task_update(payload)?;
    let task = state.tasks.update_task(id, update).await?;
    Ok(Json(ApiResponse::success(task)))
}

fn task_update(payload: UpdateTaskBody) -> Result<TaskUpdate, ApiError> {
    let name = match payload.name {
        Some(name) => Some(validate_required("name", &name)?.to_string()),
        None => None,
    };
    let status = match payload.status {
        Some(status) => Some(parse_status(&status)?),
        None => None,
    };
    let priority = match payload.priority {
        Some(p) if p.trim().is_empty() => Some(None),
        Some(p) => Some(Some(parse_priority(&p)?)),
        None => None,
    };

    Ok(TaskUpdate {
        name,
        description: payload.description,
        status,
        priority,
        tags: payload.tags,
    })
}

/// DELETE /tasks/{id}
pub async fn delete_task(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<i32>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    require_permission(&ctx, Permission::TasksDelete)?;
    let id = validate_id("id", id)?;
    state.tasks.delete_task(id).await?;
    tracing::info!(task_id = id, user_id = ctx.user.id, "Task deleted");
    Ok(Json(ApiResponse::message("Task deleted")))
}

// Time entries

/// GET /tasks/{id}/time
pub async fn list_time_entries(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<i32>,
) -> Result<Json<ApiResponse<Vec<TimeEntry>>>, ApiError> {
    require_permission(&ctx, Permission::TimeRead)?;
    let entries = state.tasks.list_time_entries(validate_id("id", id)?).await?;
    Ok(Json(ApiResponse::success(entries)))
}

/// POST /tasks/{id}/time
/// Logging time on an `open` task moves it to `in-progress`.
pub async fn add_time_entry(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<i32>,
    ApiJson(payload): ApiJson<TimeEntryBody>,
) -> Result<(StatusCode, Json<ApiResponse<TimeEntry>>), ApiError> {
    require_permission(&ctx, Permission::TimeWrite)?;
    let id = validate_id("id", id)?;
    if payload.duration <= 0 {
        return Err(ApiError::validation(
            "duration",
            "must be a positive number of minutes",
        ));
    }
    let created_at = match payload.date.as_deref().filter(|d| !d.trim().is_empty()) {
        Some(date) => Some(date_at_noon(parse_date("date", date)?)),
        None => None,
    };

    let entry = state
        .tasks
        .add_time_entry(
            id,
            NewTimeEntry {
                description: payload.description,
                duration_minutes: payload.duration,
                created_at,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(entry))))
}

// Comments

/// GET /tasks/{id}/comments
pub async fn list_comments(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<i32>,
) -> Result<Json<ApiResponse<Vec<Comment>>>, ApiError> {
    require_permission(&ctx, Permission::TasksRead)?;
    let comments = state.tasks.list_comments(validate_id("id", id)?).await?;
    Ok(Json(ApiResponse::success(comments)))
}

/// POST /tasks/{id}/comments
pub async fn add_comment(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<i32>,
    ApiJson(payload): ApiJson<CommentBody>,
) -> Result<(StatusCode, Json<ApiResponse<Comment>>), ApiError> {
    require_permission(&ctx, Permission::TasksWrite)?;
    let id = validate_id("id", id)?;
    let content = validate_required("content", &payload.content)?;

    let comment = state
        .tasks
        .add_comment(
            id,
            NewComment {
                content: content.to_string(),
                from_email: Some(ctx.user.email.clone()),
                email_message_id: None,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(comment))))
}

// Subtasks

/// GET /tasks/{id}/subtasks
pub async fn list_subtasks(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<i32>,
) -> Result<Json<ApiResponse<Vec<Subtask>>>, ApiError> {
    require_permission(&ctx, Permission::TasksRead)?;
    let subtasks = state.tasks.list_subtasks(validate_id("id", id)?).await?;
    Ok(Json(ApiResponse::success(subtasks)))
}

/// POST /tasks/{id}/subtasks
pub async fn add_subtask(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<i32>,
    ApiJson(payload): ApiJson<SubtaskBody>,
) -> Result<(StatusCode, Json<ApiResponse<Subtask>>), ApiError> {
    require_permission(&ctx, Permission::TasksWrite)?;
    let id = validate_id("id", id)?;
    let name = validate_required("name", &payload.name)?;
    let subtask = state.tasks.add_subtask(id, name).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(subtask))))
}

/// PATCH /tasks/{id}/subtasks/{sid}/toggle
pub async fn toggle_subtask(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path((id, subtask_id)): Path<(i32, i32)>,
) -> Result<Json<ApiResponse<Subtask>>, ApiError> {
    require_permission(&ctx, Permission::TasksWrite)?;
    let subtask = state
        .tasks
        .toggle_subtask(validate_id("id", id)?, validate_id("sid", subtask_id)?)
        .await?;
    Ok(Json(ApiResponse::success(subtask)))
}

/// DELETE /tasks/{id}/subtasks/{sid}
pub async fn delete_subtask(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path((id, subtask_id)): Path<(i32, i32)>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    require_permission(&ctx, Permission::TasksWrite)?;
    state
        .tasks
        .delete_subtask(validate_id("id", id)?, validate_id("sid", subtask_id)?)
        .await?;
    Ok(Json(ApiResponse::message("Subtask deleted")))
}

/// GET /tasks/{id}/subscribers
pub async fn list_subscribers(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<i32>,
) -> Result<Json<ApiResponse<Vec<Subscriber>>>, ApiError> {
    require_permission(&ctx, Permission::TasksRead)?;
    let subscribers = state.tasks.list_subscribers(validate_id("id", id)?).await?;
    Ok(Json(ApiResponse::success(subscribers)))
}

// Attachments

/// GET /tasks/{id}/attachments
pub async fn list_attachments(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<i32>,
) -> Result<Json<ApiResponse<Vec<Attachment>>>, ApiError> {
    require_permission(&ctx, Permission::TasksRead)?;
    let attachments = state.tasks.list_attachments(validate_id("id", id)?).await?;
    Ok(Json(ApiResponse::success(attachments)))
}

/// POST /tasks/{id}/attachments
/// Multipart upload; the first field carrying a file name is stored.
pub async fn upload_attachment(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<i32>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<ApiResponse<Attachment>>), ApiError> {
    require_permission(&ctx, Permission::TasksWrite)?;
    let id = validate_id("id", id)?;

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::validation("file", e.body_text()))?
    {
        let Some(original_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let content_type = field.content_type().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::validation("file", e.body_text()))?;

        upload = Some(NewAttachment {
            original_name,
            content_type,
            bytes: bytes.to_vec(),
        });
        break;
    }

    let Some(upload) = upload else {
        return Err(ApiError::validation("file", "a file field is required"));
    };
    if upload.bytes.len() > state.settings.max_upload_bytes {
        return Err(ApiError::validation(
            "file",
            format!(
                "exceeds the upload limit of {} bytes",
                state.settings.max_upload_bytes
            ),
        ));
    }

    let attachment = state
        .tasks
        .add_attachment(AttachmentParent::Task(id), upload)
        .await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(attachment))))
}

/// GET /attachments/{id}
/// Raw bytes with the stored content type.
pub async fn download_attachment(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<i32>,
) -> Result<Response, ApiError> {
    require_permission(&ctx, Permission::TasksRead)?;
    let content = state.tasks.get_attachment(validate_id("id", id)?).await?;

    let disposition = format!(
        "attachment; filename=\"{}\"",
        content.attachment.original_name.replace(['"', '\\', '\r', '\n'], "_")
    );

    Ok((
        [
            (header::CONTENT_TYPE, content.attachment.content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        content.bytes,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Priority, TaskStatus};

    #[test]
    fn empty_priority_clears() {
        let update = task_update(UpdateTaskBody {
            priority: Some(String::new()),
            ..UpdateTaskBody::default()
        })
        .expect("valid update");
        assert_eq!(update.priority, Some(None));
    }

    #[test]
    fn update_parses_enums() {
        let update = task_update(UpdateTaskBody {
            status: Some("resolved".to_string()),
            priority: Some("high".to_string()),
            ..UpdateTaskBody::default()
        })
        .expect("valid update");
        assert_eq!(update.status, Some(TaskStatus::Resolved));
        assert_eq!(update.priority, Some(Some(Priority::High)));
        assert!(update.name.is_none());
    }

    #[test]
    fn update_rejects_blank_name_and_unknown_status() {
        assert!(
            task_update(UpdateTaskBody {
                name: Some("  ".to_string()),
                ..UpdateTaskBody::default()
            })
            .is_err()
        );
        assert!(
            task_update(UpdateTaskBody {
                status: Some("done".to_string()),
                ..UpdateTaskBody::default()
            })
            .is_err()
        );
    }
}
