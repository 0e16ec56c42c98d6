use axum::{
    Extension, Json,
    extract::{Path, State},
};
use std::sync::Arc;

use super::auth::require_permission;
use super::validation::validate_required;
use super::{ApiError, ApiResponse, AppState};
use crate::domain::{AuthContext, Permission};
use crate::models::task::Task;
use crate::services::TagCount;

/// GET /tags
pub async fn list_tags(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<ApiResponse<Vec<TagCount>>>, ApiError> {
    require_permission(&ctx, Permission::TasksRead)?;
    let tags = state.tasks.list_tags().await?;
    Ok(Json(ApiResponse::success(tags)))
}

/// GET /tags/{tag}/tasks
pub async fn tasks_by_tag(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(tag): Path<String>,
) -> Result<Json<ApiResponse<Vec<Task>>>, ApiError> {
    require_permission(&ctx, Permission::TasksRead)?;
    let tag = validate_required("tag", &tag)?;
    let tasks = state.tasks.tasks_by_tag(tag).await?;
    Ok(Json(ApiResponse::success(tasks)))
}
