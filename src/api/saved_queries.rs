use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use std::sync::Arc;

use super::auth::require_permission;
use super::validation::validate_id;
use super::{ApiError, ApiJson, ApiResponse, AppState};
use crate::domain::{AuthContext, Permission};
use crate::models::saved_query::{SavedQuery, SavedQueryInput};
use crate::models::task::{Task, normalize_tags};

fn validate_input(input: SavedQueryInput) -> Result<SavedQueryInput, ApiError> {
    let name = input.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::validation("name", "is required"));
    }
    let included_tags = normalize_tags(&input.included_tags);
    let excluded_tags = normalize_tags(&input.excluded_tags);
    Ok(SavedQueryInput {
        name,
        included_tags,
        excluded_tags,
    })
}

/// GET /saved-queries
pub async fn list_saved_queries(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<ApiResponse<Vec<SavedQuery>>>, ApiError> {
    require_permission(&ctx, Permission::TasksRead)?;
    let queries = state.tasks.list_saved_queries().await?;
    Ok(Json(ApiResponse::success(queries)))
}

/// POST /saved-queries
pub async fn create_saved_query(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    ApiJson(payload): ApiJson<SavedQueryInput>,
) -> Result<(StatusCode, Json<ApiResponse<SavedQuery>>), ApiError> {
    require_permission(&ctx, Permission::TasksWrite)?;
    let query = state
        .tasks
        .create_saved_query(validate_input(payload)?)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(query))))
}

/// GET /saved-queries/{id}
pub async fn get_saved_query(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<i32>,
) -> Result<Json<ApiResponse<SavedQuery>>, ApiError> {
    require_permission(&ctx, Permission::TasksRead)?;
    let query = state.tasks.get_saved_query(validate_id("id", id)?).await?;
    Ok(Json(ApiResponse::success(query)))
}

/// PUT /saved-queries/{id}
pub async fn update_saved_query(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<i32>,
    ApiJson(payload): ApiJson<SavedQueryInput>,
) -> Result<Json<ApiResponse<SavedQuery>>, ApiError> {
    require_permission(&ctx, Permission::TasksWrite)?;
    let id = validate_id("id", id)?;
    let query = state
        .tasks
        .update_saved_query(id, validate_input(payload)?)
        .await?;
    Ok(Json(ApiResponse::success(query)))
}

/// DELETE /saved-queries/{id}
pub async fn delete_saved_query(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<i32>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    require_permission(&ctx, Permission::TasksWrite)?;
    state.tasks.delete_saved_query(validate_id("id", id)?).await?;
    Ok(Json(ApiResponse::message("Saved query deleted")))
}

/// GET /saved-queries/{id}/tasks
pub async fn saved_query_tasks(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<i32>,
) -> Result<Json<ApiResponse<Vec<Task>>>, ApiError> {
    require_permission(&ctx, Permission::TasksRead)?;
    let tasks = state.tasks.tasks_by_saved_query(validate_id("id", id)?).await?;
    Ok(Json(ApiResponse::success(tasks)))
}
