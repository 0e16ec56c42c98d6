use axum::{
    Extension, Json,
    extract::{Path, State},
};
use std::sync::Arc;

use super::auth::require_permission;
use super::validation::validate_required;
use super::{ApiError, ApiResponse, AppState};
use crate::domain::{AuthContext, Permission};
use crate::services::KanbanBoard;

/// GET /kanban
pub async fn board(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<ApiResponse<KanbanBoard>>, ApiError> {
    require_permission(&ctx, Permission::TasksRead)?;
    let board = state.tasks.kanban(None).await?;
    Ok(Json(ApiResponse::success(board)))
}

/// GET /kanban/{tag}
pub async fn board_for_tag(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(tag): Path<String>,
) -> Result<Json<ApiResponse<KanbanBoard>>, ApiError> {
    require_permission(&ctx, Permission::TasksRead)?;
    let tag = validate_required("tag", &tag)?;
    let board = state.tasks.kanban(Some(tag)).await?;
    Ok(Json(ApiResponse::success(board)))
}
