use axum::{
    Extension, Json,
    extract::{Query, State},
};
use serde::Serialize;
use std::sync::Arc;

use super::auth::require_permission;
use super::types::SearchQuery;
use super::validation::validate_search_query;
use super::{ApiError, ApiResponse, AppState};
use crate::domain::{AuthContext, Permission};
use crate::models::task::{Comment, Task};

#[derive(Debug, Serialize)]
#[serde(tag = "type", content = "results", rename_all = "lowercase")]
pub enum SearchResults {
    Task(Vec<Task>),
    Comment(Vec<Comment>),
}

/// GET /search?q=..&type=task|comment
/// Case-insensitive substring match; tasks match on name or description.
pub async fn search(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<ApiResponse<SearchResults>>, ApiError> {
    require_permission(&ctx, Permission::TasksRead)?;
    let q = validate_search_query(&query.q)?;

    let results = match query.kind.as_deref().map(str::trim).unwrap_or("task") {
        "" | "task" | "tasks" => SearchResults::Task(state.tasks.search_tasks(q).await?),
        "comment" | "comments" => SearchResults::Comment(state.tasks.search_comments(q).await?),
        other => {
            return Err(ApiError::validation(
                "type",
                format!("unknown search type {other:?}, expected task or comment"),
            ));
        }
    };

    Ok(Json(ApiResponse::success(results)))
}
