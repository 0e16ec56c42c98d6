use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use std::sync::Arc;

use super::auth::require_permission;
use super::types::{CreateUserBody, FieldError};
use super::validation::validate_id;
use super::{ApiError, ApiJson, ApiResponse, AppState};
use crate::domain::{AuthContext, Permission};
use crate::models::user::User;
use crate::services::NewUserRequest;

/// GET /users
/// Every user, including inactive and deleted accounts.
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<ApiResponse<Vec<User>>>, ApiError> {
    require_permission(&ctx, Permission::AdminAll)?;
    let users = state.auth.list_all_users().await?;
    Ok(Json(ApiResponse::success(users)))
}

/// POST /users
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    ApiJson(payload): ApiJson<CreateUserBody>,
) -> Result<(StatusCode, Json<ApiResponse<User>>), ApiError> {
    require_permission(&ctx, Permission::AdminAll)?;

    let mut details = Vec::new();
    if payload.username.trim().is_empty() {
        details.push(FieldError::new("username", "is required"));
    }
    if payload.email.trim().is_empty() {
        details.push(FieldError::new("email", "is required"));
    }
    if payload.password.is_empty() {
        details.push(FieldError::new("password", "is required"));
    }
    if !details.is_empty() {
        return Err(ApiError::invalid_fields(details));
    }

    let user = state
        .auth
        .create_user(NewUserRequest {
            username: payload.username,
            email: payload.email,
            password: payload.password,
            is_active: payload.is_active,
        })
        .await?;

    tracing::info!(
        admin_id = ctx.user.id,
        user_id = user.id,
        "User created by admin"
    );

    Ok((StatusCode::CREATED, Json(ApiResponse::success(user))))
}

/// DELETE /users/{id}
/// Soft delete; sessions and API keys of the user are revoked.
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<i32>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    require_permission(&ctx, Permission::AdminAll)?;
    let id = validate_id("id", id)?;
    state.auth.delete_user(ctx.user.id, id).await?;

    tracing::info!(admin_id = ctx.user.id, user_id = id, "User deleted");

    Ok(Json(ApiResponse::message("User deleted")))
}
