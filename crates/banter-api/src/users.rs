use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use tokio::task::spawn_blocking;
use tracing::{error, info};
use uuid::Uuid;

use banter_types::api::{Claims, UpdateProfileRequest, UserResponse};

use crate::convert::user_response;
use crate::error::ApiError;
use crate::state::AppState;

/// GET /users — everyone registered with the identity service.
pub async fn list_users(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();

    let rows = spawn_blocking(move || db.list_users())
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal
        })?
        .map_err(|e| ApiError::from_store("list_users", e))?;

    let users: Vec<UserResponse> = rows.into_iter().map(user_response).collect();
    Ok(Json(users))
}

/// GET /users/{id}
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let uid = id.to_string();

    let row = spawn_blocking(move || db.get_user(&uid))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal
        })?
        .map_err(|e| ApiError::from_store(&format!("get_user user={id}"), e))?
        .ok_or(ApiError::NotFound("User not found"))?;

    Ok(Json(user_response(row)))
}

/// PUT /users — update the caller's own display attributes. Direct-chat
/// summaries pick the change up on the counterparty's next read.
pub async fn update_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let username = req.username.trim().to_string();
    if username.is_empty() || username.len() > 32 {
        return Err(ApiError::InvalidArgument("invalid username"));
    }

    info!("Updating profile for user {}", claims.sub);

    let db = state.db.clone();
    let uid = claims.sub.to_string();

    let row = spawn_blocking(move || {
        db.update_user_profile(&uid, &username, &req.avatar_ref)?;
        db.get_user(&uid)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Internal
    })?
    .map_err(|e| ApiError::from_store(&format!("update_profile user={}", claims.sub), e))?
    .ok_or(ApiError::NotFound("User not found"))?;

    Ok(Json(user_response(row)))
}
