use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use campus_types::api::CreateGroupRequest;
use campus_types::models::{GroupMember, StudyGroup};

use crate::auth::AppState;
use crate::error::{ApiError, ApiResult};
use crate::middleware::Claims;

pub async fn list_groups(State(state): State<AppState>) -> ApiResult<Json<Vec<StudyGroup>>> {
    Ok(Json(state.db.list_groups()?))
}

pub async fn create_group(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateGroupRequest>,
) -> ApiResult<impl IntoResponse> {
    let name = req.name.trim();
    if name.len() < 3 || name.len() > 80 {
        return Err(ApiError::validation("name", "must be 3 to 80 characters"));
    }
    let description = req
        .description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty());

    if state.db.get_group_by_name(name)?.is_some() {
        return Err(ApiError::Conflict(format!("a study group named '{}' already exists", name)));
    }

    let group = state
        .db
        .create_group(Uuid::new_v4(), name, description, claims.sub)
        .map_err(|e| ApiError::from_insert(e, format!("a study group named '{}' already exists", name)))?;
    info!("{} created study group {} ({})", claims.username, group.name, group.id);

    Ok((StatusCode::CREATED, Json(group)))
}

pub async fn get_group(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
) -> ApiResult<Json<StudyGroup>> {
    state
        .db
        .get_group(group_id)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("study group {} not found", group_id)))
}

pub async fn join_group(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    if !state.db.group_exists(group_id)? {
        return Err(ApiError::NotFound(format!("study group {} not found", group_id)));
    }

    let joined = state.db.add_member(group_id, claims.sub)?;
    if joined {
        info!("{} joined study group {}", claims.username, group_id);
    }

    Ok(Json(json!({ "joined": joined })))
}

pub async fn list_members(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<GroupMember>>> {
    state.chat.ensure_member(group_id, claims.sub).await?;
    Ok(Json(state.db.list_members(group_id)?))
}
