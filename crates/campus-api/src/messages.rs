use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use campus_types::api::{HistoryPage, SendMessageRequest};
use campus_types::pagination::HistoryQuery;

use crate::auth::AppState;
use crate::error::ApiResult;
use crate::middleware::Claims;

/// `GET /study-groups/{group_id}/messages?limit=&cursor=`
///
/// `cursor` is the `next_cursor` of a previous page; omit it for the newest
/// page. Parameters are validated before anything is read.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<HistoryPage>> {
    let page = state.chat.fetch_history(group_id, claims.sub, &query).await?;
    Ok(Json(page))
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let message = state.chat.post_message(group_id, claims.sub, &req.body).await?;
    Ok((StatusCode::CREATED, Json(message)))
}
