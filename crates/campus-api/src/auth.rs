use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::info;
use uuid::Uuid;

use campus_db::Database;
use campus_gateway::chat::ChatService;
use campus_types::api::{LoginRequest, LoginResponse, MeResponse, RegisterRequest, RegisterResponse};
use campus_types::auth::issue_token;
use campus_types::routes::Role;

use crate::error::{ApiError, ApiResult};
use crate::middleware::Claims;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub chat: ChatService,
    pub jwt_secret: String,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    // Validate input
    if req.username.len() < 3 || req.username.len() > 32 {
        return Err(ApiError::validation("username", "must be 3 to 32 characters"));
    }
    if req.password.len() < 8 {
        return Err(ApiError::validation("password", "must be at least 8 characters"));
    }
    if !req.role.is_self_assignable() {
        return Err(ApiError::validation("role", format!("{} accounts cannot self-register", req.role)));
    }

    // Check if username is taken
    if state.db.get_user_by_username(&req.username)?.is_some() {
        return Err(ApiError::Conflict("username already taken".to_string()));
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?
        .to_string();

    let user_id = Uuid::new_v4();
    // The check above can still lose a race with a concurrent registration.
    state
        .db
        .create_user(user_id, &req.username, &password_hash, req.role)
        .map_err(|e| ApiError::from_insert(e, "username already taken"))?;

    let token = issue_token(&state.jwt_secret, user_id, &req.username, req.role)
        .map_err(anyhow::Error::from)?;

    info!("registered {} ({}) as {}", req.username, user_id, req.role);

    Ok((StatusCode::CREATED, Json(RegisterResponse { user_id, token })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let user = state
        .db
        .get_user_by_username(&req.username)?
        .ok_or(ApiError::Unauthorized)?;

    // Verify password
    let parsed_hash = PasswordHash::new(&user.password)
        .map_err(|e| anyhow::anyhow!("stored hash for {} is corrupt: {}", user.username, e))?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::Unauthorized)?;

    let user = user.into_model()?;
    let role: Role = user.role;

    let token = issue_token(&state.jwt_secret, user.id, &user.username, role)
        .map_err(anyhow::Error::from)?;

    Ok(Json(LoginResponse {
        user_id: user.id,
        username: user.username,
        role,
        token,
        landing_path: role.landing_path().to_string(),
    }))
}

/// Current account, read fresh so a role change shows up without a new token.
pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<MeResponse>> {
    let user = state
        .db
        .get_user_by_id(claims.sub)?
        .ok_or(ApiError::Unauthorized)?
        .into_model()?;

    Ok(Json(MeResponse {
        user_id: user.id,
        username: user.username,
        role: user.role,
        landing_path: user.role.landing_path().to_string(),
    }))
}
