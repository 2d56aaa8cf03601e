use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use tracing::debug;

use campus_types::auth::{bearer_token, verify_token};

use crate::auth::AppState;
use crate::error::ApiError;

pub use campus_types::auth::Claims;

/// Extract and validate the JWT from the Authorization header, then make the
/// claims available to handlers as `Extension<Claims>`.
///
/// Every route behind this layer requires a valid token; there are no
/// path-based exemptions.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
        .ok_or(ApiError::Unauthorized)?;

    let claims = verify_token(&state.jwt_secret, token).map_err(|e| {
        debug!("rejected bearer token: {}", e);
        ApiError::Unauthorized
    })?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
