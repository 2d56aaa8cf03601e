use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

use campus_gateway::chat::ChatError;
use campus_types::api::ErrorBody;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{message}")]
    Validation { field: Option<String>, message: String },

    #[error("unauthorized")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        ApiError::Validation {
            field: Some(field.to_string()),
            message: message.into(),
        }
    }

    /// A failed insert becomes `Conflict` when it lost a uniqueness race,
    /// otherwise it stays an internal error.
    pub fn from_insert(err: anyhow::Error, conflict: impl Into<String>) -> Self {
        if campus_db::is_unique_violation(&err) {
            ApiError::Conflict(conflict.into())
        } else {
            ApiError::Internal(err)
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ChatError> for ApiError {
    fn from(e: ChatError) -> Self {
        match e {
            ChatError::InvalidQuery(_) | ChatError::Validation { .. } => ApiError::Validation {
                field: e.field().map(str::to_string),
                message: e.to_string(),
            },
            ChatError::GroupNotFound(_) => ApiError::NotFound(e.to_string()),
            ChatError::NotMember(_) => ApiError::Forbidden(e.to_string()),
            ChatError::Internal(inner) => ApiError::Internal(inner),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal(e) = &self {
            error!("request failed: {:#}", e);
        }

        let field = match &self {
            Self::Validation { field, .. } => field.clone(),
            _ => None,
        };
        let body = ErrorBody {
            error: self.to_string(),
            field,
        };
        (self.status(), Json(body)).into_response()
    }
}
