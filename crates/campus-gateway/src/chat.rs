//! Group chat operations shared by the REST routes and gateway sessions.

use std::sync::Arc;

use anyhow::anyhow;
use tracing::{debug, error};
use uuid::Uuid;

use campus_db::{Database, HistoryError};
use campus_types::api::{HistoryPage, MAX_MESSAGE_LEN};
use campus_types::events::{ErrorCode, GatewayEvent};
use campus_types::models::GroupMessage;
use campus_types::pagination::{HistoryQuery, HistoryQueryError};

use crate::dispatcher::Dispatcher;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error(transparent)]
    InvalidQuery(#[from] HistoryQueryError),

    #[error("{field}: {message}")]
    Validation { field: &'static str, message: String },

    #[error("study group {0} not found")]
    GroupNotFound(Uuid),

    #[error("not a member of study group {0}")]
    NotMember(Uuid),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ChatError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidQuery(_) | Self::Validation { .. } => ErrorCode::Validation,
            Self::GroupNotFound(_) => ErrorCode::NotFound,
            Self::NotMember(_) => ErrorCode::Forbidden,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// The offending input field, for validation failures.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::InvalidQuery(e) => Some(e.field()),
            Self::Validation { field, .. } => Some(*field),
            _ => None,
        }
    }

    /// Text safe to show a client. Storage failures are not described.
    pub fn public_message(&self) -> String {
        match self {
            Self::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }

    /// Render as a gateway `Error` event answering `request_id`.
    pub fn to_event(&self, request_id: Option<String>) -> GatewayEvent {
        GatewayEvent::Error {
            request_id,
            code: self.code(),
            message: self.public_message(),
            field: self.field().map(str::to_string),
        }
    }
}

impl From<HistoryError> for ChatError {
    fn from(e: HistoryError) -> Self {
        match e {
            HistoryError::GroupNotFound(id) => ChatError::GroupNotFound(id),
            HistoryError::NotMember { group_id, .. } => ChatError::NotMember(group_id),
            HistoryError::Storage(e) => ChatError::Internal(e),
        }
    }
}

#[derive(Clone)]
pub struct ChatService {
    db: Arc<Database>,
    dispatcher: Dispatcher,
    default_history_limit: u32,
}

impl ChatService {
    pub fn new(db: Arc<Database>, dispatcher: Dispatcher, default_history_limit: u32) -> Self {
        Self {
            db,
            dispatcher,
            default_history_limit,
        }
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Validate the page parameters, then read one page. Bad parameters are
    /// rejected before the store is touched.
    pub async fn fetch_history(
        &self,
        group_id: Uuid,
        viewer: Uuid,
        query: &HistoryQuery,
    ) -> Result<HistoryPage, ChatError> {
        let page = query.validate_with_default(self.default_history_limit)?;
        debug!(%group_id, limit = page.limit, cursor = ?page.cursor, "fetching history");

        self.blocking(move |db| Ok(db.message_history(group_id, viewer, page)?))
            .await
    }

    /// Persist a message from a group member and push it to the group.
    pub async fn post_message(&self, group_id: Uuid, author_id: Uuid, body: &str) -> Result<GroupMessage, ChatError> {
        let body = body.trim().to_string();
        if body.is_empty() {
            return Err(ChatError::Validation {
                field: "body",
                message: "must not be empty".to_string(),
            });
        }
        if body.chars().count() > MAX_MESSAGE_LEN {
            return Err(ChatError::Validation {
                field: "body",
                message: format!("must be at most {} characters", MAX_MESSAGE_LEN),
            });
        }

        self.ensure_member(group_id, author_id).await?;

        let message = self
            .blocking(move |db| Ok(db.insert_message(Uuid::new_v4(), group_id, author_id, &body)?))
            .await?;

        self.dispatcher.broadcast(GatewayEvent::MessageCreate(message.clone()));
        Ok(message)
    }

    /// Succeeds only if the group exists and `user_id` belongs to it.
    pub async fn ensure_member(&self, group_id: Uuid, user_id: Uuid) -> Result<(), ChatError> {
        self.blocking(move |db| {
            if !db.group_exists(group_id)? {
                return Err(ChatError::GroupNotFound(group_id));
            }
            if !db.is_member(group_id, user_id)? {
                return Err(ChatError::NotMember(group_id));
            }
            Ok(())
        })
        .await
    }

    /// Run blocking DB work off the async runtime.
    async fn blocking<F, T>(&self, f: F) -> Result<T, ChatError>
    where
        F: FnOnce(&Database) -> Result<T, ChatError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                ChatError::Internal(anyhow!("blocking task failed: {}", e))
            })?
    }
}
