use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::GroupMessage;
use crate::pagination::RawParam;
use crate::routes::Role;

/// Events sent over the `/study-groups` gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, username: String, role: Role },

    /// The session now receives live events for this group
    Joined { group_id: Uuid },

    /// The session no longer receives live events for this group
    Left { group_id: Uuid },

    /// A new message was posted to a group
    MessageCreate(GroupMessage),

    /// A user started typing in a group
    TypingStart {
        group_id: Uuid,
        user_id: Uuid,
        username: String,
    },

    /// A user came online or went offline
    PresenceUpdate {
        user_id: Uuid,
        username: String,
        online: bool,
    },

    /// Answer to a `FetchHistory` command, delivered to the requester only
    HistoryPage {
        request_id: Option<String>,
        group_id: Uuid,
        messages: Vec<GroupMessage>,
        next_cursor: Option<i64>,
    },

    /// A command from this session failed
    Error {
        request_id: Option<String>,
        code: ErrorCode,
        message: String,
        field: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Validation,
    NotFound,
    Forbidden,
    BadCommand,
    Internal,
}

impl GatewayEvent {
    /// Returns the group_id if this event is scoped to a specific group.
    /// Events that return `None` are delivered to every session.
    pub fn group_id(&self) -> Option<Uuid> {
        match self {
            Self::MessageCreate(message) => Some(message.group_id),
            Self::TypingStart { group_id, .. } => Some(*group_id),
            // Joined/Left/HistoryPage/Error are only ever sent to one session
            _ => None,
        }
    }
}

/// Commands sent FROM client TO server over the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate a connection that did not present a token at upgrade
    Identify { token: String },

    /// Start receiving live events for a group (members only)
    JoinGroup {
        group_id: Uuid,
        #[serde(default)]
        request_id: Option<String>,
    },

    /// Stop receiving live events for a group
    LeaveGroup { group_id: Uuid },

    /// Post a message to a group. Success is the `MessageCreate` push;
    /// only a failure is answered directly.
    SendMessage {
        group_id: Uuid,
        body: String,
        #[serde(default)]
        request_id: Option<String>,
    },

    /// Request a page of group history
    FetchHistory {
        group_id: Uuid,
        #[serde(default)]
        limit: Option<RawParam>,
        #[serde(default)]
        cursor: Option<RawParam>,
        #[serde(default)]
        request_id: Option<String>,
    },

    /// Indicate typing in a group
    StartTyping { group_id: Uuid },
}
