use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use tracing::error;
use uuid::Uuid;

use campus_types::events::GatewayEvent;

/// Default capacity of the fan-out channel. Slow sessions that fall further
/// behind than this skip ahead and log the gap.
pub const BROADCAST_CAPACITY: usize = 1024;

/// Replies queued for one session. A full queue makes that session's own
/// command loop wait for its socket to drain.
pub const SESSION_QUEUE_CAPACITY: usize = 64;

/// An event serialized once and shared by every session that forwards it.
#[derive(Debug, Clone)]
pub struct Outbound {
    /// Set for group-scoped events; sessions drop those for groups they
    /// have not joined.
    pub group_id: Option<Uuid>,
    pub json: Arc<str>,
}

/// Manages all connected sessions and fans events out to them.
///
/// One `Dispatcher` is created by the server at startup and handed to every
/// route and session that needs it; there is no global instance.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    broadcast_tx: broadcast::Sender<Outbound>,

    /// user_id -> (username, open session count)
    online_users: RwLock<HashMap<Uuid, (String, usize)>>,

    /// Per-session targeted send channels: session_id -> (user_id, sender)
    sessions: RwLock<HashMap<Uuid, (Uuid, mpsc::Sender<GatewayEvent>)>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::with_capacity(BROADCAST_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (broadcast_tx, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                online_users: RwLock::new(HashMap::new()),
                sessions: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to the fan-out channel.
    pub fn subscribe(&self) -> broadcast::Receiver<Outbound> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Push an event to every session (filtered by group on the session side).
    pub fn broadcast(&self, event: GatewayEvent) {
        let json = match serde_json::to_string(&event) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize gateway event: {}", e);
                return;
            }
        };
        // No receivers just means nobody is connected.
        let _ = self.inner.broadcast_tx.send(Outbound {
            group_id: event.group_id(),
            json: json.into(),
        });
    }

    /// Register a session's targeted channel. Returns (session_id, receiver).
    pub async fn register_session(&self, user_id: Uuid) -> (Uuid, mpsc::Receiver<GatewayEvent>) {
        let session_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(SESSION_QUEUE_CAPACITY);
        self.inner.sessions.write().await.insert(session_id, (user_id, tx));
        (session_id, rx)
    }

    /// Send an event to one session only, waiting while its queue is full.
    pub async fn send_to_session(&self, session_id: Uuid, event: GatewayEvent) {
        let tx = match self.inner.sessions.read().await.get(&session_id) {
            Some((_, tx)) => tx.clone(),
            None => return,
        };
        // A closed queue means the session is already shutting down.
        let _ = tx.send(event).await;
    }

    /// Mark a user online. Presence is only announced for their first session.
    pub async fn user_online(&self, user_id: Uuid, username: String) {
        let first = {
            let mut online = self.inner.online_users.write().await;
            let entry = online.entry(user_id).or_insert_with(|| (username.clone(), 0));
            entry.1 += 1;
            entry.1 == 1
        };

        if first {
            self.broadcast(GatewayEvent::PresenceUpdate {
                user_id,
                username,
                online: true,
            });
        }
    }

    /// Drop a session's targeted channel without touching presence.
    pub async fn unregister_session(&self, session_id: Uuid) {
        self.inner.sessions.write().await.remove(&session_id);
    }

    /// Tear down a session that went online. The user goes offline once
    /// their last session closes.
    pub async fn session_closed(&self, user_id: Uuid, session_id: Uuid) {
        self.unregister_session(session_id).await;

        let gone = {
            let mut online = self.inner.online_users.write().await;
            let last = match online.get_mut(&user_id) {
                Some((_, count)) => {
                    *count -= 1;
                    *count == 0
                }
                None => false,
            };
            if last {
                online.remove(&user_id).map(|(name, _)| name)
            } else {
                None
            }
        };

        if let Some(username) = gone {
            self.broadcast(GatewayEvent::PresenceUpdate {
                user_id,
                username,
                online: false,
            });
        }
    }

    /// Get list of online users.
    pub async fn online_users(&self) -> Vec<(Uuid, String)> {
        self.inner
            .online_users
            .read()
            .await
            .iter()
            .map(|(id, (name, _))| (*id, name.clone()))
            .collect()
    }
}
