use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use campus_types::auth::{Claims, bearer_token, verify_token};
use campus_types::events::{ErrorCode, GatewayCommand, GatewayEvent};
use campus_types::pagination::HistoryQuery;

use crate::chat::ChatService;
use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long an unauthenticated connection may take to send `Identify`.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything a session needs, handed in by whoever owns the server.
#[derive(Clone)]
pub struct SessionContext {
    pub chat: ChatService,
    pub jwt_secret: Arc<str>,
}

impl SessionContext {
    fn dispatcher(&self) -> &Dispatcher {
        self.chat.dispatcher()
    }
}

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    pub token: Option<String>,
}

/// Upgrade handler for the `/study-groups` namespace.
///
/// A token presented at connect time (Authorization header first, then the
/// `token` query parameter) is verified before upgrading; a bad one is a
/// 401. Without one, the client must send `Identify` after connecting.
pub async fn ws_upgrade(
    State(ctx): State<SessionContext>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
        .map(str::to_string)
        .or(params.token);

    match presented {
        Some(token) => match verify_token(&ctx.jwt_secret, &token) {
            Ok(claims) => ws
                .on_upgrade(move |socket| handle_connection_authenticated(socket, ctx, claims))
                .into_response(),
            Err(e) => {
                warn!("Rejected gateway connection with invalid token: {}", e);
                StatusCode::UNAUTHORIZED.into_response()
            }
        },
        None => ws
            .on_upgrade(move |socket| handle_connection(socket, ctx))
            .into_response(),
    }
}

/// Handle a connection whose token was already verified at upgrade.
pub async fn handle_connection_authenticated(socket: WebSocket, ctx: SessionContext, claims: Claims) {
    let (sender, receiver) = socket.split();
    info!("{} ({}) connected to /study-groups", claims.username, claims.sub);
    run_session(sender, receiver, ctx, claims).await;
}

/// Handle a connection that authenticates with an `Identify` frame.
pub async fn handle_connection(socket: WebSocket, ctx: SessionContext) {
    let (sender, mut receiver) = socket.split();

    let claims = match wait_for_identify(&mut receiver, &ctx.jwt_secret).await {
        Some(claims) => claims,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };

    info!("{} ({}) identified on /study-groups", claims.username, claims.sub);
    run_session(sender, receiver, ctx, claims).await;
}

/// Groups this session receives live events for. Shared by the send and
/// receive halves of one connection, dropped with it.
#[derive(Clone, Default)]
struct Subscriptions(Arc<RwLock<HashSet<Uuid>>>);

impl Subscriptions {
    fn contains(&self, group_id: &Uuid) -> bool {
        self.0.read().unwrap_or_else(|e| e.into_inner()).contains(group_id)
    }

    fn insert(&self, group_id: Uuid) {
        self.0.write().unwrap_or_else(|e| e.into_inner()).insert(group_id);
    }

    fn remove(&self, group_id: &Uuid) -> bool {
        self.0.write().unwrap_or_else(|e| e.into_inner()).remove(group_id)
    }
}

async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: &GatewayEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(text) => sender.send(Message::Text(text.into())).await.is_ok(),
        Err(e) => {
            error!("Failed to serialize gateway event: {}", e);
            true
        }
    }
}

async fn run_session(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    ctx: SessionContext,
    claims: Claims,
) {
    let user_id = claims.sub;
    let username = claims.username.clone();
    let dispatcher = ctx.dispatcher().clone();

    let ready = GatewayEvent::Ready {
        user_id,
        username: username.clone(),
        role: claims.role,
    };
    if !send_event(&mut sender, &ready).await {
        return;
    }

    let (session_id, mut session_rx) = dispatcher.register_session(user_id).await;

    // Send existing online users to this client so they see who's already here
    for (uid, uname) in dispatcher.online_users().await {
        let event = GatewayEvent::PresenceUpdate {
            user_id: uid,
            username: uname,
            online: true,
        };
        if !send_event(&mut sender, &event).await {
            dispatcher.unregister_session(session_id).await;
            return;
        }
    }

    dispatcher.user_online(user_id, username.clone()).await;

    let mut broadcast_rx = dispatcher.subscribe();
    let subscriptions = Subscriptions::default();
    let send_subscriptions = subscriptions.clone();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward broadcasts + targeted replies -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let msg = match result {
                        Ok(msg) => msg,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver lagged by {} messages", n);
                            continue;
                        }
                        Err(_) => break,
                    };

                    if let Some(group_id) = msg.group_id {
                        if !send_subscriptions.contains(&group_id) {
                            continue;
                        }
                    }

                    if sender.send(Message::Text(msg.json.to_string().into())).await.is_err() {
                        break;
                    }
                }
                result = session_rx.recv() => {
                    let Some(event) = result else { break };
                    if !send_event(&mut sender, &event).await {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Default::default())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let recv_ctx = ctx.clone();
    let recv_username = username.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&recv_ctx, session_id, user_id, &recv_username, cmd, &subscriptions).await;
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            recv_username,
                            user_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                        recv_ctx
                            .dispatcher()
                            .send_to_session(
                                session_id,
                                GatewayEvent::Error {
                                    request_id: None,
                                    code: ErrorCode::BadCommand,
                                    message: e.to_string(),
                                    field: None,
                                },
                            )
                            .await;
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.session_closed(user_id, session_id).await;
    info!("{} ({}) disconnected from /study-groups", username, user_id);
}

async fn wait_for_identify(receiver: &mut SplitStream<WebSocket>, jwt_secret: &str) -> Option<Claims> {
    let identify = async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) = serde_json::from_str::<GatewayCommand>(&text) {
                    return verify_token(jwt_secret, &token)
                        .map_err(|e| warn!("Identify with invalid token: {}", e))
                        .ok();
                }
            }
        }
        None
    };

    tokio::time::timeout(IDENTIFY_TIMEOUT, identify).await.ok().flatten()
}

async fn handle_command(
    ctx: &SessionContext,
    session_id: Uuid,
    user_id: Uuid,
    username: &str,
    cmd: GatewayCommand,
    subscriptions: &Subscriptions,
) {
    let dispatcher = ctx.dispatcher();

    match cmd {
        GatewayCommand::Identify { .. } => {} // Already handled

        GatewayCommand::JoinGroup { group_id, request_id } => {
            let reply = match ctx.chat.ensure_member(group_id, user_id).await {
                Ok(()) => {
                    subscriptions.insert(group_id);
                    info!("{} ({}) joined group {}", username, user_id, group_id);
                    GatewayEvent::Joined { group_id }
                }
                Err(e) => e.to_event(request_id),
            };
            dispatcher.send_to_session(session_id, reply).await;
        }

        GatewayCommand::LeaveGroup { group_id } => {
            if subscriptions.remove(&group_id) {
                dispatcher.send_to_session(session_id, GatewayEvent::Left { group_id }).await;
            }
        }

        GatewayCommand::SendMessage {
            group_id,
            body,
            request_id,
        } => {
            // On success the message reaches this session through the group broadcast.
            if let Err(e) = ctx.chat.post_message(group_id, user_id, &body).await {
                dispatcher.send_to_session(session_id, e.to_event(request_id)).await;
            }
        }

        GatewayCommand::FetchHistory {
            group_id,
            limit,
            cursor,
            request_id,
        } => {
            let query = HistoryQuery::new(limit, cursor);
            let reply = match ctx.chat.fetch_history(group_id, user_id, &query).await {
                Ok(page) => GatewayEvent::HistoryPage {
                    request_id,
                    group_id,
                    messages: page.messages,
                    next_cursor: page.next_cursor,
                },
                Err(e) => e.to_event(request_id),
            };
            dispatcher.send_to_session(session_id, reply).await;
        }

        GatewayCommand::StartTyping { group_id } => {
            if subscriptions.contains(&group_id) {
                dispatcher.broadcast(GatewayEvent::TypingStart {
                    group_id,
                    user_id,
                    username: username.to_string(),
                });
            }
        }
    }
}
