//! A client's connection to the `/study-groups` gateway.
//!
//! A [`GroupSession`] is created by [`GroupSession::connect`], owned by
//! whoever opened it, and torn down by [`GroupSession::close`] (or by
//! dropping it, e.g. on logout). Nothing here is process-global.

use std::collections::VecDeque;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, header};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info};
use uuid::Uuid;

use campus_types::api::HistoryPage;
use campus_types::events::{ErrorCode, GatewayCommand, GatewayEvent};
use campus_types::models::GroupMessage;
use campus_types::pagination::RawParam;
use campus_types::routes::Role;

/// How long to wait for the server to answer a request.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(10);

const NAMESPACE: &str = "/study-groups";

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("gateway refused the connection with HTTP {0}")]
    Rejected(u16),

    #[error("invalid gateway url: {0}")]
    InvalidUrl(String),

    #[error("connection closed")]
    Closed,

    #[error("timed out waiting for the gateway")]
    Timeout,

    #[error("malformed gateway frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unexpected gateway event: {0}")]
    Unexpected(String),

    #[error("gateway error ({code:?}): {message}")]
    Server {
        code: ErrorCode,
        message: String,
        field: Option<String>,
    },
}

/// How the bearer token reaches the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenTransport {
    /// `Authorization: Bearer` header on the upgrade request.
    Header,
    /// `Identify` frame sent right after connecting.
    Handshake,
}

pub struct GroupSession {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    /// Events that arrived while waiting for a specific reply.
    backlog: VecDeque<GatewayEvent>,
    user_id: Uuid,
    username: String,
    role: Role,
}

impl GroupSession {
    /// Connect to `base_url` (e.g. `ws://localhost:3000`) with the token in
    /// the upgrade request and wait for `Ready`.
    pub async fn connect(base_url: &str, token: &str) -> Result<Self, SessionError> {
        Self::connect_with(base_url, token, TokenTransport::Header).await
    }

    pub async fn connect_with(base_url: &str, token: &str, transport: TokenTransport) -> Result<Self, SessionError> {
        let url = format!("{}{}", base_url.trim_end_matches('/'), NAMESPACE);
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| SessionError::InvalidUrl(format!("{}: {}", url, e)))?;

        if transport == TokenTransport::Header {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| SessionError::InvalidUrl("token is not a valid header value".to_string()))?;
            request.headers_mut().insert(header::AUTHORIZATION, value);
        }

        let (ws, _response) = connect_async(request).await.map_err(|e| match e {
            tungstenite::Error::Http(response) => SessionError::Rejected(response.status().as_u16()),
            other => SessionError::WebSocket(other),
        })?;

        let mut session = Self {
            ws,
            backlog: VecDeque::new(),
            user_id: Uuid::nil(),
            username: String::new(),
            role: Role::Student,
        };

        if transport == TokenTransport::Handshake {
            session
                .send(&GatewayCommand::Identify {
                    token: token.to_string(),
                })
                .await?;
        }

        match session.recv_with_timeout().await? {
            GatewayEvent::Ready { user_id, username, role } => {
                info!("connected to {} as {} ({})", url, username, role);
                session.user_id = user_id;
                session.username = username;
                session.role = role;
                Ok(session)
            }
            other => Err(SessionError::Unexpected(format!("{:?}", other))),
        }
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub async fn send(&mut self, cmd: &GatewayCommand) -> Result<(), SessionError> {
        let text = serde_json::to_string(cmd)?;
        self.ws.send(Message::text(text)).await?;
        Ok(())
    }

    /// Next event from the server, including any that were set aside while
    /// waiting for a reply. `None` once the server has closed the session.
    pub async fn next_event(&mut self) -> Result<Option<GatewayEvent>, SessionError> {
        if let Some(event) = self.backlog.pop_front() {
            return Ok(Some(event));
        }
        self.read_event().await
    }

    /// Subscribe to a group's live events.
    pub async fn join(&mut self, group_id: Uuid) -> Result<(), SessionError> {
        let request_id = Uuid::new_v4().to_string();
        self.send(&GatewayCommand::JoinGroup {
            group_id,
            request_id: Some(request_id.clone()),
        })
        .await?;
        self.await_reply(|event| match event {
            GatewayEvent::Joined { group_id: g } if *g == group_id => Some(Ok(())),
            GatewayEvent::Error { request_id: Some(id), .. } if *id == request_id => Some(Err(())),
            _ => None,
        })
        .await
    }

    pub async fn leave(&mut self, group_id: Uuid) -> Result<(), SessionError> {
        self.send(&GatewayCommand::LeaveGroup { group_id }).await
    }

    /// Post a message. Returns the request id a failure will be tagged with;
    /// success shows up as a `MessageCreate` for joined sessions.
    pub async fn send_message(&mut self, group_id: Uuid, body: &str) -> Result<String, SessionError> {
        let request_id = Uuid::new_v4().to_string();
        self.send(&GatewayCommand::SendMessage {
            group_id,
            body: body.to_string(),
            request_id: Some(request_id.clone()),
        })
        .await?;
        Ok(request_id)
    }

    /// Wait for the error answering `request_id`, e.g. a rejected message.
    pub async fn next_error_for(&mut self, request_id: &str) -> Result<SessionError, SessionError> {
        let outcome = self
            .await_reply(|event| match event {
                GatewayEvent::Error { request_id: Some(id), .. } if id == request_id => Some(Err(())),
                _ => None,
            })
            .await;
        match outcome {
            Err(e @ SessionError::Server { .. }) => Ok(e),
            Err(e) => Err(e),
            Ok(()) => Err(SessionError::Unexpected("error reply without an error".to_string())),
        }
    }

    pub async fn start_typing(&mut self, group_id: Uuid) -> Result<(), SessionError> {
        self.send(&GatewayCommand::StartTyping { group_id }).await
    }

    /// Fetch one page of history. Pass the previous page's `next_cursor` to
    /// continue into older messages.
    pub async fn fetch_history(
        &mut self,
        group_id: Uuid,
        limit: Option<RawParam>,
        cursor: Option<RawParam>,
    ) -> Result<HistoryPage, SessionError> {
        let request_id = Uuid::new_v4().to_string();
        self.send(&GatewayCommand::FetchHistory {
            group_id,
            limit,
            cursor,
            request_id: Some(request_id.clone()),
        })
        .await?;

        let mut page = None;
        self.await_reply(|event| match event {
            GatewayEvent::HistoryPage {
                request_id: Some(id),
                messages,
                next_cursor,
                ..
            } if *id == request_id => {
                page = Some(HistoryPage {
                    messages: messages.clone(),
                    next_cursor: *next_cursor,
                });
                Some(Ok(()))
            }
            GatewayEvent::Error { request_id: Some(id), .. } if *id == request_id => Some(Err(())),
            _ => None,
        })
        .await?;

        page.ok_or_else(|| SessionError::Unexpected("history reply without a page".to_string()))
    }

    /// Wait for the next `MessageCreate`, setting other events aside.
    pub async fn next_message(&mut self) -> Result<GroupMessage, SessionError> {
        let mut found = None;
        self.await_reply(|event| match event {
            GatewayEvent::MessageCreate(message) => {
                found = Some(message.clone());
                Some(Ok(()))
            }
            _ => None,
        })
        .await?;
        found.ok_or(SessionError::Closed)
    }

    /// Close the connection politely.
    pub async fn close(mut self) -> Result<(), SessionError> {
        debug!("closing gateway session for {}", self.username);
        match self.ws.close(None).await {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Read events until `matcher` claims one. Unclaimed events go to the
    /// backlog. A claimed `Err(())` is turned into [`SessionError::Server`].
    async fn await_reply<F>(&mut self, mut matcher: F) -> Result<(), SessionError>
    where
        F: FnMut(&GatewayEvent) -> Option<Result<(), ()>>,
    {
        // Check anything already set aside first.
        if let Some(pos) = self.backlog.iter().position(|e| matcher(e).is_some()) {
            if let Some(event) = self.backlog.remove(pos) {
                return claim(&event, matcher(&event));
            }
        }

        let deadline = tokio::time::Instant::now() + REPLY_TIMEOUT;
        loop {
            let event = tokio::time::timeout_at(deadline, self.read_event())
                .await
                .map_err(|_| SessionError::Timeout)??
                .ok_or(SessionError::Closed)?;

            match matcher(&event) {
                Some(outcome) => return claim(&event, Some(outcome)),
                None => self.backlog.push_back(event),
            }
        }
    }

    async fn recv_with_timeout(&mut self) -> Result<GatewayEvent, SessionError> {
        tokio::time::timeout(REPLY_TIMEOUT, self.read_event())
            .await
            .map_err(|_| SessionError::Timeout)??
            .ok_or(SessionError::Closed)
    }

    async fn read_event(&mut self) -> Result<Option<GatewayEvent>, SessionError> {
        while let Some(frame) = self.ws.next().await {
            match frame? {
                Message::Text(text) => return Ok(Some(serde_json::from_str(text.as_str())?)),
                Message::Close(_) => return Ok(None),
                // Pings are answered by tungstenite itself.
                _ => continue,
            }
        }
        Ok(None)
    }
}

fn claim(event: &GatewayEvent, outcome: Option<Result<(), ()>>) -> Result<(), SessionError> {
    match (outcome, event) {
        (Some(Ok(())), _) => Ok(()),
        (
            Some(Err(())),
            GatewayEvent::Error {
                code, message, field, ..
            },
        ) => Err(SessionError::Server {
            code: *code,
            message: message.clone(),
            field: field.clone(),
        }),
        _ => Err(SessionError::Unexpected(format!("{:?}", event))),
    }
}
