use std::sync::Arc;

use uuid::Uuid;

use campus_client::session::{GroupSession, SessionError, TokenTransport};
use campus_db::Database;
use campus_server::app::{Services, router};
use campus_server::config::Config;
use campus_types::auth::issue_token;
use campus_types::events::ErrorCode;
use campus_types::pagination::RawParam;
use campus_types::routes::Role;

const SECRET: &str = "gateway-test-secret";

struct TestServer {
    url: String,
    db: Arc<Database>,
}

impl TestServer {
    async fn start() -> Self {
        let config = Config::from_lookup(|key| match key {
            "CAMPUS_JWT_SECRET" => Some(SECRET.to_string()),
            _ => None,
        })
        .unwrap();
        let db = Arc::new(Database::open_in_memory().unwrap());
        let app = router(Services::new(db.clone(), &config));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("ws://{}", addr),
            db,
        }
    }

    /// Create a user directly in the store and hand back their token.
    fn user(&self, username: &str, role: Role) -> (Uuid, String) {
        let id = Uuid::new_v4();
        self.db.create_user(id, username, "unused-hash", role).unwrap();
        (id, issue_token(SECRET, id, username, role).unwrap())
    }

    fn group(&self, name: &str, owner: Uuid) -> Uuid {
        self.db.create_group(Uuid::new_v4(), name, None, owner).unwrap().id
    }
}

#[tokio::test]
async fn ready_reports_the_token_identity() {
    let server = TestServer::start().await;
    let (id, token) = server.user("ms_okafor", Role::Teacher);

    let session = GroupSession::connect(&server.url, &token).await.unwrap();
    assert_eq!(session.user_id(), id);
    assert_eq!(session.username(), "ms_okafor");
    assert_eq!(session.role(), Role::Teacher);
    session.close().await.unwrap();
}

#[tokio::test]
async fn invalid_token_is_refused_at_connect() {
    let server = TestServer::start().await;
    let err = GroupSession::connect(&server.url, "not-a-jwt").await.err().unwrap();
    assert!(matches!(err, SessionError::Rejected(401)), "{:?}", err);
}

#[tokio::test]
async fn history_pages_over_the_gateway() {
    let server = TestServer::start().await;
    let (id, token) = server.user("sam", Role::Student);
    let group = server.group("Algebra", id);
    for i in 0..5 {
        server.db.insert_message(Uuid::new_v4(), group, id, &format!("line {}", i)).unwrap();
    }

    let mut session = GroupSession::connect(&server.url, &token).await.unwrap();

    // String and number parameters are both coerced.
    let first = session.fetch_history(group, Some(RawParam::from("3")), None).await.unwrap();
    let texts: Vec<_> = first.messages.iter().map(|m| m.body.as_str()).collect();
    assert_eq!(texts, ["line 2", "line 3", "line 4"]);

    let cursor = first.next_cursor.unwrap();
    let rest = session
        .fetch_history(group, Some(RawParam::Int(3)), Some(RawParam::Int(cursor)))
        .await
        .unwrap();
    let texts: Vec<_> = rest.messages.iter().map(|m| m.body.as_str()).collect();
    assert_eq!(texts, ["line 0", "line 1"]);
    assert_eq!(rest.next_cursor, None);

    let err = session.fetch_history(group, Some(RawParam::Int(101)), None).await.unwrap_err();
    match err {
        SessionError::Server { code, field, .. } => {
            assert_eq!(code, ErrorCode::Validation);
            assert_eq!(field.as_deref(), Some("limit"));
        }
        other => panic!("expected validation error, got {:?}", other),
    }

    let err = session.fetch_history(Uuid::new_v4(), None, None).await.unwrap_err();
    assert!(matches!(err, SessionError::Server { code: ErrorCode::NotFound, .. }), "{:?}", err);
}

#[tokio::test]
async fn messages_are_pushed_to_joined_sessions() {
    let server = TestServer::start().await;
    let (ada, ada_token) = server.user("ada", Role::Student);
    let (grace, grace_token) = server.user("grace", Role::Student);
    let group = server.group("Robotics", ada);
    server.db.add_member(group, grace).unwrap();

    let mut a = GroupSession::connect(&server.url, &ada_token).await.unwrap();
    let mut b = GroupSession::connect_with(&server.url, &grace_token, TokenTransport::Handshake)
        .await
        .unwrap();
    a.join(group).await.unwrap();
    b.join(group).await.unwrap();

    a.send_message(group, "servo is fixed").await.unwrap();

    let received = b.next_message().await.unwrap();
    assert_eq!(received.body, "servo is fixed");
    assert_eq!(received.author_id, ada);
    assert_eq!(received.group_id, group);

    let echoed = a.next_message().await.unwrap();
    assert_eq!(echoed.id, received.id);
}

#[tokio::test]
async fn outsiders_cannot_join() {
    let server = TestServer::start().await;
    let (owner, _) = server.user("owner", Role::Teacher);
    let (_, token) = server.user("eve", Role::Student);
    let group = server.group("Closed", owner);

    let mut session = GroupSession::connect(&server.url, &token).await.unwrap();
    let err = session.join(group).await.unwrap_err();
    assert!(matches!(err, SessionError::Server { code: ErrorCode::Forbidden, .. }), "{:?}", err);
}

#[tokio::test]
async fn live_pushes_do_not_disturb_a_page_being_read() {
    let server = TestServer::start().await;
    let (ada, ada_token) = server.user("ada", Role::Student);
    let (grace, grace_token) = server.user("grace", Role::Student);
    let group = server.group("Chess", ada);
    server.db.add_member(group, grace).unwrap();
    for i in 0..6 {
        server.db.insert_message(Uuid::new_v4(), group, ada, &format!("move {}", i)).unwrap();
    }

    let mut reader = GroupSession::connect(&server.url, &ada_token).await.unwrap();
    let mut writer = GroupSession::connect(&server.url, &grace_token).await.unwrap();
    reader.join(group).await.unwrap();

    let newest = reader.fetch_history(group, Some(RawParam::Int(2)), None).await.unwrap();
    let cursor = newest.next_cursor.map(RawParam::Int);
    let before = reader.fetch_history(group, Some(RawParam::Int(2)), cursor.clone()).await.unwrap();

    writer.send_message(group, "move 6").await.unwrap();
    let pushed = reader.next_message().await.unwrap();
    assert_eq!(pushed.body, "move 6");

    let after = reader.fetch_history(group, Some(RawParam::Int(2)), cursor).await.unwrap();
    assert_eq!(before, after);
    assert!(after.messages.iter().all(|m| m.id != pushed.id));
}

#[tokio::test]
async fn a_failed_send_does_not_answer_a_later_join() {
    let server = TestServer::start().await;
    let (id, token) = server.user("sam", Role::Student);
    let group = server.group("Biology", id);

    let mut session = GroupSession::connect(&server.url, &token).await.unwrap();
    // Commands are handled in order, so the rejection arrives before `Joined`.
    let failed = session.send_message(Uuid::new_v4(), "anyone here?").await.unwrap();
    session.join(group).await.unwrap();

    let err = session.next_error_for(&failed).await.unwrap();
    assert!(matches!(err, SessionError::Server { code: ErrorCode::NotFound, .. }), "{:?}", err);
}

#[tokio::test]
async fn fractional_page_size_is_a_field_error() {
    let server = TestServer::start().await;
    let (id, token) = server.user("sam", Role::Student);
    let group = server.group("Physics", id);

    let mut session = GroupSession::connect(&server.url, &token).await.unwrap();
    let err = session
        .fetch_history(group, Some(RawParam::Other(serde_json::json!(1.5))), None)
        .await
        .unwrap_err();
    match err {
        SessionError::Server { code, field, .. } => {
            assert_eq!(code, ErrorCode::Validation);
            assert_eq!(field.as_deref(), Some("limit"));
        }
        other => panic!("expected validation error, got {:?}", other),
    }
}
