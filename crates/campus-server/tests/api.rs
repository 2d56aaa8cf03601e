use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use campus_db::Database;
use campus_server::app::{Services, router};
use campus_server::config::Config;

fn test_app() -> Router {
    let config = Config::from_lookup(|key| match key {
        "CAMPUS_JWT_SECRET" => Some("integration-test-secret".to_string()),
        _ => None,
    })
    .unwrap();
    let db = Arc::new(Database::open_in_memory().unwrap());
    router(Services::new(db, &config))
}

async fn call(app: &Router, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        req = req.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let req = match body {
        Some(body) => req
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => req.body(Body::empty()).unwrap(),
    };

    let res = app.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn register(app: &Router, username: &str, role: &str) -> String {
    let (status, body) = call(
        app,
        Method::POST,
        "/api/auth/register",
        None,
        Some(json!({ "username": username, "password": "correct horse", "role": role })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    body["token"].as_str().unwrap().to_string()
}

async fn create_group(app: &Router, token: &str, name: &str) -> String {
    let (status, body) = call(app, Method::POST, "/api/study-groups", Some(token), Some(json!({ "name": name }))).await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    body["id"].as_str().unwrap().to_string()
}

async fn post(app: &Router, token: &str, group: &str, text: &str) -> Value {
    let uri = format!("/api/study-groups/{}/messages", group);
    let (status, body) = call(app, Method::POST, &uri, Some(token), Some(json!({ "body": text }))).await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    body
}

fn bodies(page: &Value) -> Vec<String> {
    page["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["body"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn login_reports_the_role_landing_path() {
    let app = test_app();
    register(&app, "mrs_lee", "teacher").await;

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/auth/login",
        None,
        Some(json!({ "username": "mrs_lee", "password": "correct horse" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role"], "teacher");
    assert_eq!(body["landing_path"], "/teacher/overview");

    let (status, _) = call(
        &app,
        Method::POST,
        "/api/auth/login",
        None,
        Some(json!({ "username": "mrs_lee", "password": "wrong horse" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn superadmin_cannot_self_register() {
    let app = test_app();
    let (status, body) = call(
        &app,
        Method::POST,
        "/api/auth/register",
        None,
        Some(json!({ "username": "root", "password": "correct horse", "role": "superadmin" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["field"], "role");
}

#[tokio::test]
async fn every_study_group_route_requires_a_token() {
    let app = test_app();
    for uri in [
        "/api/study-groups",
        "/api/study-groups/00000000-0000-0000-0000-000000000001/messages",
    ] {
        let (status, _) = call(&app, Method::GET, uri, None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{}", uri);
    }

    let (status, _) = call(&app, Method::GET, "/api/study-groups", Some("not-a-jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(&app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn history_pages_walk_backwards_through_the_group() {
    let app = test_app();
    let token = register(&app, "sam", "student").await;
    let group = create_group(&app, &token, "Calculus").await;
    for i in 0..5 {
        post(&app, &token, &group, &format!("note {}", i)).await;
    }

    let uri = format!("/api/study-groups/{}/messages?limit=2", group);
    let (status, first) = call(&app, Method::GET, &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bodies(&first), ["note 3", "note 4"]);

    let cursor = first["next_cursor"].as_i64().unwrap();
    let uri = format!("/api/study-groups/{}/messages?limit=2&cursor={}", group, cursor);
    let (_, second) = call(&app, Method::GET, &uri, Some(&token), None).await;
    assert_eq!(bodies(&second), ["note 1", "note 2"]);

    let cursor = second["next_cursor"].as_i64().unwrap();
    let uri = format!("/api/study-groups/{}/messages?limit=2&cursor={}", group, cursor);
    let (_, last) = call(&app, Method::GET, &uri, Some(&token), None).await;
    assert_eq!(bodies(&last), ["note 0"]);
    assert!(last["next_cursor"].is_null());
}

#[tokio::test]
async fn a_cursor_is_stable_under_new_writes() {
    let app = test_app();
    let token = register(&app, "sam", "student").await;
    let group = create_group(&app, &token, "Geometry").await;
    for i in 0..4 {
        post(&app, &token, &group, &format!("note {}", i)).await;
    }

    let uri = format!("/api/study-groups/{}/messages?limit=2", group);
    let (_, first) = call(&app, Method::GET, &uri, Some(&token), None).await;
    let cursor = first["next_cursor"].as_i64().unwrap();
    let page_uri = format!("/api/study-groups/{}/messages?limit=2&cursor={}", group, cursor);

    let (_, before) = call(&app, Method::GET, &page_uri, Some(&token), None).await;
    post(&app, &token, &group, "late").await;
    let (_, after) = call(&app, Method::GET, &page_uri, Some(&token), None).await;

    assert_eq!(before, after);
    assert!(!bodies(&after).contains(&"late".to_string()));
}

#[tokio::test]
async fn bad_page_parameters_are_rejected_with_their_field() {
    let app = test_app();
    let token = register(&app, "sam", "student").await;
    let group = create_group(&app, &token, "Statistics").await;

    for (query, field) in [
        ("limit=0", "limit"),
        ("limit=101", "limit"),
        ("limit=lots", "limit"),
        ("cursor=0", "cursor"),
        ("cursor=-3", "cursor"),
    ] {
        let uri = format!("/api/study-groups/{}/messages?{}", group, query);
        let (status, body) = call(&app, Method::GET, &uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", query);
        assert_eq!(body["field"], field, "{}", query);
    }

    let uri = format!("/api/study-groups/{}/messages?limit=100&cursor=1", group);
    let (status, _) = call(&app, Method::GET, &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn missing_groups_and_outsiders_are_refused() {
    let app = test_app();
    let owner = register(&app, "sam", "student").await;
    let outsider = register(&app, "eve", "student").await;
    let group = create_group(&app, &owner, "Latin").await;

    let uri = "/api/study-groups/00000000-0000-0000-0000-000000000099/messages";
    let (status, _) = call(&app, Method::GET, uri, Some(&owner), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let uri = format!("/api/study-groups/{}/messages", group);
    let (status, _) = call(&app, Method::GET, &uri, Some(&outsider), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let join = format!("/api/study-groups/{}/join", group);
    let (status, body) = call(&app, Method::POST, &join, Some(&outsider), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["joined"], true);

    let (status, _) = call(&app, Method::GET, &uri, Some(&outsider), None).await;
    assert_eq!(status, StatusCode::OK);

    let members = format!("/api/study-groups/{}/members", group);
    let (_, body) = call(&app, Method::GET, &members, Some(&owner), None).await;
    assert_eq!(body.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn duplicate_group_names_conflict() {
    let app = test_app();
    let token = register(&app, "sam", "student").await;
    create_group(&app, &token, "Poetry").await;

    let (status, _) = call(&app, Method::POST, "/api/study-groups", Some(&token), Some(json!({ "name": "Poetry" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, groups) = call(&app, Method::GET, "/api/study-groups", Some(&token), None).await;
    assert_eq!(groups.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn me_reports_the_account_and_its_landing_path() {
    let app = test_app();
    let token = register(&app, "ms_park", "teacher").await;

    let (status, body) = call(&app, Method::GET, "/api/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "ms_park");
    assert_eq!(body["role"], "teacher");
    assert_eq!(body["landing_path"], "/teacher/overview");

    let (status, _) = call(&app, Method::GET, "/api/auth/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn single_group_lookup() {
    let app = test_app();
    let token = register(&app, "sam", "student").await;
    let group = create_group(&app, &token, "Astronomy").await;

    let (status, body) = call(&app, Method::GET, &format!("/api/study-groups/{}", group), Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "Astronomy");

    let uri = "/api/study-groups/00000000-0000-0000-0000-000000000099";
    let (status, _) = call(&app, Method::GET, uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
