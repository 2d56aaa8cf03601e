use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use campus_api::auth::{self, AppState, AppStateInner};
use campus_api::middleware::require_auth;
use campus_api::{groups, messages};
use campus_db::Database;
use campus_gateway::NAMESPACE;
use campus_gateway::chat::ChatService;
use campus_gateway::connection::{SessionContext, ws_upgrade};
use campus_gateway::dispatcher::Dispatcher;

use crate::config::Config;

/// The server's shared handles, built once and owned by whoever serves them.
#[derive(Clone)]
pub struct Services {
    pub app: AppState,
    pub gateway: SessionContext,
}

impl Services {
    pub fn new(db: Arc<Database>, config: &Config) -> Self {
        let chat = ChatService::new(db.clone(), Dispatcher::new(), config.history_default_limit);
        let app: AppState = Arc::new(AppStateInner {
            db,
            chat: chat.clone(),
            jwt_secret: config.jwt_secret.clone(),
        });
        let gateway = SessionContext {
            chat,
            jwt_secret: config.jwt_secret.as_str().into(),
        };
        Self { app, gateway }
    }
}

pub fn router(services: Services) -> Router {
    let public_routes = Router::new()
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/health", get(|| async { "ok" }))
        .with_state(services.app.clone());

    let protected_routes = Router::new()
        .route("/api/auth/me", get(auth::me))
        .route("/api/study-groups", get(groups::list_groups).post(groups::create_group))
        .route("/api/study-groups/{group_id}", get(groups::get_group))
        .route("/api/study-groups/{group_id}/join", post(groups::join_group))
        .route("/api/study-groups/{group_id}/members", get(groups::list_members))
        .route(
            "/api/study-groups/{group_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route_layer(middleware::from_fn_with_state(services.app.clone(), require_auth))
        .with_state(services.app);

    let ws_route = Router::new()
        .route(NAMESPACE, get(ws_upgrade))
        .with_state(services.gateway);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
