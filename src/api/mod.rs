//! Dashboard HTTP surface: read-only snapshots plus a small set of admin
//! actions (pause, cancel, retry, trigger planning), composed as an axum
//! `Router` the way the teacher composes its own API server.

use crate::config::Config;
use crate::error::AutopilotError;
use crate::planner::PlannerContext;
use crate::rate_limit::{rate_limit_middleware, RateLimitState};
use crate::session::InMemorySessionStore;
use crate::state::AppState;
use crate::tracker::Tracker;
use axum::{
    http::StatusCode,
    middleware,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

mod handlers;

pub use handlers::*;

pub type DashboardAuthState = crate::auth::AuthState<InMemorySessionStore>;

#[derive(Clone)]
pub struct DashboardState {
    pub app_state: AppState,
    pub config: Arc<Config>,
    pub tracker: Arc<dyn Tracker>,
    pub planner_ctx: Arc<PlannerContext>,
    pub started_at_ms: i64,
}

pub struct DashboardServer {
    router: Router,
    host: String,
    port: u16,
}

impl DashboardServer {
    pub fn new(dashboard_state: DashboardState, token: Option<String>, host: String, port: u16) -> Self {
        let sessions = Arc::new(crate::session::SessionManager::new(
            InMemorySessionStore::new(),
            crate::session::SessionConfig::default(),
        ));
        let auth_state: Arc<DashboardAuthState> = Arc::new(crate::auth::AuthState {
            token,
            sessions,
        });
        let rate_limit_state = RateLimitState::new();

        let admin_routes = Router::new()
            .route("/api/pause", post(post_pause))
            .route("/api/planning", post(post_planning))
            .route("/api/cancel/:agent_id", post(post_cancel))
            .route("/api/retry/:history_id", post(post_retry))
            .route_layer(middleware::from_fn_with_state(
                rate_limit_state,
                rate_limit_middleware,
            ));

        let auth_routes = Router::new()
            .route("/auth/login", post(post_login))
            .with_state(auth_state.clone());

        let router = Router::new()
            .route("/api/status", get(get_status))
            .route("/health", get(get_health))
            .merge(admin_routes)
            .with_state(dashboard_state)
            .merge(auth_routes)
            .layer(middleware::from_fn_with_state(
                auth_state,
                crate::auth::auth_middleware::<InMemorySessionStore>,
            ))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http());

        Self { router, host, port }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let addr = format!("{}:{}", self.host, self.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!(addr, "dashboard listening");
        axum::serve(listener, self.router.into_make_service()).await?;
        Ok(())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

pub(crate) fn error_response(status: StatusCode, message: impl Into<String>) -> axum::response::Response {
    (status, Json(ErrorBody { error: message.into() })).into_response()
}

impl IntoResponse for AutopilotError {
    fn into_response(self) -> axum::response::Response {
        let status = match self.kind() {
            crate::error::ErrorKind::Fatal => StatusCode::INTERNAL_SERVER_ERROR,
            crate::error::ErrorKind::Budget => StatusCode::SERVICE_UNAVAILABLE,
            crate::error::ErrorKind::RateLimit => StatusCode::TOO_MANY_REQUESTS,
            crate::error::ErrorKind::Transient | crate::error::ErrorKind::PerIssue => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        error_response(status, self.to_string())
    }
}
