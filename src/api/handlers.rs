use super::{error_response, DashboardAuthState, DashboardState};
use crate::constants::{QUEUE_AGE_FAIL_SECS, QUEUE_AGE_WARN_SECS};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Serialize)]
struct StatusBody {
    paused: bool,
    agents: Vec<crate::models::Agent>,
    history: Vec<crate::models::HistoryEntry>,
    queue: crate::models::QueueSnapshot,
    planning: crate::models::PlannerStatus,
    budget: crate::models::BudgetSnapshot,
    #[serde(rename = "startedAt")]
    started_at_ms: i64,
}

/// `GET /api/status` — full dashboard snapshot.
pub async fn get_status(State(ds): State<DashboardState>) -> Json<StatusBody> {
    let budget = ds.app_state.get_budget_snapshot(&ds.config.budget).await;
    Json(StatusBody {
        paused: ds.app_state.is_paused().await,
        agents: ds.app_state.get_running_agents().await,
        history: ds.app_state.get_history().await,
        queue: ds.app_state.get_queue_snapshot().await,
        planning: ds.app_state.get_planner_status().await,
        budget,
        started_at_ms: ds.started_at_ms,
    })
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    subsystems: HealthSubsystems,
}

#[derive(Serialize)]
struct HealthSubsystems {
    queue: &'static str,
    paused: bool,
    running_agents: usize,
}

/// `GET /health` — 200 pass/warn, 503 fail based on queue staleness.
pub async fn get_health(State(ds): State<DashboardState>) -> Response {
    let queue = ds.app_state.get_queue_snapshot().await;
    let now_ms = chrono::Utc::now().timestamp_millis();
    let age_secs = if queue.last_checked_ms == 0 {
        0
    } else {
        (now_ms - queue.last_checked_ms).max(0) / 1000
    };

    let (queue_status, overall, code) = if age_secs > QUEUE_AGE_FAIL_SECS as i64 {
        ("fail", "fail", StatusCode::SERVICE_UNAVAILABLE)
    } else if age_secs > QUEUE_AGE_WARN_SECS as i64 {
        ("warn", "warn", StatusCode::OK)
    } else {
        ("pass", "pass", StatusCode::OK)
    };

    let body = HealthBody {
        status: overall,
        subsystems: HealthSubsystems {
            queue: queue_status,
            paused: ds.app_state.is_paused().await,
            running_agents: ds.app_state.get_running_count().await,
        },
    };

    (code, Json(body)).into_response()
}

#[derive(Serialize)]
struct PauseBody {
    paused: bool,
}

/// `POST /api/pause` — toggles the pause flag.
pub async fn post_pause(State(ds): State<DashboardState>) -> Json<PauseBody> {
    let paused = ds.app_state.toggle_pause().await;
    Json(PauseBody { paused })
}

#[derive(Serialize)]
struct TriggeredBody {
    triggered: bool,
}

/// `POST /api/planning` — triggers an out-of-schedule planner run. 409 if one
/// is already in flight.
pub async fn post_planning(State(ds): State<DashboardState>) -> Response {
    let status = ds.app_state.get_planner_status().await;
    if status.running {
        return error_response(StatusCode::CONFLICT, "planner already running");
    }

    if let Err(e) = crate::planner::run(&ds.planner_ctx).await {
        return e.into_response();
    }

    Json(TriggeredBody { triggered: true }).into_response()
}

#[derive(Serialize)]
struct CancelledBody {
    cancelled: bool,
}

/// `POST /api/cancel/:agentId` — fires the agent's cancellation token.
pub async fn post_cancel(State(ds): State<DashboardState>, Path(agent_id): Path<String>) -> Response {
    if ds.app_state.get_agent(&agent_id).await.is_none() {
        return error_response(StatusCode::NOT_FOUND, "no such running agent");
    }
    let cancelled = ds.app_state.cancel_agent(&agent_id).await;
    Json(CancelledBody { cancelled }).into_response()
}

#[derive(Serialize)]
struct RetriedBody {
    retried: bool,
}

/// `POST /api/retry/:historyId` — reverts a failed or timed-out agent's
/// issue to Ready so the executor picks it back up next tick.
pub async fn post_retry(State(ds): State<DashboardState>, Path(history_id): Path<String>) -> Response {
    let history = ds.app_state.get_history().await;
    let Some(entry) = history.into_iter().find(|e| e.agent_id == history_id) else {
        return error_response(StatusCode::NOT_FOUND, "no such history entry");
    };

    if !matches!(
        entry.status,
        crate::models::AgentStatus::Failed | crate::models::AgentStatus::TimedOut
    ) {
        return error_response(StatusCode::BAD_REQUEST, "only failed or timed-out runs can be retried");
    }

    let Some(issue_uuid) = entry.issue_uuid else {
        return error_response(StatusCode::BAD_REQUEST, "history entry has no associated issue");
    };

    if ds.app_state.has_running_issue(&issue_uuid).await {
        return error_response(StatusCode::CONFLICT, "issue already has an agent in flight");
    }

    if let Err(e) = ds
        .tracker
        .transition(&issue_uuid, "terminal", &ds.config.linear.states.ready)
        .await
    {
        return e.into_response();
    }

    Json(RetriedBody { retried: true }).into_response()
}

#[derive(Deserialize)]
pub struct LoginRequest {
    token: String,
}

#[derive(Serialize)]
struct LoginResponse {
    #[serde(rename = "sessionId")]
    session_id: String,
}

/// `POST /auth/login` — exchanges a bearer token for a dashboard session
/// cookie. Declared public (see `is_public_path`) so the login request
/// itself doesn't need a session yet.
pub async fn post_login(
    State(auth): State<Arc<DashboardAuthState>>,
    Json(body): Json<LoginRequest>,
) -> Response {
    let Some(expected) = &auth.token else {
        return error_response(StatusCode::NOT_FOUND, "dashboard auth is not configured");
    };

    use subtle::ConstantTimeEq;
    if !bool::from(body.token.as_bytes().ct_eq(expected.as_bytes())) {
        return error_response(StatusCode::UNAUTHORIZED, "invalid token");
    }

    match auth.sessions.create_session("dashboard".to_string()).await {
        Ok(session) => {
            let cookie = format!(
                "autopilot_session={}; HttpOnly; SameSite=Strict; Path=/",
                session.id
            );
            let mut response = Json(LoginResponse {
                session_id: session.id.to_string(),
            })
            .into_response();
            if let Ok(value) = axum::http::HeaderValue::from_str(&cookie) {
                response.headers_mut().insert(axum::http::header::SET_COOKIE, value);
            }
            response
        }
        Err(e) => e.into_response(),
    }
}
