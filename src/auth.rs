//! Dashboard authentication middleware: accepts a bearer token or a signed
//! session cookie. Cookie-authenticated POSTs must additionally carry a
//! non-simple header (CSRF defence, since simple requests can't set one
//! cross-origin).

use axum::{
    extract::{Request, State},
    http::{HeaderMap, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::warn;
use uuid::Uuid;

use crate::session::{SessionManager, SessionStore};

#[derive(Clone)]
pub struct AuthState<S: SessionStore> {
    pub token: Option<String>,
    pub sessions: Arc<SessionManager<S>>,
}

const COOKIE_NAME: &str = "autopilot_session";
const CSRF_HEADER: &str = "x-requested-with";

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({"error": "unauthorized"}))).into_response()
}

/// Routes exempt from auth entirely: `/health` and `/auth/*`.
pub fn is_public_path(path: &str) -> bool {
    path == "/health" || path.starts_with("/auth/")
}

pub async fn auth_middleware<S: SessionStore + 'static>(
    State(auth): State<Arc<AuthState<S>>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, Response> {
    let path = request.uri().path().to_string();
    let method = request.method().clone();

    if method == Method::OPTIONS || is_public_path(&path) {
        return Ok(next.run(request).await);
    }

    let Some(expected_token) = &auth.token else {
        // No token configured: dashboard runs open (loopback-only binding
        // is enforced at startup in this case).
        return Ok(next.run(request).await);
    };

    if let Some(header_value) = headers.get("authorization") {
        let auth_str = header_value.to_str().map_err(|_| unauthorized())?;
        if let Some(token) = auth_str.strip_prefix("Bearer ") {
            if token.as_bytes().ct_eq(expected_token.as_bytes()).into() {
                return Ok(next.run(request).await);
            }
        }
        warn!(path, "rejected bearer token");
        return Err(unauthorized());
    }

    if let Some(cookie_header) = headers.get("cookie") {
        if let Ok(cookie_str) = cookie_header.to_str() {
            if let Some(session_id) = extract_cookie(cookie_str, COOKIE_NAME) {
                if method != Method::GET && !headers.contains_key(CSRF_HEADER) {
                    warn!(path, "cookie auth on state-changing request missing CSRF header");
                    return Err(unauthorized());
                }
                if let Ok(uuid) = Uuid::parse_str(&session_id) {
                    if let Ok(session) = auth.sessions.validate_session(&uuid).await {
                        if session.state == crate::session::SessionState::Active {
                            return Ok(next.run(request).await);
                        }
                    }
                }
            }
        }
    }

    warn!(path, "missing or invalid dashboard credentials");
    Err(unauthorized())
}

fn extract_cookie(cookie_header: &str, name: &str) -> Option<String> {
    cookie_header.split(';').find_map(|part| {
        let part = part.trim();
        let (k, v) = part.split_once('=')?;
        (k == name).then(|| v.to_string())
    })
}
