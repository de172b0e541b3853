use std::convert::Infallible;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{FromRequestParts, Request, State},
    http::{header::SET_COOKIE, request::Parts, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use headers::HeaderMapExt;
use moka::sync::Cache; // ✅ TTL cache for sessions
use tracing::{debug, warn};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::models::user::Role;
use crate::utils::api_response::ApiResponse;
use crate::utils::error::AppError;

/// Cookie name the frontend expects.
pub const SESSION_COOKIE: &str = "connect.sid";

const OAUTH_STATE_TTL: Duration = Duration::from_secs(600);

/// ✅ **Logged-in user attached to the request**
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: Uuid,
    pub role: Role,
}

impl Session {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Server-side sessions. The cookie only carries the session id.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Cache<String, Session>,
    oauth_states: Cache<String, ()>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Cache::builder().time_to_live(ttl).build(),
            oauth_states: Cache::builder().time_to_live(OAUTH_STATE_TTL).build(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Opens a session and returns its id.
    pub fn create(&self, session: Session) -> String {
        let id = random_token();
        self.sessions.insert(id.clone(), session);
        id
    }

    pub fn get(&self, id: &str) -> Option<Session> {
        self.sessions.get(id)
    }

    pub fn destroy(&self, id: &str) {
        self.sessions.invalidate(id);
    }

    /// CSRF `state` for the OAuth round trip.
    pub fn issue_oauth_state(&self) -> String {
        let state = random_token();
        self.oauth_states.insert(state.clone(), ());
        state
    }

    /// Single use: a state is forgotten once checked.
    pub fn take_oauth_state(&self, state: &str) -> bool {
        self.oauth_states.remove(state).is_some()
    }
}

fn random_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

fn cookie_attributes(production: bool) -> &'static str {
    if production {
        "HttpOnly; SameSite=Lax; Path=/; Secure"
    } else {
        "HttpOnly; SameSite=Lax; Path=/"
    }
}

pub fn session_cookie(id: &str, ttl: Duration, production: bool) -> Result<HeaderValue, AppError> {
    let raw = format!(
        "{SESSION_COOKIE}={id}; {}; Max-Age={}",
        cookie_attributes(production),
        ttl.as_secs()
    );
    HeaderValue::from_str(&raw).map_err(|e| AppError::Internal {
        message: "Failed to build session cookie".to_string(),
        detail: e.to_string(),
    })
}

pub fn clear_session_cookie(production: bool) -> HeaderValue {
    if production {
        HeaderValue::from_static("connect.sid=; HttpOnly; SameSite=Lax; Path=/; Secure; Max-Age=0")
    } else {
        HeaderValue::from_static("connect.sid=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0")
    }
}

pub fn session_id_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .typed_get::<headers::Cookie>()
        .and_then(|cookie| cookie.get(SESSION_COOKIE).map(str::to_string))
        .filter(|id| !id.is_empty())
}

/// ✅ **Session Middleware**: resolves the `connect.sid` cookie and stores
/// the [`Session`] in the request extensions. Never rejects.
pub async fn session_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    if let Some(id) = session_id_from_headers(req.headers()) {
        match state.sessions.get(&id) {
            Some(session) => {
                req.extensions_mut().insert(session);
            }
            None => debug!("Unknown or expired session cookie"),
        }
    }
    next.run(req).await
}

fn unauthenticated() -> Response {
    ApiResponse::<()>::error(StatusCode::UNAUTHORIZED, "Not authenticated", None).into_response()
}

/// ✅ **Gate: any logged-in user**
pub async fn require_session(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, Response> {
    if state.config.auth_disabled || req.extensions().get::<Session>().is_some() {
        return Ok(next.run(req).await);
    }
    warn!(path = %req.uri().path(), "Rejected request without session");
    Err(unauthenticated())
}

/// ✅ **Gate: admins only**
pub async fn require_admin(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, Response> {
    if state.config.auth_disabled {
        return Ok(next.run(req).await);
    }
    match req.extensions().get::<Session>() {
        Some(session) if session.is_admin() => Ok(next.run(req).await),
        Some(session) => {
            warn!(user_id = %session.user_id, path = %req.uri().path(), "Admin route denied");
            Err(AppError::Forbidden("Admin access required".to_string()).into_response())
        }
        None => Err(unauthenticated()),
    }
}

/// Session of the caller, if any. Absent only when authentication is
/// disabled or on public routes.
#[derive(Debug, Clone)]
pub struct Viewer(pub Option<Session>);

impl<S> FromRequestParts<S> for Viewer
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Viewer(parts.extensions.get::<Session>().cloned()))
    }
}

impl Viewer {
    /// Non-admins may only act on their own account.
    pub fn ensure_can_act_for(&self, user_id: Uuid) -> Result<(), AppError> {
        match &self.0 {
            Some(session) if !session.is_admin() && session.user_id != user_id => Err(
                AppError::Forbidden("You can only act on your own account".to_string()),
            ),
            _ => Ok(()),
        }
    }

    pub fn user_id(&self) -> Result<Uuid, AppError> {
        self.0
            .as_ref()
            .map(|session| session.user_id)
            .ok_or_else(|| AppError::Unauthorized("Not authenticated".to_string()))
    }
}

/// Builds a `Set-Cookie` header map for handlers returning redirects.
pub fn set_cookie_headers(value: HeaderValue) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, value);
    headers
}
