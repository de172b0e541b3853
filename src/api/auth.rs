use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::Redirect,
    routing::get,
    Router,
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use reqwest::Url;
use serde::Deserialize;
use tracing::{info, warn};
use utoipa::{IntoParams, ToSchema};

use crate::app_state::AppState;
use crate::config::GoogleOAuthConfig;
use crate::db::models::user::{AuthUser, NewUser, Role, UserProfile};
use crate::middleware::auth::{
    clear_session_cookie, session_cookie, session_id_from_headers, set_cookie_headers, Session,
    Viewer,
};
use crate::utils::api_response::ApiResponse;
use crate::utils::error::AppError;

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

#[derive(Deserialize, ToSchema, IntoParams)]
pub struct GoogleAuthCallback {
    pub code: Option<String>,
    pub state: Option<String>,
}

#[derive(Deserialize)]
struct GoogleTokenResponse {
    id_token: String,
}

/// Claims read from the ID token payload. The token comes straight from
/// Google's token endpoint over TLS, so its signature is not re-checked.
#[derive(Debug, Deserialize, PartialEq)]
pub struct GoogleIdClaims {
    pub sub: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
}

fn google_config(state: &AppState) -> Result<&GoogleOAuthConfig, AppError> {
    state.config.google.as_ref().ok_or_else(|| AppError::Internal {
        message: "Google sign-in is not configured".to_string(),
        detail: "GOOGLE_CLIENT_ID, GOOGLE_CLIENT_SECRET and GOOGLE_REDIRECT_URI must be set".to_string(),
    })
}

pub fn decode_id_token(id_token: &str) -> Result<GoogleIdClaims, AppError> {
    let parts: Vec<&str> = id_token.split('.').collect();
    if parts.len() != 3 {
        return Err(AppError::validation("Invalid ID Token format"));
    }

    let payload = URL_SAFE_NO_PAD
        .decode(parts[1].trim_end_matches('='))
        .map_err(|_| AppError::validation("Failed to decode ID Token"))?;

    serde_json::from_slice(&payload).map_err(|_| AppError::validation("Failed to parse user info"))
}

/// ✅ **Redirect User to Google OAuth**
#[utoipa::path(
    get,
    path = "/auth/google",
    tag = "Auth",
    responses(
        (status = 303, description = "Redirect to the Google consent screen"),
        (status = 500, description = "Google sign-in is not configured")
    )
)]
pub async fn google_auth_redirect(
    State(state): State<AppState>,
) -> Result<Redirect, ApiResponse<()>> {
    let google = google_config(&state)?;
    let csrf_state = state.sessions.issue_oauth_state();

    let url = Url::parse_with_params(
        GOOGLE_AUTH_URL,
        &[
            ("client_id", google.client_id.as_str()),
            ("redirect_uri", google.redirect_uri.as_str()),
            ("response_type", "code"),
            ("scope", "openid email profile"),
            ("state", csrf_state.as_str()),
        ],
    )
    .map_err(|e| AppError::Internal {
        message: "Failed to build Google sign-in URL".to_string(),
        detail: e.to_string(),
    })?;

    Ok(Redirect::to(url.as_str()))
}

/// ✅ **Handle Google OAuth Callback**
#[utoipa::path(
    get,
    path = "/auth/google/callback",
    tag = "Auth",
    params(GoogleAuthCallback),
    responses(
        (status = 303, description = "Session cookie set, redirect to the frontend"),
        (status = 400, description = "Missing code or invalid state"),
        (status = 502, description = "Google token exchange failed")
    )
)]
pub async fn google_auth_callback(
    State(state): State<AppState>,
    Query(params): Query<GoogleAuthCallback>,
) -> Result<(HeaderMap, Redirect), ApiResponse<()>> {
    let google = google_config(&state)?;

    let valid_state = params
        .state
        .as_deref()
        .is_some_and(|s| state.sessions.take_oauth_state(s));
    if !valid_state {
        warn!("OAuth callback with unknown state");
        return Err(AppError::validation("Invalid OAuth state").into());
    }
    let code = params
        .code
        .ok_or_else(|| AppError::validation("Missing authorization code"))?;

    let token_response: GoogleTokenResponse = state
        .http
        .post(GOOGLE_TOKEN_URL)
        .form(&[
            ("client_id", google.client_id.as_str()),
            ("client_secret", google.client_secret.as_str()),
            ("code", code.as_str()),
            ("grant_type", "authorization_code"),
            ("redirect_uri", google.redirect_uri.as_str()),
        ])
        .send()
        .await
        .and_then(|response| response.error_for_status())
        .map_err(|e| AppError::Upstream {
            message: "Failed to exchange auth code".to_string(),
            detail: e.to_string(),
        })?
        .json()
        .await
        .map_err(|e| AppError::Upstream {
            message: "Failed to parse token response".to_string(),
            detail: e.to_string(),
        })?;

    let claims = decode_id_token(&token_response.id_token)?;
    let role = if state.config.is_admin_email(&claims.email) {
        Role::Admin
    } else {
        Role::User
    };

    let user = state
        .store
        .upsert_google_user(&NewUser {
            google_id: claims.sub,
            name: claims.name.unwrap_or_else(|| claims.email.clone()),
            email: claims.email,
            avatar: claims.picture.unwrap_or_default(),
            role,
        })
        .await
        .map_err(AppError::from)?;

    let session_id = state.sessions.create(Session {
        user_id: user.id,
        role: user.role,
    });
    let cookie = session_cookie(&session_id, state.sessions.ttl(), state.config.production)?;

    info!(user_id = %user.id, role = %user.role, "User signed in with Google");
    Ok((set_cookie_headers(cookie), Redirect::to(&state.config.frontend_url)))
}

#[utoipa::path(
    get,
    path = "/auth/logout",
    tag = "Auth",
    responses(
        (status = 303, description = "Session destroyed, cookie cleared, redirect to the frontend")
    )
)]
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> (HeaderMap, Redirect) {
    if let Some(id) = session_id_from_headers(&headers) {
        state.sessions.destroy(&id);
    }
    (
        set_cookie_headers(clear_session_cookie(state.config.production)),
        Redirect::to(&state.config.frontend_url),
    )
}

#[utoipa::path(
    get,
    path = "/auth/checkAuth",
    tag = "Auth",
    responses(
        (status = 200, description = "Signed-in user with pending requests and grants", body = AuthUser),
        (status = 401, description = "Not authenticated", body = AuthUser)
    )
)]
pub async fn check_auth(
    State(state): State<AppState>,
    viewer: Viewer,
) -> Result<ApiResponse<AuthUser>, ApiResponse<()>> {
    let not_authenticated =
        || ApiResponse::new(StatusCode::UNAUTHORIZED, "Not authenticated", AuthUser { user: None });

    let Some(session) = viewer.0 else {
        return Ok(not_authenticated());
    };
    let Some(user) = state.store.find_user(session.user_id).await.map_err(AppError::from)? else {
        return Ok(not_authenticated());
    };

    let requests = state.store.pending_requests_for(user.id).await.map_err(AppError::from)?;
    let grants = state.store.grants_for(user.id).await.map_err(AppError::from)?;

    Ok(ApiResponse::success(
        StatusCode::OK,
        "Authenticated",
        AuthUser {
            user: Some(UserProfile { user, requests, grants }),
        },
    ))
}

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/google", get(google_auth_redirect))
        .route("/auth/google/callback", get(google_auth_callback))
        .route("/auth/logout", get(logout))
        .route("/auth/checkAuth", get(check_auth))
}

use utoipa::OpenApi;
#[derive(OpenApi)]
#[openapi(
    paths(
        google_auth_redirect,
        google_auth_callback,
        logout,
        check_auth
    ),
    components(schemas(GoogleAuthCallback, AuthUser, UserProfile)),
    tags(
        (name = "Auth", description = "Google sign-in and server-side sessions")
    )
)]
pub struct AuthDoc;

#[cfg(test)]
mod tests {
    use super::*;

    fn token(payload: &str) -> String {
        format!("header.{}.signature", URL_SAFE_NO_PAD.encode(payload))
    }

    #[test]
    fn id_token_payload_is_decoded() {
        let claims = decode_id_token(&token(
            r#"{"sub":"1234","email":"a@example.com","name":"Ahmad","picture":"https://img/x.png","aud":"client"}"#,
        ))
        .unwrap();
        assert_eq!(
            claims,
            GoogleIdClaims {
                sub: "1234".to_string(),
                email: "a@example.com".to_string(),
                name: Some("Ahmad".to_string()),
                picture: Some("https://img/x.png".to_string()),
            }
        );
    }

    #[test]
    fn malformed_id_tokens_are_rejected() {
        assert!(matches!(decode_id_token("only.two"), Err(AppError::Validation(_))));
        assert!(matches!(decode_id_token("a.!!!.c"), Err(AppError::Validation(_))));
        assert!(matches!(decode_id_token(&token(r#"{"email":"x"}"#)), Err(AppError::Validation(_))));
    }
}
