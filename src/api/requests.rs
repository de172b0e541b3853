use axum::{
    routing::{delete, get, post},
    Router,
};

use crate::app_state::AppState;
use crate::db::queries::requests::*;

/// Routes any signed-in user may call, on their own account.
pub fn request_routes() -> Router<AppState> {
    Router::new()
        .route("/requests/send", post(send_request))
        .route("/requests/remove/{userId}/{requestId}", delete(remove_request))
        .route("/requests/checkExpiration", get(check_own_expiration))
        .route("/requests/checkExpiration/{id}", get(check_expiration))
        .route("/requests/getUserSubscriptions", get(get_own_subscriptions))
        .route("/requests/getUserSubscriptions/{id}", get(get_user_subscriptions))
}

pub fn admin_request_routes() -> Router<AppState> {
    Router::new()
        .route("/requests/getRequests", get(get_requests))
        .route("/requests/getAllRequestHistory", get(get_all_request_history))
        .route("/requests/allowRequest", post(allow_request))
        .route("/requests/rejectRequest", post(reject_request))
}
