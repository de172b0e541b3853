use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::models::grants::{AllowedCategory, AllowedItem, ExpiryCheck, Grants};
use crate::db::models::history::{HistoryList, HistoryState, ProcessedRequest, RequestHistory};
use crate::db::models::requests::{
    AccessRequest, PendingQueue, PendingRequestView, ProcessRequestPayload, RequestList,
    RequestStatus, SendRequestPayload,
};
use crate::db::models::subscription::{Subscription, SubscriptionList, SubscriptionSource};
use crate::middleware::auth::Viewer;
use crate::services::{access, subscriptions};
use crate::utils::api_response::ApiResponse;
use crate::utils::error::AppError;

/// Blank strings count as missing.
fn present(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn user_id_from(raw: &str) -> Result<Uuid, AppError> {
    access::parse_id(raw).ok_or_else(|| AppError::not_found("User not found"))
}

/// `{userId, id}` of the approve and reject bodies.
fn process_target(payload: ProcessRequestPayload) -> Result<(Uuid, Option<Uuid>), AppError> {
    match (present(payload.user_id), present(payload.id)) {
        (Some(user_id), Some(id)) => Ok((user_id_from(&user_id)?, access::parse_id(&id))),
        _ => Err(AppError::validation("userId and id are required")),
    }
}

#[utoipa::path(
    post,
    path = "/requests/send",
    request_body = SendRequestPayload,
    responses(
        (status = 201, description = "Request sent; the user's pending requests", body = RequestList),
        (status = 400, description = "userId and categoryName are required"),
        (status = 403, description = "Acting on another user's account"),
        (status = 404, description = "User not found"),
        (status = 409, description = "Duplicate request already pending")
    ),
    tag = "Requests"
)]
pub async fn send_request(
    State(state): State<AppState>,
    viewer: Viewer,
    Json(payload): Json<SendRequestPayload>,
) -> Result<ApiResponse<RequestList>, ApiResponse<()>> {
    let user_id = present(payload.user_id).ok_or_else(|| AppError::validation("userId is required"))?;
    let category_name = present(payload.category_name)
        .ok_or_else(|| AppError::validation("categoryName is required"))?;
    let item_name = present(payload.item_name);

    let user_id = user_id_from(&user_id)?;
    viewer.ensure_can_act_for(user_id)?;

    let requests = access::send_request(
        state.store.as_ref(),
        user_id,
        &category_name,
        item_name.as_deref(),
        state.config.reject_duplicate_requests,
        Utc::now(),
    )
    .await?;

    Ok(ApiResponse::success(StatusCode::CREATED, "Request sent", RequestList { requests }))
}

#[utoipa::path(
    delete,
    path = "/requests/remove/{userId}/{requestId}",
    params(
        ("userId" = String, Path, description = "Owner of the request"),
        ("requestId" = String, Path, description = "Request to withdraw")
    ),
    responses(
        (status = 200, description = "Request removed, or was already gone", body = RequestList),
        (status = 403, description = "Acting on another user's account"),
        (status = 404, description = "User not found")
    ),
    tag = "Requests"
)]
pub async fn remove_request(
    State(state): State<AppState>,
    viewer: Viewer,
    Path((user_id, request_id)): Path<(String, String)>,
) -> Result<ApiResponse<RequestList>, ApiResponse<()>> {
    let user_id = user_id_from(&user_id)?;
    viewer.ensure_can_act_for(user_id)?;

    let requests =
        access::remove_request(state.store.as_ref(), user_id, access::parse_id(&request_id)).await?;
    Ok(ApiResponse::success(StatusCode::OK, "Request removed", RequestList { requests }))
}

#[utoipa::path(
    get,
    path = "/requests/getRequests",
    responses(
        (status = 200, description = "Every pending request, newest first", body = PendingQueue),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Admin access required")
    ),
    tag = "Requests"
)]
pub async fn get_requests(
    State(state): State<AppState>,
) -> Result<ApiResponse<PendingQueue>, ApiResponse<()>> {
    let requests = state.store.pending_requests().await.map_err(AppError::from)?;
    Ok(ApiResponse::success(
        StatusCode::OK,
        "Requests retrieved successfully",
        PendingQueue { requests },
    ))
}

#[utoipa::path(
    get,
    path = "/requests/getAllRequestHistory",
    responses(
        (status = 200, description = "Processed requests, most recent first", body = HistoryList),
        (status = 403, description = "Admin access required")
    ),
    tag = "Requests"
)]
pub async fn get_all_request_history(
    State(state): State<AppState>,
) -> Result<ApiResponse<HistoryList>, ApiResponse<()>> {
    let history = state.store.list_history().await.map_err(AppError::from)?;
    Ok(ApiResponse::success(
        StatusCode::OK,
        "History retrieved successfully",
        HistoryList { history },
    ))
}

#[utoipa::path(
    post,
    path = "/requests/allowRequest",
    request_body = ProcessRequestPayload,
    responses(
        (status = 200, description = "Request approved; the user's grants", body = Grants),
        (status = 400, description = "userId and id are required"),
        (status = 404, description = "User, request, category or item not found"),
        (status = 409, description = "Request has already been processed")
    ),
    tag = "Requests"
)]
pub async fn allow_request(
    State(state): State<AppState>,
    Json(payload): Json<ProcessRequestPayload>,
) -> Result<ApiResponse<Grants>, ApiResponse<()>> {
    let (user_id, request_id) = process_target(payload)?;
    let grants = access::allow_request(state.store.as_ref(), user_id, request_id, Utc::now()).await?;
    Ok(ApiResponse::success(StatusCode::OK, "Request approved", grants))
}

#[utoipa::path(
    post,
    path = "/requests/rejectRequest",
    request_body = ProcessRequestPayload,
    responses(
        (status = 200, description = "Request rejected", body = ProcessedRequest),
        (status = 400, description = "userId and id are required"),
        (status = 404, description = "User or request not found"),
        (status = 409, description = "Request has already been processed")
    ),
    tag = "Requests"
)]
pub async fn reject_request(
    State(state): State<AppState>,
    Json(payload): Json<ProcessRequestPayload>,
) -> Result<ApiResponse<ProcessedRequest>, ApiResponse<()>> {
    let (user_id, request_id) = process_target(payload)?;
    let history =
        access::reject_request(state.store.as_ref(), user_id, request_id, Utc::now()).await?;
    Ok(ApiResponse::success(StatusCode::OK, "Request rejected", ProcessedRequest { history }))
}

async fn expiration_for(state: &AppState, user_id: Uuid) -> Result<ApiResponse<ExpiryCheck>, ApiResponse<()>> {
    let check = access::check_expiration(state.store.as_ref(), user_id, Utc::now()).await?;
    Ok(ApiResponse::success(StatusCode::OK, "Expiration checked", check))
}

#[utoipa::path(
    get,
    path = "/requests/checkExpiration/{id}",
    params(("id" = String, Path, description = "User ID")),
    responses(
        (status = 200, description = "Lapsed grants removed; remaining grants", body = ExpiryCheck),
        (status = 404, description = "User not found")
    ),
    tag = "Requests"
)]
pub async fn check_expiration(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<String>,
) -> Result<ApiResponse<ExpiryCheck>, ApiResponse<()>> {
    let user_id = user_id_from(&id)?;
    viewer.ensure_can_act_for(user_id)?;
    expiration_for(&state, user_id).await
}

#[utoipa::path(
    get,
    path = "/requests/checkExpiration",
    responses(
        (status = 200, description = "Same as the path variant, for the logged-in user", body = ExpiryCheck),
        (status = 401, description = "Not authenticated")
    ),
    tag = "Requests"
)]
pub async fn check_own_expiration(
    State(state): State<AppState>,
    viewer: Viewer,
) -> Result<ApiResponse<ExpiryCheck>, ApiResponse<()>> {
    let user_id = viewer.user_id()?;
    expiration_for(&state, user_id).await
}

async fn subscriptions_for(
    state: &AppState,
    user_id: Uuid,
) -> Result<ApiResponse<SubscriptionList>, ApiResponse<()>> {
    let subscriptions =
        subscriptions::user_subscriptions(state.store.as_ref(), user_id, Utc::now()).await?;
    Ok(ApiResponse::success(
        StatusCode::OK,
        "Subscriptions retrieved successfully",
        SubscriptionList { subscriptions },
    ))
}

#[utoipa::path(
    get,
    path = "/requests/getUserSubscriptions/{id}",
    params(("id" = String, Path, description = "User ID")),
    responses(
        (status = 200, description = "Items the user can open, newest first", body = SubscriptionList),
        (status = 404, description = "User not found")
    ),
    tag = "Requests"
)]
pub async fn get_user_subscriptions(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<String>,
) -> Result<ApiResponse<SubscriptionList>, ApiResponse<()>> {
    let user_id = user_id_from(&id)?;
    viewer.ensure_can_act_for(user_id)?;
    subscriptions_for(&state, user_id).await
}

#[utoipa::path(
    get,
    path = "/requests/getUserSubscriptions",
    responses(
        (status = 200, description = "Same as the path variant, for the logged-in user", body = SubscriptionList),
        (status = 401, description = "Not authenticated")
    ),
    tag = "Requests"
)]
pub async fn get_own_subscriptions(
    State(state): State<AppState>,
    viewer: Viewer,
) -> Result<ApiResponse<SubscriptionList>, ApiResponse<()>> {
    let user_id = viewer.user_id()?;
    subscriptions_for(&state, user_id).await
}

use utoipa::OpenApi;
#[derive(OpenApi)]
#[openapi(
    paths(
        send_request,
        remove_request,
        get_requests,
        get_all_request_history,
        allow_request,
        reject_request,
        check_expiration,
        check_own_expiration,
        get_user_subscriptions,
        get_own_subscriptions
    ),
    components(schemas(
        AccessRequest,
        RequestStatus,
        RequestList,
        PendingQueue,
        PendingRequestView,
        SendRequestPayload,
        ProcessRequestPayload,
        RequestHistory,
        HistoryState,
        HistoryList,
        ProcessedRequest,
        Grants,
        AllowedCategory,
        AllowedItem,
        ExpiryCheck,
        Subscription,
        SubscriptionSource,
        SubscriptionList
    )),
    tags(
        (name = "Requests", description = "Access requests, approvals, grants and subscriptions")
    )
)]
pub struct RequestDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approve_body_needs_both_ids() {
        let missing = process_target(ProcessRequestPayload { user_id: Some("  ".into()), id: Some("x".into()) });
        assert!(matches!(missing, Err(AppError::Validation(m)) if m == "userId and id are required"));

        let bad_user = process_target(ProcessRequestPayload { user_id: Some("u1".into()), id: Some("x".into()) });
        assert!(matches!(bad_user, Err(AppError::NotFound(m)) if m == "User not found"));

        let user = Uuid::new_v4();
        let ok = process_target(ProcessRequestPayload { user_id: Some(user.to_string()), id: Some("x".into()) });
        assert_eq!(ok.unwrap(), (user, None));
    }
}
