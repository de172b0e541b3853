//! Request / approval / expiration lifecycle of access grants.
//!
//! A user asks for a category or a single item; an admin either approves the
//! request, which turns it into a grant valid for one calendar month plus an
//! `accepted` history record, or rejects it, which only leaves a `rejected`
//! history record. Grants past their expiry are pruned on demand here and
//! periodically by [`crate::services::sweeper`].

use chrono::{DateTime, Months, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::models::grants::{ExpiryCheck, GrantTarget, Grants};
use crate::db::models::history::{HistoryState, NewHistoryRecord, RequestHistory};
use crate::db::models::requests::{AccessRequest, NewAccessRequest};
use crate::db::models::user::User;
use crate::db::store::{Outcome, Settlement, Store};
use crate::utils::error::AppError;

/// Length of every grant.
pub const GRANT_TERM: Months = Months::new(1);

pub fn grant_expiry(now: DateTime<Utc>) -> Result<DateTime<Utc>, AppError> {
    now.checked_add_months(GRANT_TERM)
        .ok_or_else(|| AppError::Internal {
            message: "Failed to compute grant expiry".to_string(),
            detail: format!("{now} + {GRANT_TERM:?} is out of range"),
        })
}

/// Ids arrive as strings; one that does not parse cannot name a stored
/// record, so it is reported the same way as a missing one.
pub fn parse_id(raw: &str) -> Option<Uuid> {
    Uuid::parse_str(raw.trim()).ok()
}

pub async fn load_user(store: &dyn Store, user_id: Uuid) -> Result<User, AppError> {
    store
        .find_user(user_id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))
}

/// Appends a pending request and returns the user's pending list.
pub async fn send_request(
    store: &dyn Store,
    user_id: Uuid,
    category_name: &str,
    item_name: Option<&str>,
    reject_duplicates: bool,
    now: DateTime<Utc>,
) -> Result<Vec<AccessRequest>, AppError> {
    load_user(store, user_id).await?;

    if reject_duplicates
        && store
            .has_pending_duplicate(user_id, category_name, item_name)
            .await?
    {
        return Err(AppError::Conflict("Duplicate request already pending".to_string()));
    }

    let request = store
        .insert_request(
            user_id,
            &NewAccessRequest {
                category_name: category_name.to_string(),
                item_name: item_name.map(str::to_string),
                created_at: now,
            },
        )
        .await?;
    info!(
        user_id = %user_id,
        request_id = %request.id,
        category = %request.category_name,
        item = ?request.item_name,
        "Access request sent"
    );

    Ok(store.pending_requests_for(user_id).await?)
}

/// Withdraws a pending request. Unknown request ids are a no-op.
pub async fn remove_request(
    store: &dyn Store,
    user_id: Uuid,
    request_id: Option<Uuid>,
) -> Result<Vec<AccessRequest>, AppError> {
    load_user(store, user_id).await?;

    if let Some(request_id) = request_id {
        if store.delete_pending_request(user_id, request_id).await? {
            info!(user_id = %user_id, request_id = %request_id, "Access request withdrawn");
        }
    }

    Ok(store.pending_requests_for(user_id).await?)
}

async fn load_pending(
    store: &dyn Store,
    user_id: Uuid,
    request_id: Option<Uuid>,
) -> Result<(User, AccessRequest), AppError> {
    let user = load_user(store, user_id).await?;
    let request = match request_id {
        Some(request_id) => store.find_pending_request(user_id, request_id).await?,
        None => None,
    };
    let request = request.ok_or_else(|| AppError::not_found("Request not found"))?;
    Ok((user, request))
}

/// Resolves the request's names to ids: the category by its unique name,
/// then the item by title inside it.
async fn resolve_target(store: &dyn Store, request: &AccessRequest) -> Result<GrantTarget, AppError> {
    let category = store
        .find_category_by_name(&request.category_name)
        .await?
        .ok_or_else(|| AppError::not_found("Category not found in database"))?;

    match request.item_name.as_deref() {
        Some(title) => {
            let item = category
                .item_by_title(title)
                .ok_or_else(|| AppError::not_found("Item not found in category"))?;
            Ok(GrantTarget::Item {
                category_id: category.id,
                item_id: item.id,
            })
        }
        None => Ok(GrantTarget::Category {
            category_id: category.id,
        }),
    }
}

fn history_entry(
    user: &User,
    request: &AccessRequest,
    state: HistoryState,
    processed_at: DateTime<Utc>,
    expired_date: DateTime<Utc>,
) -> NewHistoryRecord {
    NewHistoryRecord {
        request_id: request.id,
        user_id: user.id,
        user_name: user.name.clone(),
        user_email: user.email.clone(),
        category_name: request.category_name.clone(),
        item_name: request.item_name.clone(),
        created_at: request.created_at,
        processed_at,
        expired_date,
        state,
    }
}

/// Approves a pending request and returns the user's grants afterwards.
pub async fn allow_request(
    store: &dyn Store,
    user_id: Uuid,
    request_id: Option<Uuid>,
    now: DateTime<Utc>,
) -> Result<Grants, AppError> {
    let (user, request) = load_pending(store, user_id, request_id).await?;
    let expires_at = grant_expiry(now)?;
    let target = resolve_target(store, &request).await?;

    let settled = store
        .settle_request(&Settlement {
            user_id,
            request_id: request.id,
            processed_at: now,
            outcome: Outcome::Accept { target, expires_at },
            history: history_entry(&user, &request, HistoryState::Accepted, now, expires_at),
        })
        .await?;

    info!(
        user_id = %user_id,
        request_id = %request.id,
        category = %request.category_name,
        item = ?request.item_name,
        expires_at = %expires_at,
        grants = settled.grants.len(),
        "Access request approved"
    );
    Ok(settled.grants)
}

/// Rejects a pending request. Rejections expire the moment they are made.
pub async fn reject_request(
    store: &dyn Store,
    user_id: Uuid,
    request_id: Option<Uuid>,
    now: DateTime<Utc>,
) -> Result<RequestHistory, AppError> {
    let (user, request) = load_pending(store, user_id, request_id).await?;

    let settled = store
        .settle_request(&Settlement {
            user_id,
            request_id: request.id,
            processed_at: now,
            outcome: Outcome::Reject,
            history: history_entry(&user, &request, HistoryState::Rejected, now, now),
        })
        .await?;

    info!(user_id = %user_id, request_id = %request.id, "Access request rejected");
    Ok(settled.record)
}

/// Drops the user's grants whose expiry is not strictly in the future.
pub async fn check_expiration(
    store: &dyn Store,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<ExpiryCheck, AppError> {
    load_user(store, user_id).await?;

    let removed = store.prune_expired_grants(user_id, now).await?;
    if removed > 0 {
        warn!(user_id = %user_id, removed, "Expired grants removed");
    }

    Ok(ExpiryCheck {
        removed,
        grants: store.grants_for(user_id).await?,
    })
}
