use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::models::category::{Category, CategoryUpdate, NewCategory};
use crate::db::models::grants::{GrantTarget, Grants};
use crate::db::models::history::{NewHistoryRecord, RequestHistory};
use crate::db::models::requests::{AccessRequest, NewAccessRequest, PendingRequestView};
use crate::db::models::user::{NewUser, User};

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur at the persistence layer
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A uniqueness rule or a conditional write did not hold.
    #[error("{0}")]
    Conflict(String),

    #[error("Stored value is invalid: {0}")]
    Corrupt(String),
}

/// How a pending request is settled.
#[derive(Debug, Clone)]
pub enum Outcome {
    Accept {
        target: GrantTarget,
        expires_at: DateTime<Utc>,
    },
    Reject,
}

/// Everything that changes when an admin processes one request. Stores apply
/// it atomically: the request must still be pending, otherwise nothing is
/// written and `StoreError::Conflict` is returned.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub user_id: Uuid,
    pub request_id: Uuid,
    pub processed_at: DateTime<Utc>,
    pub outcome: Outcome,
    pub history: NewHistoryRecord,
}

#[derive(Debug, Clone)]
pub struct Settled {
    pub grants: Grants,
    pub record: RequestHistory,
}

pub const REQUEST_ALREADY_PROCESSED: &str = "Request has already been processed";

#[async_trait]
pub trait Store: Send + Sync {
    async fn ping(&self) -> StoreResult<()>;

    // Users

    /// Finds the user by Google id or creates it.
    async fn upsert_google_user(&self, user: &NewUser) -> StoreResult<User>;
    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>>;

    // Categories

    async fn create_category(&self, category: &NewCategory) -> StoreResult<Category>;
    /// Sorted by rank ascending.
    async fn list_categories(&self) -> StoreResult<Vec<Category>>;
    async fn find_category(&self, id: Uuid) -> StoreResult<Option<Category>>;
    async fn find_category_by_name(&self, name: &str) -> StoreResult<Option<Category>>;
    async fn update_category(&self, update: &CategoryUpdate) -> StoreResult<Option<Category>>;
    async fn delete_category(&self, id: Uuid) -> StoreResult<bool>;

    // Requests

    async fn insert_request(
        &self,
        user_id: Uuid,
        request: &NewAccessRequest,
    ) -> StoreResult<AccessRequest>;
    /// Oldest first.
    async fn pending_requests_for(&self, user_id: Uuid) -> StoreResult<Vec<AccessRequest>>;
    async fn find_pending_request(
        &self,
        user_id: Uuid,
        request_id: Uuid,
    ) -> StoreResult<Option<AccessRequest>>;
    async fn has_pending_duplicate(
        &self,
        user_id: Uuid,
        category_name: &str,
        item_name: Option<&str>,
    ) -> StoreResult<bool>;
    /// Returns whether a pending request was removed.
    async fn delete_pending_request(&self, user_id: Uuid, request_id: Uuid) -> StoreResult<bool>;
    /// Every pending request with its requester, newest first.
    async fn pending_requests(&self) -> StoreResult<Vec<PendingRequestView>>;

    async fn settle_request(&self, settlement: &Settlement) -> StoreResult<Settled>;

    // Grants

    async fn grants_for(&self, user_id: Uuid) -> StoreResult<Grants>;
    /// Drops the user's grants with `expires <= now`; returns how many went.
    async fn prune_expired_grants(&self, user_id: Uuid, now: DateTime<Utc>) -> StoreResult<u64>;
    async fn prune_all_expired_grants(&self, now: DateTime<Utc>) -> StoreResult<u64>;

    // History

    /// Newest processing time first.
    async fn list_history(&self) -> StoreResult<Vec<RequestHistory>>;
}
