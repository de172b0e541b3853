use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::models::category::{resolve_items, Category, CategoryUpdate, NewCategory};
use crate::db::models::grants::{AllowedCategory, AllowedItem, GrantTarget, Grants};
use crate::db::models::history::RequestHistory;
use crate::db::models::requests::{AccessRequest, NewAccessRequest, PendingRequestView, RequestStatus};
use crate::db::models::user::{NewUser, Role, User};
use crate::db::store::{
    Outcome, Settled, Settlement, Store, StoreError, StoreResult, REQUEST_ALREADY_PROCESSED,
};

#[derive(Default)]
struct State {
    users: HashMap<Uuid, User>,
    categories: Vec<Category>,
    requests: Vec<AccessRequest>,
    allowed_categories: HashMap<Uuid, Vec<AllowedCategory>>,
    allowed_items: HashMap<Uuid, Vec<AllowedItem>>,
    history: Vec<RequestHistory>,
}

impl State {
    fn grants_of(&self, user_id: Uuid) -> Grants {
        Grants {
            allowed_categories: self
                .allowed_categories
                .get(&user_id)
                .cloned()
                .unwrap_or_default(),
            allowed_items: self.allowed_items.get(&user_id).cloned().unwrap_or_default(),
        }
    }

    fn name_taken(&self, name: &str, except: Option<Uuid>) -> bool {
        self.categories
            .iter()
            .any(|c| c.name == name && Some(c.id) != except)
    }

    fn prune(&mut self, user: Option<Uuid>, now: DateTime<Utc>) -> u64 {
        let mut removed = 0;
        for (owner, grants) in self.allowed_categories.iter_mut() {
            if user.map_or(true, |u| u == *owner) {
                let before = grants.len();
                grants.retain(|g| g.expired_date > now);
                removed += (before - grants.len()) as u64;
            }
        }
        for (owner, grants) in self.allowed_items.iter_mut() {
            if user.map_or(true, |u| u == *owner) {
                let before = grants.len();
                grants.retain(|g| g.expired_date > now);
                removed += (before - grants.len()) as u64;
            }
        }
        removed
    }
}

/// Store kept in process memory. Used when no `DATABASE_URL` is configured
/// and by the test suite. A single lock serializes writers, so settlements
/// are atomic.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn upsert_google_user(&self, user: &NewUser) -> StoreResult<User> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        if let Some(existing) = state
            .users
            .values_mut()
            .find(|u| u.google_id == user.google_id)
        {
            if user.role == Role::Admin {
                existing.role = Role::Admin;
            }
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let created = User {
            id: Uuid::new_v4(),
            google_id: user.google_id.clone(),
            email: user.email.clone(),
            name: user.name.clone(),
            avatar: user.avatar.clone(),
            role: user.role,
            created_at: now,
            updated_at: now,
        };
        state.users.insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.state.read().await.users.get(&id).cloned())
    }

    async fn create_category(&self, category: &NewCategory) -> StoreResult<Category> {
        let mut state = self.state.write().await;
        if state.name_taken(&category.name, None) {
            return Err(StoreError::Conflict(
                "A category with this name already exists".to_string(),
            ));
        }
        let created = Category {
            id: Uuid::new_v4(),
            name: category.name.clone(),
            description: category.description.clone(),
            rank: category.rank,
            price: category.price,
            items: Vec::new(),
            created_at: Utc::now(),
        };
        state.categories.push(created.clone());
        Ok(created)
    }

    async fn list_categories(&self) -> StoreResult<Vec<Category>> {
        let mut categories = self.state.read().await.categories.clone();
        // Stable sort keeps insertion order among equal ranks.
        categories.sort_by_key(|c| c.rank);
        Ok(categories)
    }

    async fn find_category(&self, id: Uuid) -> StoreResult<Option<Category>> {
        let state = self.state.read().await;
        Ok(state.categories.iter().find(|c| c.id == id).cloned())
    }

    async fn find_category_by_name(&self, name: &str) -> StoreResult<Option<Category>> {
        let state = self.state.read().await;
        Ok(state.categories.iter().find(|c| c.name == name).cloned())
    }

    async fn update_category(&self, update: &CategoryUpdate) -> StoreResult<Option<Category>> {
        let mut state = self.state.write().await;
        if let Some(name) = &update.name {
            if state.name_taken(name, Some(update.id)) {
                return Err(StoreError::Conflict(
                    "A category with this name already exists".to_string(),
                ));
            }
        }

        let Some(category) = state.categories.iter_mut().find(|c| c.id == update.id) else {
            return Ok(None);
        };
        if let Some(name) = &update.name {
            category.name = name.clone();
        }
        if let Some(description) = &update.description {
            category.description = description.clone();
        }
        if let Some(rank) = update.rank {
            category.rank = rank;
        }
        if let Some(price) = update.price {
            category.price = price;
        }
        if let Some(drafts) = &update.items {
            let existing: HashMap<Uuid, DateTime<Utc>> = category
                .items
                .iter()
                .map(|item| (item.id, item.created_at))
                .collect();
            category.items = resolve_items(drafts, &existing, Utc::now());
        }
        Ok(Some(category.clone()))
    }

    async fn delete_category(&self, id: Uuid) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        let before = state.categories.len();
        state.categories.retain(|c| c.id != id);
        Ok(state.categories.len() != before)
    }

    async fn insert_request(
        &self,
        user_id: Uuid,
        request: &NewAccessRequest,
    ) -> StoreResult<AccessRequest> {
        let mut state = self.state.write().await;
        let created = AccessRequest {
            id: Uuid::new_v4(),
            user_id,
            category_name: request.category_name.clone(),
            item_name: request.item_name.clone(),
            status: RequestStatus::Pending,
            created_at: request.created_at,
            processed_at: None,
        };
        state.requests.push(created.clone());
        Ok(created)
    }

    async fn pending_requests_for(&self, user_id: Uuid) -> StoreResult<Vec<AccessRequest>> {
        let state = self.state.read().await;
        let mut pending: Vec<AccessRequest> = state
            .requests
            .iter()
            .filter(|r| r.user_id == user_id && r.status == RequestStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|r| r.created_at);
        Ok(pending)
    }

    async fn find_pending_request(
        &self,
        user_id: Uuid,
        request_id: Uuid,
    ) -> StoreResult<Option<AccessRequest>> {
        let state = self.state.read().await;
        Ok(state
            .requests
            .iter()
            .find(|r| r.id == request_id && r.user_id == user_id && r.status == RequestStatus::Pending)
            .cloned())
    }

    async fn has_pending_duplicate(
        &self,
        user_id: Uuid,
        category_name: &str,
        item_name: Option<&str>,
    ) -> StoreResult<bool> {
        let state = self.state.read().await;
        Ok(state.requests.iter().any(|r| {
            r.user_id == user_id
                && r.status == RequestStatus::Pending
                && r.category_name == category_name
                && r.item_name.as_deref() == item_name
        }))
    }

    async fn delete_pending_request(&self, user_id: Uuid, request_id: Uuid) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        let before = state.requests.len();
        state.requests.retain(|r| {
            !(r.id == request_id && r.user_id == user_id && r.status == RequestStatus::Pending)
        });
        Ok(state.requests.len() != before)
    }

    async fn pending_requests(&self) -> StoreResult<Vec<PendingRequestView>> {
        let state = self.state.read().await;
        let mut queue: Vec<PendingRequestView> = state
            .requests
            .iter()
            .filter(|r| r.status == RequestStatus::Pending)
            .filter_map(|r| {
                let user = state.users.get(&r.user_id)?;
                Some(PendingRequestView {
                    id: r.id,
                    user_id: user.id,
                    user_name: user.name.clone(),
                    user_email: user.email.clone(),
                    category_name: r.category_name.clone(),
                    item_name: r.item_name.clone(),
                    created_at: r.created_at,
                })
            })
            .collect();
        queue.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(queue)
    }

    async fn settle_request(&self, settlement: &Settlement) -> StoreResult<Settled> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let Some(request) = state.requests.iter_mut().find(|r| {
            r.id == settlement.request_id
                && r.user_id == settlement.user_id
                && r.status == RequestStatus::Pending
        }) else {
            return Err(StoreError::Conflict(REQUEST_ALREADY_PROCESSED.to_string()));
        };

        request.processed_at = Some(settlement.processed_at);
        request.status = match settlement.outcome {
            Outcome::Accept { .. } => RequestStatus::Accepted,
            Outcome::Reject => RequestStatus::Rejected,
        };

        let now = settlement.processed_at;
        if let Outcome::Accept { target, expires_at } = settlement.outcome {
            match target {
                GrantTarget::Category { category_id } => {
                    let grants = state.allowed_categories.entry(settlement.user_id).or_default();
                    match grants.iter_mut().find(|g| g.category_id == category_id) {
                        Some(existing) if existing.expired_date <= now => {
                            existing.expired_date = expires_at;
                        }
                        Some(_) => {}
                        None => grants.push(AllowedCategory {
                            category_id,
                            expired_date: expires_at,
                        }),
                    }
                }
                GrantTarget::Item { category_id, item_id } => {
                    let grants = state.allowed_items.entry(settlement.user_id).or_default();
                    match grants
                        .iter_mut()
                        .find(|g| g.category_id == category_id && g.item_id == item_id)
                    {
                        Some(existing) if existing.expired_date <= now => {
                            existing.expired_date = expires_at;
                        }
                        Some(_) => {}
                        None => grants.push(AllowedItem {
                            category_id,
                            item_id,
                            expired_date: expires_at,
                        }),
                    }
                }
            }
        }

        let record = settlement.history.clone().into_record(Uuid::new_v4());
        state.history.push(record.clone());

        Ok(Settled {
            grants: state.grants_of(settlement.user_id),
            record,
        })
    }

    async fn grants_for(&self, user_id: Uuid) -> StoreResult<Grants> {
        Ok(self.state.read().await.grants_of(user_id))
    }

    async fn prune_expired_grants(&self, user_id: Uuid, now: DateTime<Utc>) -> StoreResult<u64> {
        Ok(self.state.write().await.prune(Some(user_id), now))
    }

    async fn prune_all_expired_grants(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        Ok(self.state.write().await.prune(None, now))
    }

    async fn list_history(&self) -> StoreResult<Vec<RequestHistory>> {
        let mut history = self.state.read().await.history.clone();
        history.sort_by(|a, b| b.processed_at.cmp(&a.processed_at));
        Ok(history)
    }
}
