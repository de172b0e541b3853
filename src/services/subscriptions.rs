use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use crate::db::models::category::Category;
use crate::db::models::subscription::{Subscription, SubscriptionSource};
use crate::db::store::{Store, StoreResult};
use crate::services::access::load_user;
use crate::utils::error::AppError;

/// Categories loaded during one listing, so several grants on the same
/// category cost one lookup. `None` records a deleted category.
struct CategoryCache<'a> {
    store: &'a dyn Store,
    loaded: HashMap<Uuid, Option<Category>>,
}

impl<'a> CategoryCache<'a> {
    fn new(store: &'a dyn Store) -> Self {
        Self {
            store,
            loaded: HashMap::new(),
        }
    }

    /// Failed lookups are not remembered.
    async fn get(&mut self, id: Uuid) -> StoreResult<Option<&Category>> {
        if !self.loaded.contains_key(&id) {
            let found = self.store.find_category(id).await?;
            self.loaded.insert(id, found);
        }
        Ok(self.loaded.get(&id).and_then(Option::as_ref))
    }

    /// The granted category, or `None` after logging why the grant is skipped.
    async fn granted(&mut self, user_id: Uuid, category_id: Uuid) -> Option<&Category> {
        match self.get(category_id).await {
            Ok(Some(category)) => Some(category),
            Ok(None) => {
                warn!(user_id = %user_id, category_id = %category_id, "Granted category no longer exists");
                None
            }
            Err(e) => {
                warn!(user_id = %user_id, category_id = %category_id, error = %e, "Failed to load granted category; skipping grant");
                None
            }
        }
    }
}

/// Flattens a user's unexpired grants into the items they can open.
///
/// Item grants are resolved first, so an item that is both granted directly
/// and through its category is reported once, tagged `allowedItem`. Grants
/// pointing at deleted categories or items, or whose category cannot be
/// read, are skipped. Newest items first.
pub async fn user_subscriptions(
    store: &dyn Store,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Vec<Subscription>, AppError> {
    load_user(store, user_id).await?;
    let grants = store.grants_for(user_id).await?;

    let mut categories = CategoryCache::new(store);
    let mut seen: HashSet<(Uuid, String)> = HashSet::new();
    let mut subscriptions = Vec::new();

    for grant in grants.allowed_items.iter().filter(|g| g.expired_date > now) {
        let Some(category) = categories.granted(user_id, grant.category_id).await else {
            continue;
        };
        let Some(item) = category.item_by_id(grant.item_id) else {
            warn!(user_id = %user_id, item_id = %grant.item_id, "Granted item no longer exists");
            continue;
        };
        if seen.insert((item.id, category.name.clone())) {
            subscriptions.push(Subscription::from_item(
                item,
                category.id,
                &category.name,
                grant.expired_date,
                SubscriptionSource::AllowedItem,
            ));
        }
    }

    for grant in grants.allowed_categories.iter().filter(|g| g.expired_date > now) {
        let Some(category) = categories.granted(user_id, grant.category_id).await else {
            continue;
        };
        for item in &category.items {
            if seen.insert((item.id, category.name.clone())) {
                subscriptions.push(Subscription::from_item(
                    item,
                    category.id,
                    &category.name,
                    grant.expired_date,
                    SubscriptionSource::AllowedCategory,
                ));
            }
        }
    }

    subscriptions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(subscriptions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::db::models::category::{CategoryUpdate, ItemDraft, ItemState, NewCategory};
    use crate::db::models::user::{NewUser, Role};
    use crate::db::models::category::Category;
    use crate::db::models::grants::Grants;
    use crate::db::models::history::RequestHistory;
    use crate::db::models::requests::{AccessRequest, NewAccessRequest, PendingRequestView};
    use crate::db::models::user::User;
    use crate::db::store::{Settled, Settlement, StoreError};
    use crate::services::access::{allow_request, check_expiration, send_request};
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn draft(title: &str, state: ItemState, price: f64) -> ItemDraft {
        ItemDraft {
            id: None,
            title: title.to_string(),
            description: format!("About {title}"),
            url: format!("https://videos.example.com/{title}"),
            state,
            rank: 0,
            price,
        }
    }

    async fn seed(store: &MemoryStore) -> Uuid {
        let user = store
            .upsert_google_user(&NewUser {
                google_id: "g-1".to_string(),
                email: "student@example.com".to_string(),
                name: "Student".to_string(),
                avatar: String::new(),
                role: Role::User,
            })
            .await
            .unwrap();

        let design = store
            .create_category(&NewCategory {
                name: "Design".to_string(),
                description: "Design courses".to_string(),
                rank: 1,
                price: 0.0,
            })
            .await
            .unwrap();
        store
            .update_category(&CategoryUpdate {
                id: design.id,
                name: None,
                description: None,
                rank: None,
                price: None,
                items: Some(vec![
                    draft("A", ItemState::Available, 0.0),
                    draft("B", ItemState::Upcoming, 10.0),
                ]),
            })
            .await
            .unwrap();
        user.id
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
    }

    async fn approve(store: &MemoryStore, user_id: Uuid, item: Option<&str>, now: DateTime<Utc>) {
        approve_in(store, user_id, "Design", item, now).await;
    }

    async fn approve_in(
        store: &MemoryStore,
        user_id: Uuid,
        category: &str,
        item: Option<&str>,
        now: DateTime<Utc>,
    ) {
        let pending = send_request(store, user_id, category, item, false, now).await.unwrap();
        let request = pending.last().unwrap().id;
        allow_request(store, user_id, Some(request), now).await.unwrap();
    }

    async fn add_category(store: &MemoryStore, name: &str, items: Vec<ItemDraft>) -> Uuid {
        let created = store
            .create_category(&NewCategory {
                name: name.to_string(),
                description: format!("{name} courses"),
                rank: 2,
                price: 0.0,
            })
            .await
            .unwrap();
        store
            .update_category(&CategoryUpdate {
                id: created.id,
                name: None,
                description: None,
                rank: None,
                price: None,
                items: Some(items),
            })
            .await
            .unwrap();
        created.id
    }

    /// Delegates to a `MemoryStore`, counts category lookups and fails them
    /// for one category id.
    struct FailingCategory {
        inner: MemoryStore,
        broken: Option<Uuid>,
        lookups: AtomicUsize,
    }

    impl FailingCategory {
        fn new(inner: MemoryStore, broken: Option<Uuid>) -> Self {
            Self {
                inner,
                broken,
                lookups: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Store for FailingCategory {
        async fn ping(&self) -> StoreResult<()> {
            self.inner.ping().await
        }
        async fn upsert_google_user(&self, user: &NewUser) -> StoreResult<User> {
            self.inner.upsert_google_user(user).await
        }
        async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
            self.inner.find_user(id).await
        }
        async fn create_category(&self, category: &NewCategory) -> StoreResult<Category> {
            self.inner.create_category(category).await
        }
        async fn list_categories(&self) -> StoreResult<Vec<Category>> {
            self.inner.list_categories().await
        }
        async fn find_category(&self, id: Uuid) -> StoreResult<Option<Category>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if self.broken == Some(id) {
                return Err(StoreError::Corrupt("unknown item state `lost`".to_string()));
            }
            self.inner.find_category(id).await
        }
        async fn find_category_by_name(&self, name: &str) -> StoreResult<Option<Category>> {
            self.inner.find_category_by_name(name).await
        }
        async fn update_category(&self, update: &CategoryUpdate) -> StoreResult<Option<Category>> {
            self.inner.update_category(update).await
        }
        async fn delete_category(&self, id: Uuid) -> StoreResult<bool> {
            self.inner.delete_category(id).await
        }
        async fn insert_request(
            &self,
            user_id: Uuid,
            request: &NewAccessRequest,
        ) -> StoreResult<AccessRequest> {
            self.inner.insert_request(user_id, request).await
        }
        async fn pending_requests_for(&self, user_id: Uuid) -> StoreResult<Vec<AccessRequest>> {
            self.inner.pending_requests_for(user_id).await
        }
        async fn find_pending_request(
            &self,
            user_id: Uuid,
            request_id: Uuid,
        ) -> StoreResult<Option<AccessRequest>> {
            self.inner.find_pending_request(user_id, request_id).await
        }
        async fn has_pending_duplicate(
            &self,
            user_id: Uuid,
            category_name: &str,
            item_name: Option<&str>,
        ) -> StoreResult<bool> {
            self.inner.has_pending_duplicate(user_id, category_name, item_name).await
        }
        async fn delete_pending_request(&self, user_id: Uuid, request_id: Uuid) -> StoreResult<bool> {
            self.inner.delete_pending_request(user_id, request_id).await
        }
        async fn pending_requests(&self) -> StoreResult<Vec<PendingRequestView>> {
            self.inner.pending_requests().await
        }
        async fn settle_request(&self, settlement: &Settlement) -> StoreResult<Settled> {
            self.inner.settle_request(settlement).await
        }
        async fn grants_for(&self, user_id: Uuid) -> StoreResult<Grants> {
            self.inner.grants_for(user_id).await
        }
        async fn prune_expired_grants(&self, user_id: Uuid, now: DateTime<Utc>) -> StoreResult<u64> {
            self.inner.prune_expired_grants(user_id, now).await
        }
        async fn prune_all_expired_grants(&self, now: DateTime<Utc>) -> StoreResult<u64> {
            self.inner.prune_all_expired_grants(now).await
        }
        async fn list_history(&self) -> StoreResult<Vec<RequestHistory>> {
            self.inner.list_history().await
        }
    }

    #[tokio::test]
    async fn category_grant_lists_every_item() {
        let store = MemoryStore::new();
        let user_id = seed(&store).await;
        approve(&store, user_id, None, start()).await;

        let subs = user_subscriptions(&store, user_id, start()).await.unwrap();
        assert_eq!(subs.len(), 2);
        assert!(subs.iter().all(|s| s.source == SubscriptionSource::AllowedCategory));
        assert!(subs.iter().all(|s| s.category_name == "Design"));

        let b = subs.iter().find(|s| s.title == "B").unwrap();
        assert_eq!(b.state, ItemState::Upcoming);
        assert_eq!(b.price, 10.0);
    }

    #[tokio::test]
    async fn item_granted_twice_appears_once_as_item() {
        let store = MemoryStore::new();
        let user_id = seed(&store).await;
        approve(&store, user_id, Some("A"), start()).await;
        approve(&store, user_id, None, start()).await;

        let subs = user_subscriptions(&store, user_id, start()).await.unwrap();
        assert_eq!(subs.len(), 2);
        let a = subs.iter().find(|s| s.title == "A").unwrap();
        assert_eq!(a.source, SubscriptionSource::AllowedItem);
        let b = subs.iter().find(|s| s.title == "B").unwrap();
        assert_eq!(b.source, SubscriptionSource::AllowedCategory);
    }

    #[tokio::test]
    async fn orphaned_grants_are_skipped() {
        let store = MemoryStore::new();
        let user_id = seed(&store).await;
        approve(&store, user_id, None, start()).await;

        let design = store.find_category_by_name("Design").await.unwrap().unwrap();
        store.delete_category(design.id).await.unwrap();

        let subs = user_subscriptions(&store, user_id, start()).await.unwrap();
        assert!(subs.is_empty());
        // The grant itself is left in place.
        assert_eq!(store.grants_for(user_id).await.unwrap().allowed_categories.len(), 1);
    }

    #[tokio::test]
    async fn expired_grants_are_not_listed_before_pruning() {
        let store = MemoryStore::new();
        let user_id = seed(&store).await;
        approve(&store, user_id, Some("B"), start()).await;

        let later = start() + Duration::days(45);
        assert!(user_subscriptions(&store, user_id, later).await.unwrap().is_empty());

        let check = check_expiration(&store, user_id, later).await.unwrap();
        assert_eq!(check.removed, 1);
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let store = MemoryStore::new();
        let err = user_subscriptions(&store, Uuid::new_v4(), start()).await;
        assert!(matches!(err, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn unreadable_category_skips_only_its_grants() {
        let store = MemoryStore::new();
        let user_id = seed(&store).await;
        add_category(&store, "Code", vec![draft("Code-1", ItemState::Available, 5.0)]).await;
        approve(&store, user_id, Some("A"), start()).await;
        approve(&store, user_id, None, start()).await;
        approve_in(&store, user_id, "Code", None, start()).await;

        let design = store.find_category_by_name("Design").await.unwrap().unwrap().id;
        let store = FailingCategory::new(store, Some(design));

        let subs = user_subscriptions(&store, user_id, start()).await.unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].title, "Code-1");
        assert_eq!(subs[0].category_name, "Code");
    }

    #[tokio::test]
    async fn each_category_is_loaded_once_per_listing() {
        let store = MemoryStore::new();
        let user_id = seed(&store).await;
        approve(&store, user_id, Some("A"), start()).await;
        approve(&store, user_id, Some("B"), start()).await;
        approve(&store, user_id, None, start()).await;

        let store = FailingCategory::new(store, None);
        let subs = user_subscriptions(&store, user_id, start()).await.unwrap();

        assert_eq!(subs.len(), 2);
        assert!(subs.iter().all(|s| s.source == SubscriptionSource::AllowedItem));
        assert_eq!(store.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn newest_items_are_listed_first() {
        let store = MemoryStore::new();
        let user_id = seed(&store).await;
        let design = store.find_category_by_name("Design").await.unwrap().unwrap();

        // Keep A and B, add C in a later edit so it has a later creation time.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let mut items: Vec<ItemDraft> = design
            .items
            .iter()
            .map(|item| ItemDraft {
                id: Some(item.id),
                ..draft(&item.title, item.state, item.price)
            })
            .collect();
        items.push(draft("C", ItemState::Available, 0.0));
        store
            .update_category(&CategoryUpdate {
                id: design.id,
                name: None,
                description: None,
                rank: None,
                price: None,
                items: Some(items),
            })
            .await
            .unwrap();
        approve(&store, user_id, None, start()).await;

        let subs = user_subscriptions(&store, user_id, start()).await.unwrap();
        assert_eq!(subs.len(), 3);
        assert_eq!(subs[0].title, "C");
        assert!(subs[0].created_at > subs[1].created_at);
        assert!(subs.windows(2).all(|pair| pair[0].created_at >= pair[1].created_at));
    }
}
