use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use crate::db::models::category::{resolve_items, Category, CategoryUpdate, Item, NewCategory};
use crate::db::models::grants::{AllowedCategory, AllowedItem, GrantTarget, Grants};
use crate::db::models::history::RequestHistory;
use crate::db::models::requests::{AccessRequest, NewAccessRequest, PendingRequestView, RequestStatus};
use crate::db::models::user::{NewUser, User};
use crate::db::store::{
    Outcome, Settled, Settlement, Store, StoreError, StoreResult, REQUEST_ALREADY_PROCESSED,
};

const USER_COLUMNS: &str = "id, google_id, email, name, avatar, role, created_at, updated_at";
const CATEGORY_COLUMNS: &str = "id, name, description, rank, price, created_at";
const ITEM_COLUMNS: &str =
    "id, category_id, title, description, url, state, rank, price, created_at";
const REQUEST_COLUMNS: &str =
    "id, user_id, category_name, item_name, status, created_at, processed_at";

#[derive(FromRow)]
struct UserRow {
    id: Uuid,
    google_id: String,
    email: String,
    name: String,
    avatar: String,
    role: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: row.id,
            google_id: row.google_id,
            email: row.email,
            name: row.name,
            avatar: row.avatar,
            role: row.role.parse().map_err(StoreError::Corrupt)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct CategoryRow {
    id: Uuid,
    name: String,
    description: String,
    rank: i32,
    price: f64,
    created_at: DateTime<Utc>,
}

impl CategoryRow {
    fn with_items(self, items: Vec<Item>) -> Category {
        Category {
            id: self.id,
            name: self.name,
            description: self.description,
            rank: self.rank,
            price: self.price,
            items,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct ItemRow {
    id: Uuid,
    category_id: Uuid,
    title: String,
    description: String,
    url: String,
    state: String,
    rank: i32,
    price: f64,
    created_at: DateTime<Utc>,
}

impl TryFrom<ItemRow> for Item {
    type Error = StoreError;

    fn try_from(row: ItemRow) -> Result<Self, Self::Error> {
        Ok(Item {
            id: row.id,
            title: row.title,
            description: row.description,
            url: row.url,
            state: row.state.parse().map_err(StoreError::Corrupt)?,
            rank: row.rank,
            price: row.price,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct RequestRow {
    id: Uuid,
    user_id: Uuid,
    category_name: String,
    item_name: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

impl TryFrom<RequestRow> for AccessRequest {
    type Error = StoreError;

    fn try_from(row: RequestRow) -> Result<Self, Self::Error> {
        Ok(AccessRequest {
            id: row.id,
            user_id: row.user_id,
            category_name: row.category_name,
            item_name: row.item_name,
            status: row.status.parse().map_err(StoreError::Corrupt)?,
            created_at: row.created_at,
            processed_at: row.processed_at,
        })
    }
}

#[derive(FromRow)]
struct HistoryRow {
    id: Uuid,
    request_id: Uuid,
    user_id: Uuid,
    user_name: String,
    user_email: String,
    category_name: String,
    item_name: Option<String>,
    created_at: DateTime<Utc>,
    processed_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    state: String,
}

impl TryFrom<HistoryRow> for RequestHistory {
    type Error = StoreError;

    fn try_from(row: HistoryRow) -> Result<Self, Self::Error> {
        Ok(RequestHistory {
            id: row.id,
            request_id: row.request_id,
            user_id: row.user_id,
            user_name: row.user_name,
            user_email: row.user_email,
            category_name: row.category_name,
            item_name: row.item_name,
            created_at: row.created_at,
            processed_at: row.processed_at,
            expired_date: row.expires_at,
            state: row.state.parse().map_err(StoreError::Corrupt)?,
        })
    }
}

fn collect<R, T>(rows: Vec<R>) -> StoreResult<Vec<T>>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

/// Turns a unique-constraint violation into a `Conflict` with `message`.
fn unique_conflict(err: sqlx::Error, message: &str) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Conflict(message.to_string())
        }
        _ => StoreError::Database(err),
    }
}

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn items_of(conn: &mut PgConnection, category_id: Uuid) -> StoreResult<Vec<Item>> {
        let rows = sqlx::query_as::<_, ItemRow>(&format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE category_id = $1 ORDER BY position"
        ))
        .bind(category_id)
        .fetch_all(&mut *conn)
        .await?;
        collect(rows)
    }

    async fn attach_items(
        conn: &mut PgConnection,
        rows: Vec<CategoryRow>,
    ) -> StoreResult<Vec<Category>> {
        let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();
        let item_rows = sqlx::query_as::<_, ItemRow>(&format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE category_id = ANY($1) ORDER BY category_id, position"
        ))
        .bind(ids)
        .fetch_all(&mut *conn)
        .await?;

        let mut by_category: HashMap<Uuid, Vec<Item>> = HashMap::new();
        for row in item_rows {
            let category_id = row.category_id;
            by_category.entry(category_id).or_default().push(Item::try_from(row)?);
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let items = by_category.remove(&row.id).unwrap_or_default();
                row.with_items(items)
            })
            .collect())
    }

    async fn load_grants(conn: &mut PgConnection, user_id: Uuid) -> StoreResult<Grants> {
        let allowed_categories = sqlx::query_as::<_, AllowedCategory>(
            r#"
            SELECT category_id, expires_at AS expired_date
            FROM allowed_categories
            WHERE user_id = $1
            ORDER BY expires_at
            "#,
        )
        .bind(user_id)
        .fetch_all(&mut *conn)
        .await?;

        let allowed_items = sqlx::query_as::<_, AllowedItem>(
            r#"
            SELECT category_id, item_id, expires_at AS expired_date
            FROM allowed_items
            WHERE user_id = $1
            ORDER BY expires_at
            "#,
        )
        .bind(user_id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(Grants {
            allowed_categories,
            allowed_items,
        })
    }

    async fn upsert_grant(
        conn: &mut PgConnection,
        user_id: Uuid,
        target: GrantTarget,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        // An active grant is left alone; one that lapsed without being swept
        // is renewed.
        match target {
            GrantTarget::Category { category_id } => {
                sqlx::query(
                    r#"
                    INSERT INTO allowed_categories (user_id, category_id, expires_at)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (user_id, category_id)
                    DO UPDATE SET expires_at = EXCLUDED.expires_at
                    WHERE allowed_categories.expires_at <= $4
                    "#,
                )
                .bind(user_id)
                .bind(category_id)
                .bind(expires_at)
                .bind(now)
                .execute(&mut *conn)
                .await?;
            }
            GrantTarget::Item { category_id, item_id } => {
                sqlx::query(
                    r#"
                    INSERT INTO allowed_items (user_id, category_id, item_id, expires_at)
                    VALUES ($1, $2, $3, $4)
                    ON CONFLICT (user_id, category_id, item_id)
                    DO UPDATE SET expires_at = EXCLUDED.expires_at
                    WHERE allowed_items.expires_at <= $5
                    "#,
                )
                .bind(user_id)
                .bind(category_id)
                .bind(item_id)
                .bind(expires_at)
                .bind(now)
                .execute(&mut *conn)
                .await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").fetch_optional(&self.pool).await?;
        Ok(())
    }

    async fn upsert_google_user(&self, user: &NewUser) -> StoreResult<User> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (id, google_id, email, name, avatar, role, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, now(), now())
            ON CONFLICT (google_id) DO UPDATE
            SET role = CASE WHEN EXCLUDED.role = 'admin' THEN 'admin' ELSE users.role END,
                updated_at = now()
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&user.google_id)
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.avatar)
        .bind(user.role.as_str())
        .fetch_one(&self.pool)
        .await?;
        User::try_from(row)
    }

    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(User::try_from).transpose()
    }

    async fn create_category(&self, category: &NewCategory) -> StoreResult<Category> {
        let row = sqlx::query_as::<_, CategoryRow>(&format!(
            r#"
            INSERT INTO categories (id, name, description, rank, price, created_at)
            VALUES ($1, $2, $3, $4, $5, now())
            RETURNING {CATEGORY_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&category.name)
        .bind(&category.description)
        .bind(category.rank)
        .bind(category.price)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| unique_conflict(e, "A category with this name already exists"))?;
        Ok(row.with_items(Vec::new()))
    }

    async fn list_categories(&self) -> StoreResult<Vec<Category>> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query_as::<_, CategoryRow>(&format!(
            "SELECT {CATEGORY_COLUMNS} FROM categories ORDER BY rank ASC, created_at ASC"
        ))
        .fetch_all(&mut *conn)
        .await?;
        Self::attach_items(&mut conn, rows).await
    }

    async fn find_category(&self, id: Uuid) -> StoreResult<Option<Category>> {
        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query_as::<_, CategoryRow>(&format!(
            "SELECT {CATEGORY_COLUMNS} FROM categories WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
        match row {
            Some(row) => {
                let items = Self::items_of(&mut conn, row.id).await?;
                Ok(Some(row.with_items(items)))
            }
            None => Ok(None),
        }
    }

    async fn find_category_by_name(&self, name: &str) -> StoreResult<Option<Category>> {
        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query_as::<_, CategoryRow>(&format!(
            "SELECT {CATEGORY_COLUMNS} FROM categories WHERE name = $1"
        ))
        .bind(name)
        .fetch_optional(&mut *conn)
        .await?;
        match row {
            Some(row) => {
                let items = Self::items_of(&mut conn, row.id).await?;
                Ok(Some(row.with_items(items)))
            }
            None => Ok(None),
        }
    }

    async fn update_category(&self, update: &CategoryUpdate) -> StoreResult<Option<Category>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, CategoryRow>(&format!(
            r#"
            UPDATE categories
            SET name = COALESCE($2, name),
                description = COALESCE($3, description),
                rank = COALESCE($4, rank),
                price = COALESCE($5, price)
            WHERE id = $1
            RETURNING {CATEGORY_COLUMNS}
            "#
        ))
        .bind(update.id)
        .bind(update.name.as_deref())
        .bind(update.description.as_deref())
        .bind(update.rank)
        .bind(update.price)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| unique_conflict(e, "A category with this name already exists"))?;

        let Some(row) = row else {
            return Ok(None);
        };

        if let Some(drafts) = &update.items {
            let existing: HashMap<Uuid, DateTime<Utc>> =
                sqlx::query_as::<_, (Uuid, DateTime<Utc>)>(
                    "SELECT id, created_at FROM items WHERE category_id = $1",
                )
                .bind(update.id)
                .fetch_all(&mut *tx)
                .await?
                .into_iter()
                .collect();

            // Replace wholesale so reordered or renamed titles never trip the
            // per-category uniqueness constraint midway.
            sqlx::query("DELETE FROM items WHERE category_id = $1")
                .bind(update.id)
                .execute(&mut *tx)
                .await?;

            for (position, item) in resolve_items(drafts, &existing, Utc::now()).iter().enumerate() {
                sqlx::query(
                    r#"
                    INSERT INTO items
                        (id, category_id, position, title, description, url, state, rank, price, created_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                    "#,
                )
                .bind(item.id)
                .bind(update.id)
                .bind(position as i32)
                .bind(&item.title)
                .bind(&item.description)
                .bind(&item.url)
                .bind(item.state.as_str())
                .bind(item.rank)
                .bind(item.price)
                .bind(item.created_at)
                .execute(&mut *tx)
                .await
                .map_err(|e| unique_conflict(e, "Item titles must be unique within a category"))?;
            }
        }

        let items = Self::items_of(&mut tx, update.id).await?;
        tx.commit().await?;
        Ok(Some(row.with_items(items)))
    }

    async fn delete_category(&self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM categories WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_request(
        &self,
        user_id: Uuid,
        request: &NewAccessRequest,
    ) -> StoreResult<AccessRequest> {
        let row = sqlx::query_as::<_, RequestRow>(&format!(
            r#"
            INSERT INTO access_requests (id, user_id, category_name, item_name, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {REQUEST_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(&request.category_name)
        .bind(request.item_name.as_deref())
        .bind(RequestStatus::Pending.as_str())
        .bind(request.created_at)
        .fetch_one(&self.pool)
        .await?;
        AccessRequest::try_from(row)
    }

    async fn pending_requests_for(&self, user_id: Uuid) -> StoreResult<Vec<AccessRequest>> {
        let rows = sqlx::query_as::<_, RequestRow>(&format!(
            r#"
            SELECT {REQUEST_COLUMNS}
            FROM access_requests
            WHERE user_id = $1 AND status = 'pending'
            ORDER BY created_at ASC
            "#
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        collect(rows)
    }

    async fn find_pending_request(
        &self,
        user_id: Uuid,
        request_id: Uuid,
    ) -> StoreResult<Option<AccessRequest>> {
        let row = sqlx::query_as::<_, RequestRow>(&format!(
            r#"
            SELECT {REQUEST_COLUMNS}
            FROM access_requests
            WHERE id = $1 AND user_id = $2 AND status = 'pending'
            "#
        ))
        .bind(request_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(AccessRequest::try_from).transpose()
    }

    async fn has_pending_duplicate(
        &self,
        user_id: Uuid,
        category_name: &str,
        item_name: Option<&str>,
    ) -> StoreResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM access_requests
                WHERE user_id = $1 AND category_name = $2
                  AND item_name IS NOT DISTINCT FROM $3 AND status = 'pending'
            )
            "#,
        )
        .bind(user_id)
        .bind(category_name)
        .bind(item_name)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn delete_pending_request(&self, user_id: Uuid, request_id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query(
            "DELETE FROM access_requests WHERE id = $1 AND user_id = $2 AND status = 'pending'",
        )
        .bind(request_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn pending_requests(&self) -> StoreResult<Vec<PendingRequestView>> {
        let rows = sqlx::query_as::<_, PendingRequestView>(
            r#"
            SELECT r.id, r.user_id, u.name AS user_name, u.email AS user_email,
                   r.category_name, r.item_name, r.created_at
            FROM access_requests r
            JOIN users u ON u.id = r.user_id
            WHERE r.status = 'pending'
            ORDER BY r.created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn settle_request(&self, settlement: &Settlement) -> StoreResult<Settled> {
        let mut tx = self.pool.begin().await?;

        let status = match settlement.outcome {
            Outcome::Accept { .. } => RequestStatus::Accepted,
            Outcome::Reject => RequestStatus::Rejected,
        };

        // Compare-and-swap on the pending status: the loser of two concurrent
        // settlements touches no rows and rolls back.
        let updated = sqlx::query(
            r#"
            UPDATE access_requests
            SET status = $1, processed_at = $2
            WHERE id = $3 AND user_id = $4 AND status = 'pending'
            "#,
        )
        .bind(status.as_str())
        .bind(settlement.processed_at)
        .bind(settlement.request_id)
        .bind(settlement.user_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::Conflict(REQUEST_ALREADY_PROCESSED.to_string()));
        }

        if let Outcome::Accept { target, expires_at } = settlement.outcome {
            Self::upsert_grant(
                &mut tx,
                settlement.user_id,
                target,
                expires_at,
                settlement.processed_at,
            )
            .await?;
        }

        let history = &settlement.history;
        let history_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO request_history
                (id, request_id, user_id, user_name, user_email, category_name, item_name,
                 created_at, processed_at, expires_at, state)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(history_id)
        .bind(history.request_id)
        .bind(history.user_id)
        .bind(&history.user_name)
        .bind(&history.user_email)
        .bind(&history.category_name)
        .bind(history.item_name.as_deref())
        .bind(history.created_at)
        .bind(history.processed_at)
        .bind(history.expired_date)
        .bind(history.state.as_str())
        .execute(&mut *tx)
        .await?;

        let grants = Self::load_grants(&mut tx, settlement.user_id).await?;
        tx.commit().await?;

        Ok(Settled {
            grants,
            record: history.clone().into_record(history_id),
        })
    }

    async fn grants_for(&self, user_id: Uuid) -> StoreResult<Grants> {
        let mut conn = self.pool.acquire().await?;
        Self::load_grants(&mut conn, user_id).await
    }

    async fn prune_expired_grants(&self, user_id: Uuid, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut tx = self.pool.begin().await?;
        let categories =
            sqlx::query("DELETE FROM allowed_categories WHERE user_id = $1 AND expires_at <= $2")
                .bind(user_id)
                .bind(now)
                .execute(&mut *tx)
                .await?;
        let items = sqlx::query("DELETE FROM allowed_items WHERE user_id = $1 AND expires_at <= $2")
            .bind(user_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(categories.rows_affected() + items.rows_affected())
    }

    async fn prune_all_expired_grants(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut tx = self.pool.begin().await?;
        let categories = sqlx::query("DELETE FROM allowed_categories WHERE expires_at <= $1")
            .bind(now)
            .execute(&mut *tx)
            .await?;
        let items = sqlx::query("DELETE FROM allowed_items WHERE expires_at <= $1")
            .bind(now)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(categories.rows_affected() + items.rows_affected())
    }

    async fn list_history(&self) -> StoreResult<Vec<RequestHistory>> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT id, request_id, user_id, user_name, user_email, category_name, item_name,
                   created_at, processed_at, expires_at, state
            FROM request_history
            ORDER BY processed_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        collect(rows)
    }
}
