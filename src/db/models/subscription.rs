use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::models::category::{Item, ItemState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum SubscriptionSource {
    AllowedItem,
    AllowedCategory,
}

/// An item the user can open, decorated with where the access came from.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub url: String,
    pub state: ItemState,
    pub rank: i32,
    pub price: f64,
    pub created_at: DateTime<Utc>,
    pub category_id: Uuid,
    pub category_name: String,
    pub expired_date: DateTime<Utc>,
    pub source: SubscriptionSource,
}

impl Subscription {
    pub fn from_item(
        item: &Item,
        category_id: Uuid,
        category_name: &str,
        expired_date: DateTime<Utc>,
        source: SubscriptionSource,
    ) -> Self {
        Subscription {
            id: item.id,
            title: item.title.clone(),
            description: item.description.clone(),
            url: item.url.clone(),
            state: item.state,
            rank: item.rank,
            price: item.price,
            created_at: item.created_at,
            category_id,
            category_name: category_name.to_string(),
            expired_date,
            source,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SubscriptionList {
    pub subscriptions: Vec<Subscription>,
}
