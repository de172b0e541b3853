use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AllowedCategory {
    pub category_id: Uuid,
    pub expired_date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AllowedItem {
    pub category_id: Uuid,
    pub item_id: Uuid,
    pub expired_date: DateTime<Utc>,
}

/// Both grant lists of one user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Grants {
    pub allowed_categories: Vec<AllowedCategory>,
    pub allowed_items: Vec<AllowedItem>,
}

impl Grants {
    pub fn is_empty(&self) -> bool {
        self.allowed_categories.is_empty() && self.allowed_items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.allowed_categories.len() + self.allowed_items.len()
    }
}

/// What an approval gives access to, resolved to ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantTarget {
    Category { category_id: Uuid },
    Item { category_id: Uuid, item_id: Uuid },
}

/// Result of pruning one user's expired grants.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExpiryCheck {
    pub removed: u64,
    #[serde(flatten)]
    pub grants: Grants,
}
