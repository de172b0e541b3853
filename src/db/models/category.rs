use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::utils::error::AppError;

/// Publication state of an item. Rendered with the Arabic labels the
/// frontend displays; English names are accepted on input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum ItemState {
    #[default]
    #[serde(rename = "متاح", alias = "available")]
    Available,
    #[serde(rename = "قريباً", alias = "upcoming")]
    Upcoming,
    #[serde(rename = "مؤرشف", alias = "archived")]
    Archived,
}

impl ItemState {
    /// Storage representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemState::Available => "available",
            ItemState::Upcoming => "upcoming",
            ItemState::Archived => "archived",
        }
    }
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" | "متاح" => Ok(ItemState::Available),
            "upcoming" | "قريباً" => Ok(ItemState::Upcoming),
            "archived" | "مؤرشف" => Ok(ItemState::Archived),
            other => Err(format!("unknown item state `{other}`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub url: String,
    pub state: ItemState,
    pub rank: i32,
    pub price: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub rank: i32,
    pub price: f64,
    pub items: Vec<Item>,
    pub created_at: DateTime<Utc>,
}

impl Category {
    pub fn item_by_title(&self, title: &str) -> Option<&Item> {
        self.items.iter().find(|item| item.title == title)
    }

    pub fn item_by_id(&self, id: Uuid) -> Option<&Item> {
        self.items.iter().find(|item| item.id == id)
    }
}

/// Body of `POST /categories/createCategory`
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateCategoryPayload {
    pub name: Option<String>,
    pub description: Option<String>,
    pub rank: Option<i32>,
    pub price: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct NewCategory {
    pub name: String,
    pub description: String,
    pub rank: i32,
    pub price: f64,
}

impl CreateCategoryPayload {
    pub fn validate(self) -> Result<NewCategory, AppError> {
        let name = self.name.as_deref().map(str::trim).unwrap_or_default();
        let description = self.description.as_deref().map(str::trim).unwrap_or_default();
        match (name.is_empty(), description.is_empty(), self.rank) {
            (false, false, Some(rank)) => Ok(NewCategory {
                name: name.to_string(),
                description: description.to_string(),
                rank,
                price: self.price.unwrap_or(0.0),
            }),
            _ => Err(AppError::validation("Name, description and rank are required")),
        }
    }
}

/// An item as submitted by the admin panel. `_id` is kept when it names an
/// item already in the category; anything else creates a new item.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ItemInput {
    #[serde(rename = "_id")]
    pub id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub state: Option<ItemState>,
    pub rank: Option<i32>,
    pub price: Option<f64>,
}

/// Body of `PATCH /categories/updateCategory`
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateCategoryPayload {
    #[serde(rename = "_id")]
    pub id: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub rank: Option<i32>,
    pub price: Option<f64>,
    pub items: Option<Vec<ItemInput>>,
}

/// Validated item replacement; `id` is only a candidate until the store
/// checks it against the category's current items.
#[derive(Debug, Clone)]
pub struct ItemDraft {
    pub id: Option<Uuid>,
    pub title: String,
    pub description: String,
    pub url: String,
    pub state: ItemState,
    pub rank: i32,
    pub price: f64,
}

#[derive(Debug, Clone)]
pub struct CategoryUpdate {
    pub id: Uuid,
    pub name: Option<String>,
    pub description: Option<String>,
    pub rank: Option<i32>,
    pub price: Option<f64>,
    pub items: Option<Vec<ItemDraft>>,
}

impl UpdateCategoryPayload {
    /// `Ok(None)` when `_id` cannot name any category.
    pub fn validate(self) -> Result<Option<CategoryUpdate>, AppError> {
        let raw_id = self
            .id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| AppError::validation("_id is required"))?;
        let Ok(id) = Uuid::parse_str(raw_id.trim()) else {
            return Ok(None);
        };

        let name = self.name.map(|n| n.trim().to_string());
        if name.as_deref() == Some("") {
            return Err(AppError::validation("Category name cannot be empty"));
        }

        let items = match self.items {
            Some(inputs) => Some(validate_items(inputs)?),
            None => None,
        };

        Ok(Some(CategoryUpdate {
            id,
            name,
            description: self.description.map(|d| d.trim().to_string()),
            rank: self.rank,
            price: self.price,
            items,
        }))
    }
}

fn validate_items(inputs: Vec<ItemInput>) -> Result<Vec<ItemDraft>, AppError> {
    let mut titles = HashSet::new();
    let mut drafts = Vec::with_capacity(inputs.len());
    for input in inputs {
        let title = input.title.as_deref().map(str::trim).unwrap_or_default();
        if title.is_empty() {
            return Err(AppError::validation("Item title is required"));
        }
        if !titles.insert(title.to_string()) {
            return Err(AppError::validation(format!(
                "Item title `{title}` appears more than once in the category"
            )));
        }
        drafts.push(ItemDraft {
            id: input.id.as_deref().and_then(|id| Uuid::parse_str(id.trim()).ok()),
            title: title.to_string(),
            description: input.description.map(|d| d.trim().to_string()).unwrap_or_default(),
            url: input.url.map(|u| u.trim().to_string()).unwrap_or_default(),
            state: input.state.unwrap_or_default(),
            rank: input.rank.unwrap_or(0),
            price: input.price.unwrap_or(0.0),
        });
    }
    Ok(drafts)
}

/// Materializes a replacement item list. Drafts naming an item the category
/// already has keep that item's id and creation time; an id can only be
/// claimed once.
pub fn resolve_items(
    drafts: &[ItemDraft],
    existing: &HashMap<Uuid, DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Vec<Item> {
    let mut claimed = HashSet::new();
    drafts
        .iter()
        .map(|draft| {
            let kept = draft
                .id
                .filter(|id| claimed.insert(*id))
                .and_then(|id| existing.get(&id).map(|created_at| (id, *created_at)));
            let (id, created_at) = kept.unwrap_or_else(|| (Uuid::new_v4(), now));
            Item {
                id,
                title: draft.title.clone(),
                description: draft.description.clone(),
                url: draft.url.clone(),
                state: draft.state,
                rank: draft.rank,
                price: draft.price,
                created_at,
            }
        })
        .collect()
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CategoriesData {
    pub categories_data: Vec<Category>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CategoryBody {
    pub category: Category,
}
