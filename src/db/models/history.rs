use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HistoryState {
    Accepted,
    Rejected,
}

impl HistoryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryState::Accepted => "accepted",
            HistoryState::Rejected => "rejected",
        }
    }
}

impl fmt::Display for HistoryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HistoryState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accepted" => Ok(HistoryState::Accepted),
            "rejected" => Ok(HistoryState::Rejected),
            other => Err(format!("unknown history state `{other}`")),
        }
    }
}

/// Append-only record of a processed request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RequestHistory {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub request_id: Uuid,
    pub user_id: Uuid,
    pub user_name: String,
    pub user_email: String,
    pub category_name: String,
    pub item_name: Option<String>,
    /// When the request was originally sent.
    pub created_at: DateTime<Utc>,
    pub processed_at: DateTime<Utc>,
    /// Equal to `processed_at` for rejections.
    pub expired_date: DateTime<Utc>,
    pub state: HistoryState,
}

#[derive(Debug, Clone)]
pub struct NewHistoryRecord {
    pub request_id: Uuid,
    pub user_id: Uuid,
    pub user_name: String,
    pub user_email: String,
    pub category_name: String,
    pub item_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: DateTime<Utc>,
    pub expired_date: DateTime<Utc>,
    pub state: HistoryState,
}

impl NewHistoryRecord {
    pub fn into_record(self, id: Uuid) -> RequestHistory {
        RequestHistory {
            id,
            request_id: self.request_id,
            user_id: self.user_id,
            user_name: self.user_name,
            user_email: self.user_email,
            category_name: self.category_name,
            item_name: self.item_name,
            created_at: self.created_at,
            processed_at: self.processed_at,
            expired_date: self.expired_date,
            state: self.state,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HistoryList {
    pub history: Vec<RequestHistory>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProcessedRequest {
    pub history: RequestHistory,
}
