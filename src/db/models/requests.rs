use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Accepted => "accepted",
            RequestStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "accepted" => Ok(RequestStatus::Accepted),
            "rejected" => Ok(RequestStatus::Rejected),
            other => Err(format!("unknown request status `{other}`")),
        }
    }
}

/// A user's ask for a whole category (`item_name` absent) or one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccessRequest {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub user_id: Uuid,
    pub category_name: String,
    pub item_name: Option<String>,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewAccessRequest {
    pub category_name: String,
    pub item_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Row of the admin queue: a pending request joined with its requester.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PendingRequestView {
    pub id: Uuid,
    pub user_id: Uuid,
    pub user_name: String,
    pub user_email: String,
    pub category_name: String,
    pub item_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Body of `POST /requests/send`
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SendRequestPayload {
    pub user_id: Option<String>,
    pub category_name: Option<String>,
    pub item_name: Option<String>,
}

/// Body of `POST /requests/allowRequest` and `POST /requests/rejectRequest`
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRequestPayload {
    pub user_id: Option<String>,
    pub id: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RequestList {
    pub requests: Vec<AccessRequest>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PendingQueue {
    pub requests: Vec<PendingRequestView>,
}
