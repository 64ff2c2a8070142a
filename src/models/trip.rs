use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, NoneAsEmptyString};
use sqlx::FromRow;

use crate::models::membership::ViewerStatus;

pub const MIN_TRIP_NAME_LEN: usize = 2;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Trip {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub owner_id: String,
    pub invite_code: String,
    pub is_public: bool,
    pub auto_approve_members: bool,
    pub destination: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Trip {
    pub fn is_owner(&self, user_id: &str) -> bool {
        self.owner_id == user_id
    }
}

#[serde_as]
#[derive(Debug, Clone, Deserialize, Default)]
pub struct NewTrip {
    pub name: String,
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    pub description: Option<String>,
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    pub destination: Option<String>,
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default = "default_public")]
    pub is_public: bool,
    #[serde(default)]
    pub auto_approve_members: bool,
}

fn default_public() -> bool {
    true
}

/// Owner-editable settings. Absent fields keep their stored value; an empty
/// description clears it.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TripChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_public: Option<bool>,
    pub auto_approve_members: Option<bool>,
}

/// A trip as shown in listings, decorated with counts and the viewer's
/// relationship to it.
#[derive(Debug, Clone, Serialize)]
pub struct TripSummary {
    #[serde(flatten)]
    pub trip: Trip,
    pub owner_username: String,
    pub member_count: i64,
    pub task_count: i64,
    pub membership_status: ViewerStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct TripDetails {
    #[serde(flatten)]
    pub summary: TripSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invite_link: Option<String>,
}

/// What someone holding an invite code gets to see before joining.
#[derive(Debug, Clone, Serialize)]
pub struct InvitePreview {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub destination: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub owner_username: String,
    pub auto_approve_members: bool,
    pub membership_status: ViewerStatus,
}
