use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum MembershipStatus {
    Pending,
    Approved,
    Rejected,
}

impl MembershipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipStatus::Pending => "pending",
            MembershipStatus::Approved => "approved",
            MembershipStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for MembershipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Membership {
    pub id: String,
    pub trip_id: String,
    pub user_id: String,
    pub status: MembershipStatus,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct MemberEntry {
    pub id: String,
    pub user_id: String,
    pub username: String,
    pub status: MembershipStatus,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemberList {
    pub owner_id: String,
    pub owner_username: String,
    pub members: Vec<MemberEntry>,
    /// Only populated for the trip owner.
    pub pending: Vec<MemberEntry>,
}

/// The viewer's relationship to a trip.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ViewerStatus {
    #[serde(rename = "owner")]
    Owner,
    #[serde(rename = "approved")]
    Approved,
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "none")]
    NotMember,
}

impl ViewerStatus {
    /// Rejected rows are never written, but an old one must not grant anything.
    pub fn from_membership(status: Option<MembershipStatus>) -> Self {
        match status {
            Some(MembershipStatus::Approved) => ViewerStatus::Approved,
            Some(MembershipStatus::Pending) => ViewerStatus::Pending,
            Some(MembershipStatus::Rejected) | None => ViewerStatus::NotMember,
        }
    }

    pub fn can_access(&self) -> bool {
        matches!(self, ViewerStatus::Owner | ViewerStatus::Approved)
    }
}
