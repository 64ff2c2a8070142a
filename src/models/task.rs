use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, NoneAsEmptyString};
use sqlx::FromRow;

/// A packing item. `creator_name` is the creator's username at the moment the
/// task was added and is never rewritten when they rename themselves.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Task {
    pub id: String,
    pub trip_id: String,
    pub folder_id: Option<String>,
    pub text: String,
    pub description: Option<String>,
    pub deadline: Option<NaiveDate>,
    pub creator_id: String,
    pub creator_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Someone's claim to have packed a task; `user_name` is a snapshot too.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct PackingRecord {
    pub id: String,
    pub task_id: String,
    pub user_id: String,
    pub user_name: String,
    pub packed_at: DateTime<Utc>,
}

#[serde_as]
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TaskFields {
    pub text: String,
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    pub description: Option<String>,
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    pub deadline: Option<NaiveDate>,
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    pub folder_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskWithPackers {
    #[serde(flatten)]
    pub task: Task,
    pub packers: Vec<PackingRecord>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct Progress {
    pub total_tasks: i64,
    pub packed_by_me: i64,
    pub progress: f64,
}

impl Progress {
    pub fn new(total_tasks: i64, packed_by_me: i64) -> Self {
        let progress = if total_tasks == 0 {
            0.0
        } else {
            packed_by_me as f64 / total_tasks as f64
        };
        Self {
            total_tasks,
            packed_by_me,
            progress,
        }
    }
}
