//! Row types and enumerations stored in the list tables

use std::fmt;
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

use crate::error::ListError;

// ============================================================================
// Timestamp Helpers (SQLite stores timestamps as TEXT)
// ============================================================================

/// Get current UTC timestamp as ISO 8601 string for SQLite TEXT columns
pub fn current_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// New random row id
pub fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

// ============================================================================
// Enumerations
// ============================================================================

/// Lifecycle of a submitted clear
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Pending,
    Accepted,
    Rejected,
    RejectedRetryable,
}

impl SubmissionStatus {
    pub const ALL: [SubmissionStatus; 4] = [
        SubmissionStatus::Pending,
        SubmissionStatus::Accepted,
        SubmissionStatus::Rejected,
        SubmissionStatus::RejectedRetryable,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::Accepted => "accepted",
            SubmissionStatus::Rejected => "rejected",
            SubmissionStatus::RejectedRetryable => "rejected_retryable",
        }
    }

    /// Structural transitions, independent of who asks.
    ///
    /// A pending clear can be decided any way. A retryable rejection only
    /// goes back to pending (the player resubmits). Accepted and rejected
    /// clears can be corrected by a moderator to any status; whether the
    /// caller is one is expressed by the allowed-prior-status set.
    pub fn can_become(self, next: SubmissionStatus) -> bool {
        use SubmissionStatus::*;
        match (self, next) {
            (a, b) if a == b => true,
            (Pending, _) => true,
            (RejectedRetryable, Pending) => true,
            (RejectedRetryable, _) => false,
            (Accepted, _) | (Rejected, _) => true,
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubmissionStatus {
    type Err = ListError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SubmissionStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ListError::validation(format!("unknown submission status: {}", s)))
    }
}

impl ToSql for SubmissionStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for SubmissionStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        s.parse().map_err(|e: ListError| FromSqlError::Other(Box::new(e)))
    }
}

/// What happened to a level in a history entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryAction {
    #[serde(rename = "placed")]
    Placed,
    #[serde(rename = "placedAbove")]
    PlacedAbove,
    #[serde(rename = "movedUp")]
    MovedUp,
    #[serde(rename = "movedDown")]
    MovedDown,
    #[serde(rename = "movedToLegacy")]
    MovedToLegacy,
    #[serde(rename = "movedFromLegacy")]
    MovedFromLegacy,
    #[serde(rename = "movedPastUp")]
    MovedPastUp,
    #[serde(rename = "movedPastDown")]
    MovedPastDown,
}

impl HistoryAction {
    pub const ALL: [HistoryAction; 8] = [
        HistoryAction::Placed,
        HistoryAction::PlacedAbove,
        HistoryAction::MovedUp,
        HistoryAction::MovedDown,
        HistoryAction::MovedToLegacy,
        HistoryAction::MovedFromLegacy,
        HistoryAction::MovedPastUp,
        HistoryAction::MovedPastDown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryAction::Placed => "placed",
            HistoryAction::PlacedAbove => "placedAbove",
            HistoryAction::MovedUp => "movedUp",
            HistoryAction::MovedDown => "movedDown",
            HistoryAction::MovedToLegacy => "movedToLegacy",
            HistoryAction::MovedFromLegacy => "movedFromLegacy",
            HistoryAction::MovedPastUp => "movedPastUp",
            HistoryAction::MovedPastDown => "movedPastDown",
        }
    }
}

impl ToSql for HistoryAction {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for HistoryAction {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        HistoryAction::ALL
            .iter()
            .copied()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| FromSqlError::Other(format!("unknown history action: {}", s).into()))
    }
}

// ============================================================================
// Rows
// ============================================================================

/// User row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub global_name: String,
    pub banned: bool,
    pub placeholder: bool,
    pub created_at: String,
}

impl UserRow {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            username: row.get("username")?,
            global_name: row.get("global_name")?,
            banned: row.get("banned")?,
            placeholder: row.get("placeholder")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Level row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelRow {
    pub id: String,
    pub name: String,
    pub game_level_id: Option<i64>,
    pub position: i64,
    pub legacy: bool,
    pub points: f64,
    pub publisher_id: Option<String>,
    pub verification_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl LevelRow {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            game_level_id: row.get("game_level_id")?,
            position: row.get("position")?,
            legacy: row.get("legacy")?,
            points: row.get("points")?,
            publisher_id: row.get("publisher_id")?,
            verification_id: row.get("verification_id")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Submission row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRow {
    pub id: String,
    pub level_id: String,
    pub submitted_by: String,
    pub status: SubmissionStatus,
    pub placement_order: i64,
    pub reviewer_id: Option<String>,
    pub video_url: Option<String>,
    pub mobile: bool,
    pub fps: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

impl SubmissionRow {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            level_id: row.get("level_id")?,
            submitted_by: row.get("submitted_by")?,
            status: row.get("status")?,
            placement_order: row.get("placement_order")?,
            reviewer_id: row.get("reviewer_id")?,
            video_url: row.get("video_url")?,
            mobile: row.get("mobile")?,
            fps: row.get("fps")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Pack row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackRow {
    pub id: String,
    pub name: String,
    pub colour: Option<String>,
    pub placement_order: i64,
    pub points: f64,
    #[serde(default)]
    pub level_ids: Vec<String>,
}

impl PackRow {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            colour: row.get("colour")?,
            placement_order: row.get("placement_order")?,
            points: row.get("points")?,
            level_ids: vec![],
        })
    }
}

/// Leaderboard row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardRow {
    pub user_id: String,
    pub points: f64,
    pub rank: i64,
}

impl LeaderboardRow {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            user_id: row.get("user_id")?,
            points: row.get("points")?,
            rank: row.get("rank")?,
        })
    }
}

/// History row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRow {
    pub id: i64,
    pub level_id: String,
    pub action: HistoryAction,
    pub new_position: i64,
    pub cause_id: String,
    pub action_by: String,
    pub created_at: String,
}

impl HistoryRow {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            level_id: row.get("level_id")?,
            action: row.get("action")?,
            new_position: row.get("new_position")?,
            cause_id: row.get("cause_id")?,
            action_by: row.get("action_by")?,
            created_at: row.get("created_at")?,
        })
    }
}
