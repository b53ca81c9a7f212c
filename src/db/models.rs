//! Diesel model definitions for database tables
//!
//! - Queryable structs: for SELECT queries (reading data)
//! - Insertable structs: for INSERT queries (writing data)
//!
//! Status columns are stored as TEXT; the constant modules below are the
//! only values the schema CHECK constraints accept.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use super::diesel_schema::*;

// ============================================================================
// Timestamp Helpers (SQLite stores timestamps as TEXT)
// ============================================================================

/// Get current UTC timestamp as RFC 3339 string for SQLite TEXT columns
pub fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

// ============================================================================
// Quest Models
// ============================================================================

/// Quest row from SELECT query
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = quests)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Quest {
    pub id: String,
    pub group_id: String,
    pub creator_id: String,
    pub title: String,
    pub description: Option<String>,
    pub reward_amount: i64,
    pub reward_currency: String,
    pub category: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
    pub expires_at: String,
}

/// New quest for INSERT
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = quests)]
pub struct NewQuest<'a> {
    pub id: &'a str,
    pub group_id: &'a str,
    pub creator_id: &'a str,
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub reward_amount: i64,
    pub reward_currency: &'a str,
    pub category: &'a str,
    pub status: &'a str,
    pub created_at: &'a str,
    pub updated_at: &'a str,
    pub expires_at: &'a str,
}

/// Partial quest update; `None` leaves the column untouched
#[derive(Debug, Clone, Default, AsChangeset)]
#[diesel(table_name = quests)]
pub struct QuestChangeset<'a> {
    pub title: Option<&'a str>,
    pub description: Option<&'a str>,
    pub expires_at: Option<&'a str>,
    pub updated_at: Option<&'a str>,
}

// ============================================================================
// Participant Models
// ============================================================================

/// Participant row from SELECT query
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = quest_participants)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Participant {
    pub quest_id: String,
    pub user_id: String,
    pub status: String,
    pub settlement_status: Option<String>,
    pub settlement_tx: Option<String>,
    pub settlement_error: Option<String>,
    pub joined_at: String,
    pub updated_at: String,
}

/// New participant for INSERT
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = quest_participants)]
pub struct NewParticipant<'a> {
    pub quest_id: &'a str,
    pub user_id: &'a str,
    pub status: &'a str,
    pub joined_at: &'a str,
    pub updated_at: &'a str,
}

// ============================================================================
// Achievement / Activity / Wallet Models
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = user_achievements)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct AchievementGrant {
    pub user_id: String,
    pub achievement_id: i32,
    pub granted_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = user_achievements)]
pub struct NewAchievementGrant<'a> {
    pub user_id: &'a str,
    pub achievement_id: i32,
    pub granted_at: &'a str,
}

/// Activity log entry (append-only)
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = user_activities)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ActivityEntry {
    pub id: i32,
    pub user_id: String,
    pub activity_type: String,
    pub metadata_json: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = user_activities)]
pub struct NewActivityEntry<'a> {
    pub user_id: &'a str,
    pub activity_type: &'a str,
    pub metadata_json: Option<&'a str>,
    pub created_at: &'a str,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = user_wallets)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Wallet {
    pub user_id: String,
    pub address: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = user_wallets)]
pub struct NewWallet<'a> {
    pub user_id: &'a str,
    pub address: &'a str,
    pub updated_at: &'a str,
}

// ============================================================================
// Enum-like Constants
// ============================================================================

/// Quest lifecycle status
pub mod quest_status {
    pub const ACTIVE: &str = "active";
    pub const COMPLETED: &str = "completed";
    pub const EXPIRED: &str = "expired";

    pub const ALL: [&str; 3] = [ACTIVE, COMPLETED, EXPIRED];

    pub fn is_valid(status: &str) -> bool {
        ALL.contains(&status)
    }
}

/// Quest categories
pub mod quest_categories {
    pub const SOCIAL: &str = "social";
    pub const LOCATION_BASED: &str = "location_based";

    pub const ALL: [&str; 2] = [SOCIAL, LOCATION_BASED];

    pub fn is_valid(category: &str) -> bool {
        ALL.contains(&category)
    }
}

/// Participant status. Transitions only move forward:
/// joined -> submitted -> verified.
pub mod participant_status {
    pub const JOINED: &str = "joined";
    pub const SUBMITTED: &str = "submitted";
    pub const VERIFIED: &str = "verified";
}

/// Settlement status of a verified participation.
///
/// `pending` is written by verification; the dispatcher claims it as
/// `in_flight` before calling the ledger and finishes on `sent` or `failed`.
/// `unknown` means the ledger may or may not have moved the funds; it is
/// never re-sent automatically. `skipped` means there was nothing payable.
pub mod settlement_status {
    pub const PENDING: &str = "pending";
    pub const IN_FLIGHT: &str = "in_flight";
    pub const SENT: &str = "sent";
    pub const FAILED: &str = "failed";
    pub const UNKNOWN: &str = "unknown";
    pub const SKIPPED: &str = "skipped";
}

/// Activity log entry types
pub mod activity_types {
    pub const QUEST_CREATED: &str = "quest_created";
    pub const QUEST_JOINED: &str = "quest_joined";
    pub const QUEST_SUBMITTED: &str = "quest_submitted";
    pub const QUEST_VERIFIED: &str = "quest_verified";
    pub const ACHIEVEMENT_GRANTED: &str = "achievement_granted";
}
