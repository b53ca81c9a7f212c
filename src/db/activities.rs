//! Activity log (append-only)
//!
//! Entries are written inside the transaction of the action they describe
//! and are never updated or deleted here.

use diesel::prelude::*;

use super::diesel_schema::user_activities;
use super::models::{current_timestamp, ActivityEntry, NewActivityEntry};
use crate::error::QuestError;

/// Append an activity entry
pub fn record_activity(
    conn: &mut SqliteConnection,
    user_id: &str,
    activity_type: &str,
    metadata: &serde_json::Value,
) -> Result<(), QuestError> {
    let now = current_timestamp();
    let metadata_json = serde_json::to_string(metadata)?;

    diesel::insert_into(user_activities::table)
        .values(&NewActivityEntry {
            user_id,
            activity_type,
            metadata_json: Some(&metadata_json),
            created_at: &now,
        })
        .execute(conn)?;

    Ok(())
}

/// Most recent activity for a user
pub fn list_for_user(
    conn: &mut SqliteConnection,
    user_id: &str,
    limit: i64,
) -> Result<Vec<ActivityEntry>, QuestError> {
    Ok(user_activities::table
        .filter(user_activities::user_id.eq(user_id))
        .order(user_activities::id.desc())
        .limit(limit)
        .select(ActivityEntry::as_select())
        .load(conn)?)
}

/// Count a user's entries of one type
pub fn count_for_user(
    conn: &mut SqliteConnection,
    user_id: &str,
    activity_type: &str,
) -> Result<i64, QuestError> {
    Ok(user_activities::table
        .filter(user_activities::user_id.eq(user_id))
        .filter(user_activities::activity_type.eq(activity_type))
        .count()
        .get_result(conn)?)
}
