//! Achievement grants
//!
//! A grant is "insert if absent": the (user_id, achievement_id) primary key
//! absorbs repeats, so granting never fails on a duplicate.

use diesel::prelude::*;

use super::diesel_schema::user_achievements;
use super::models::{current_timestamp, AchievementGrant, NewAchievementGrant};
use crate::error::QuestError;

/// Grant an achievement unless already held. Returns true if newly granted.
pub fn grant_if_absent(
    conn: &mut SqliteConnection,
    user_id: &str,
    achievement_id: i32,
) -> Result<bool, QuestError> {
    let now = current_timestamp();
    let rows = diesel::insert_or_ignore_into(user_achievements::table)
        .values(&NewAchievementGrant {
            user_id,
            achievement_id,
            granted_at: &now,
        })
        .execute(conn)?;

    Ok(rows == 1)
}

/// List a user's achievements in grant order
pub fn list_for_user(
    conn: &mut SqliteConnection,
    user_id: &str,
) -> Result<Vec<AchievementGrant>, QuestError> {
    Ok(user_achievements::table
        .filter(user_achievements::user_id.eq(user_id))
        .order((user_achievements::granted_at.asc(), user_achievements::achievement_id.asc()))
        .select(AchievementGrant::as_select())
        .load(conn)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::init_schema;

    #[test]
    fn test_grant_is_idempotent() {
        let mut conn = SqliteConnection::establish(":memory:").unwrap();
        init_schema(&mut conn).unwrap();

        assert!(grant_if_absent(&mut conn, "alice", 1).unwrap());
        assert!(!grant_if_absent(&mut conn, "alice", 1).unwrap());
        assert!(grant_if_absent(&mut conn, "bob", 1).unwrap());

        let grants = list_for_user(&mut conn, "alice").unwrap();
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].achievement_id, 1);
    }
}
