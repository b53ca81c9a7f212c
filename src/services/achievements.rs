//! Achievement evaluator
//!
//! Milestones are data: add a row to `RULES` to introduce a new one.
//! Evaluation runs inside the verify transaction, so a failed grant
//! rolls the verification back with it.

use diesel::SqliteConnection;
use serde::Serialize;

use crate::db::models::activity_types;
use crate::db::{achievements, activities, participants};
use crate::error::QuestError;

/// A milestone reached once a user holds `verified_count` verified quests
#[derive(Debug, Clone, Copy, Serialize)]
pub struct AchievementRule {
    pub achievement_id: i32,
    pub name: &'static str,
    pub verified_count: i64,
}

pub const FIRST_QUEST_COMPLETED: i32 = 1;

pub const RULES: &[AchievementRule] = &[
    AchievementRule {
        achievement_id: FIRST_QUEST_COMPLETED,
        name: "first_quest_completed",
        verified_count: 1,
    },
    AchievementRule {
        achievement_id: 2,
        name: "quest_regular",
        verified_count: 5,
    },
    AchievementRule {
        achievement_id: 3,
        name: "quest_veteran",
        verified_count: 25,
    },
];

/// Rules satisfied by a verified-participation count
pub fn earned(verified_count: i64) -> impl Iterator<Item = &'static AchievementRule> {
    RULES.iter().filter(move |rule| verified_count >= rule.verified_count)
}

/// Look up a rule by id
pub fn rule(achievement_id: i32) -> Option<&'static AchievementRule> {
    RULES.iter().find(|rule| rule.achievement_id == achievement_id)
}

/// Count the user's verified quests and grant every milestone reached.
///
/// Must run on the connection of the enclosing verify transaction.
/// Returns the ids granted by this call; already-held ones are skipped
/// silently.
pub fn evaluate(conn: &mut SqliteConnection, user_id: &str) -> Result<Vec<i32>, QuestError> {
    let verified = participants::count_verified(conn, user_id)?;
    let mut granted = Vec::new();

    for rule in earned(verified) {
        if achievements::grant_if_absent(conn, user_id, rule.achievement_id)? {
            activities::record_activity(
                conn,
                user_id,
                activity_types::ACHIEVEMENT_GRANTED,
                &serde_json::json!({
                    "achievement_id": rule.achievement_id,
                    "name": rule.name,
                    "verified_count": verified,
                }),
            )?;
            granted.push(rule.achievement_id);
        }
    }

    Ok(granted)
}
