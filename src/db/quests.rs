//! Quest CRUD operations using Diesel
//!
//! Authorization (creator/member checks) lives in the service layer;
//! these functions only read and write rows.

use diesel::prelude::*;
use serde::Deserialize;
use uuid::Uuid;

use super::diesel_schema::quests;
use super::models::{current_timestamp, quest_status, NewQuest, Quest, QuestChangeset};
use crate::error::QuestError;

// ============================================================================
// Query Types
// ============================================================================

/// Input for creating a quest
#[derive(Debug, Clone, Deserialize)]
pub struct CreateQuestInput {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub reward_amount: i64,
    #[serde(default)]
    pub reward_currency: Option<String>,
    pub category: String,
    /// RFC 3339 timestamp, must be in the future
    pub expires_at: String,
}

/// Patch for an existing quest
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateQuestInput {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub expires_at: Option<String>,
}

/// Query parameters for listing quests in a group
#[derive(Debug, Clone, Deserialize)]
pub struct QuestQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    100
}

impl Default for QuestQuery {
    fn default() -> Self {
        Self {
            status: None,
            limit: default_limit(),
            offset: 0,
        }
    }
}

// ============================================================================
// Read Operations
// ============================================================================

/// Get quest by ID
pub fn get_quest(conn: &mut SqliteConnection, quest_id: &str) -> Result<Option<Quest>, QuestError> {
    Ok(quests::table
        .filter(quests::id.eq(quest_id))
        .select(Quest::as_select())
        .first(conn)
        .optional()?)
}

/// Get quest by ID, only if it belongs to `group_id`
pub fn get_quest_in_group(
    conn: &mut SqliteConnection,
    group_id: &str,
    quest_id: &str,
) -> Result<Option<Quest>, QuestError> {
    Ok(quests::table
        .filter(quests::id.eq(quest_id))
        .filter(quests::group_id.eq(group_id))
        .select(Quest::as_select())
        .first(conn)
        .optional()?)
}

/// List quests of a group, newest first
pub fn list_quests(
    conn: &mut SqliteConnection,
    group_id: &str,
    query: &QuestQuery,
) -> Result<Vec<Quest>, QuestError> {
    let mut base_query = quests::table
        .filter(quests::group_id.eq(group_id))
        .into_boxed();

    if let Some(ref status) = query.status {
        base_query = base_query.filter(quests::status.eq(status));
    }

    Ok(base_query
        .order(quests::created_at.desc())
        .limit(query.limit.clamp(1, 500))
        .offset(query.offset.max(0))
        .select(Quest::as_select())
        .load(conn)?)
}

// ============================================================================
// Write Operations
// ============================================================================

/// Insert a new active quest. Input must already be validated.
pub fn insert_quest(
    conn: &mut SqliteConnection,
    group_id: &str,
    creator_id: &str,
    input: &CreateQuestInput,
    reward_currency: &str,
) -> Result<Quest, QuestError> {
    let id = Uuid::new_v4().to_string();
    let now = current_timestamp();

    let new_quest = NewQuest {
        id: &id,
        group_id,
        creator_id,
        title: &input.title,
        description: input.description.as_deref(),
        reward_amount: input.reward_amount,
        reward_currency,
        category: &input.category,
        status: quest_status::ACTIVE,
        created_at: &now,
        updated_at: &now,
        expires_at: &input.expires_at,
    };

    diesel::insert_into(quests::table)
        .values(&new_quest)
        .execute(conn)?;

    get_quest(conn, &id)?
        .ok_or_else(|| QuestError::Internal("Failed to retrieve created quest".into()))
}

/// Apply a patch to a quest
pub fn update_quest(
    conn: &mut SqliteConnection,
    quest_id: &str,
    input: &UpdateQuestInput,
) -> Result<Quest, QuestError> {
    let now = current_timestamp();
    let changes = QuestChangeset {
        title: input.title.as_deref(),
        description: input.description.as_deref(),
        expires_at: input.expires_at.as_deref(),
        updated_at: Some(&now),
    };

    diesel::update(quests::table.filter(quests::id.eq(quest_id)))
        .set(&changes)
        .execute(conn)?;

    get_quest(conn, quest_id)?.ok_or(QuestError::QuestNotFound)
}

/// Delete a quest; participant rows cascade
pub fn delete_quest(conn: &mut SqliteConnection, quest_id: &str) -> Result<bool, QuestError> {
    let deleted = diesel::delete(quests::table.filter(quests::id.eq(quest_id))).execute(conn)?;
    Ok(deleted > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::init_schema;

    fn setup_test_db() -> SqliteConnection {
        let mut conn = SqliteConnection::establish(":memory:")
            .expect("Failed to create in-memory database");
        init_schema(&mut conn).expect("Failed to create schema");
        conn
    }

    fn input(title: &str) -> CreateQuestInput {
        CreateQuestInput {
            title: title.to_string(),
            description: None,
            reward_amount: 100,
            reward_currency: None,
            category: "social".to_string(),
            expires_at: "2999-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_group_scoping() {
        let mut conn = setup_test_db();

        let quest = insert_quest(&mut conn, "hikers", "carol", &input("Summit"), "ETH").unwrap();
        assert_eq!(quest.status, "active");

        assert!(get_quest_in_group(&mut conn, "hikers", &quest.id).unwrap().is_some());
        assert!(get_quest_in_group(&mut conn, "cyclists", &quest.id).unwrap().is_none());

        let listed = list_quests(&mut conn, "hikers", &QuestQuery { limit: 10, ..Default::default() }).unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[test]
    fn test_update_leaves_unset_fields() {
        let mut conn = setup_test_db();
        let mut create = input("Summit");
        create.description = Some("Reach the top".to_string());
        let quest = insert_quest(&mut conn, "hikers", "carol", &create, "ETH").unwrap();

        let updated = update_quest(
            &mut conn,
            &quest.id,
            &UpdateQuestInput { title: Some("Summit at dawn".into()), ..Default::default() },
        )
        .unwrap();

        assert_eq!(updated.title, "Summit at dawn");
        assert_eq!(updated.description.as_deref(), Some("Reach the top"));
    }

    #[test]
    fn test_negative_reward_rejected_by_store() {
        let mut conn = setup_test_db();
        let mut create = input("Bad");
        create.reward_amount = -1;
        assert!(insert_quest(&mut conn, "hikers", "carol", &create, "ETH").is_err());
    }
}
