//! Database schema definitions

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::sql_types::Integer;
use tracing::info;

use crate::error::QuestError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

#[derive(QueryableByName)]
struct VersionRow {
    #[diesel(sql_type = Integer)]
    version: i32,
}

/// Initialize the database schema
pub fn init_schema(conn: &mut SqliteConnection) -> Result<(), QuestError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        conn.immediate_transaction::<_, QuestError, _>(|conn| {
            create_tables(conn)?;
            set_schema_version(conn, SCHEMA_VERSION)
        })?;
    } else if current_version < SCHEMA_VERSION {
        info!("Migrating schema from v{} to v{}", current_version, SCHEMA_VERSION);
        migrate_schema(conn, current_version)?;
    } else {
        info!("Database schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &mut SqliteConnection) -> Result<i32, QuestError> {
    conn.batch_execute("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)")?;

    let version = diesel::sql_query("SELECT version FROM schema_version LIMIT 1")
        .get_result::<VersionRow>(conn)
        .optional()?
        .map(|row| row.version)
        .unwrap_or(0);

    Ok(version)
}

/// Set schema version
fn set_schema_version(conn: &mut SqliteConnection, version: i32) -> Result<(), QuestError> {
    conn.batch_execute("DELETE FROM schema_version")?;
    diesel::sql_query("INSERT INTO schema_version (version) VALUES (?)")
        .bind::<Integer, _>(version)
        .execute(conn)?;
    Ok(())
}

/// Create all tables
fn create_tables(conn: &mut SqliteConnection) -> Result<(), QuestError> {
    conn.batch_execute(QUESTS_SCHEMA)?;
    conn.batch_execute(PARTICIPANTS_SCHEMA)?;
    conn.batch_execute(USER_SCHEMA)?;
    conn.batch_execute(INDEXES_SCHEMA)?;
    Ok(())
}

/// Migrate schema from older version
fn migrate_schema(conn: &mut SqliteConnection, from_version: i32) -> Result<(), QuestError> {
    // Add migration steps here as schema evolves
    match from_version {
        _ => {}
    }

    set_schema_version(conn, SCHEMA_VERSION)
}

/// Quest table schema
const QUESTS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS quests (
    id TEXT PRIMARY KEY NOT NULL,
    group_id TEXT NOT NULL,
    creator_id TEXT NOT NULL,
    title TEXT NOT NULL,
    description TEXT,
    reward_amount BIGINT NOT NULL CHECK (reward_amount >= 0),
    reward_currency TEXT NOT NULL,
    category TEXT NOT NULL CHECK (category IN ('social', 'location_based')),
    status TEXT NOT NULL DEFAULT 'active' CHECK (status IN ('active', 'completed', 'expired')),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    expires_at TEXT NOT NULL
);
"#;

/// Participant table schema.
/// The composite primary key is the only arbiter of "already joined".
const PARTICIPANTS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS quest_participants (
    quest_id TEXT NOT NULL REFERENCES quests(id) ON DELETE CASCADE,
    user_id TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'joined' CHECK (status IN ('joined', 'submitted', 'verified')),
    settlement_status TEXT CHECK (settlement_status IN ('pending', 'in_flight', 'sent', 'failed', 'unknown', 'skipped')),
    settlement_tx TEXT,
    settlement_error TEXT,
    joined_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (quest_id, user_id)
);
"#;

/// Per-user tables: achievements, activity log, wallet directory
const USER_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS user_achievements (
    user_id TEXT NOT NULL,
    achievement_id INTEGER NOT NULL,
    granted_at TEXT NOT NULL,
    PRIMARY KEY (user_id, achievement_id)
);

CREATE TABLE IF NOT EXISTS user_activities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    activity_type TEXT NOT NULL,
    metadata_json TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS user_wallets (
    user_id TEXT PRIMARY KEY NOT NULL,
    address TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

const INDEXES_SCHEMA: &str = r#"
CREATE INDEX IF NOT EXISTS idx_quests_group ON quests(group_id, status);
CREATE INDEX IF NOT EXISTS idx_participants_user_status ON quest_participants(user_id, status);
CREATE INDEX IF NOT EXISTS idx_participants_settlement ON quest_participants(settlement_status);
CREATE INDEX IF NOT EXISTS idx_activities_user ON user_activities(user_id, created_at);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema_is_idempotent() {
        let mut conn = SqliteConnection::establish(":memory:").unwrap();
        init_schema(&mut conn).unwrap();
        init_schema(&mut conn).unwrap();

        assert_eq!(get_schema_version(&mut conn).unwrap(), SCHEMA_VERSION);
    }
}
