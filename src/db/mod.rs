//! SQLite database module for the quest store
//!
//! ## Architecture
//!
//! - Pooled diesel `SqliteConnection`s (r2d2), one per blocking task
//! - WAL journal so readers never wait on the writer
//! - `busy_timeout` on every connection so writers queue on the lock
//!   instead of failing with `SQLITE_BUSY`
//!
//! ## Tables
//!
//! - `quests` - Quest definitions owned by their creator
//! - `quest_participants` - Per-user progress, keyed by (quest, user)
//! - `user_achievements` - One row per granted achievement
//! - `user_activities` - Append-only activity log
//! - `user_wallets` - External ledger address per user

pub mod diesel_schema;
pub mod models;
pub mod schema;

pub mod achievements;
pub mod activities;
pub mod participants;
pub mod quests;
pub mod wallets;

use std::path::Path;
use std::time::Duration;

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use tracing::{debug, error, info};

use crate::error::QuestError;

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;
pub type PooledConn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Per-connection PRAGMAs applied when r2d2 opens a connection
#[derive(Debug, Clone, Copy)]
struct ConnectionOptions {
    busy_timeout: Duration,
}

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute(&format!(
            "PRAGMA busy_timeout = {}; PRAGMA foreign_keys = ON; PRAGMA synchronous = NORMAL;",
            self.busy_timeout.as_millis()
        ))
        .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Handle to the quest database.
///
/// Cheap to clone; every engine operation receives the handle explicitly.
#[derive(Clone)]
pub struct QuestDb {
    pool: DbPool,
}

impl QuestDb {
    /// Open or create the quest database
    pub fn open(
        db_path: &Path,
        pool_size: u32,
        busy_timeout: Duration,
    ) -> Result<Self, QuestError> {
        info!("Opening SQLite database at {:?}", db_path);

        let url = db_path.to_string_lossy().to_string();

        // WAL is a property of the database file, set once before pooling
        let mut setup = SqliteConnection::establish(&url)
            .map_err(|e| QuestError::Internal(format!("Failed to open SQLite: {}", e)))?;
        setup.batch_execute("PRAGMA journal_mode=WAL;")?;
        schema::init_schema(&mut setup)?;

        let manager = ConnectionManager::<SqliteConnection>::new(url);
        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .connection_customizer(Box::new(ConnectionOptions { busy_timeout }))
            .build(manager)
            .map_err(|e| QuestError::Internal(format!("Failed to build pool: {}", e)))?;

        Ok(Self { pool })
    }

    /// Open an in-memory database (for testing).
    ///
    /// A single pooled connection keeps the in-memory database alive and
    /// shared; concurrent callers queue on the pool.
    pub fn open_in_memory() -> Result<Self, QuestError> {
        debug!("Opening in-memory SQLite database");

        let manager = ConnectionManager::<SqliteConnection>::new(":memory:");
        let pool = Pool::builder()
            .max_size(1)
            .min_idle(Some(1))
            .idle_timeout(None)
            .max_lifetime(None)
            .connection_customizer(Box::new(ConnectionOptions {
                busy_timeout: Duration::from_secs(5),
            }))
            .build(manager)
            .map_err(|e| QuestError::Internal(format!("Failed to build pool: {}", e)))?;

        let db = Self { pool };
        db.with_conn(schema::init_schema)?;
        Ok(db)
    }

    /// Check out a connection
    pub fn conn(&self) -> Result<PooledConn, QuestError> {
        Ok(self.pool.get()?)
    }

    /// Run a closure against a pooled connection on the current thread
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, QuestError>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T, QuestError>,
    {
        let mut conn = self.conn()?;
        f(&mut *conn)
    }

    /// Run a closure against a pooled connection on the blocking thread pool.
    ///
    /// Store errors are logged here; callers surface them as internal failures.
    pub async fn run<F, T>(&self, f: F) -> Result<T, QuestError>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T, QuestError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        let result = tokio::task::spawn_blocking(move || db.with_conn(f))
            .await
            .map_err(|e| QuestError::Internal(format!("Database task failed: {}", e)))?;

        if let Err(ref e) = result {
            if !e.is_domain() {
                error!(error = %e, "Quest store operation failed");
            }
        }
        result
    }

    /// Get database statistics
    pub async fn stats(&self) -> Result<DbStats, QuestError> {
        use diesel_schema::{quest_participants, quests, user_achievements};

        self.run(|conn| {
            let quest_count: i64 = quests::table.count().get_result(conn)?;
            let participant_count: i64 = quest_participants::table.count().get_result(conn)?;
            let achievement_count: i64 = user_achievements::table.count().get_result(conn)?;

            Ok(DbStats {
                quest_count: quest_count as u64,
                participant_count: participant_count as u64,
                achievement_count: achievement_count as u64,
            })
        })
        .await
    }
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub quest_count: u64,
    pub participant_count: u64,
    pub achievement_count: u64,
}

/// True when a diesel error is a uniqueness/primary-key conflict
pub fn is_unique_violation(err: &diesel::result::Error) -> bool {
    matches!(
        err,
        diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _
        )
    )
}
