//! Participant record operations
//!
//! Every status write is a guarded update (`WHERE status = <expected>`);
//! a record never moves backward. Callers distinguish "no such record"
//! from "wrong status" by re-reading inside the same transaction.

use diesel::prelude::*;

use super::diesel_schema::quest_participants;
use super::is_unique_violation;
use super::models::{current_timestamp, participant_status, settlement_status, NewParticipant, Participant};
use crate::error::QuestError;

// ============================================================================
// Read Operations
// ============================================================================

/// Get a participant record
pub fn get_participant(
    conn: &mut SqliteConnection,
    quest_id: &str,
    user_id: &str,
) -> Result<Option<Participant>, QuestError> {
    Ok(quest_participants::table
        .filter(quest_participants::quest_id.eq(quest_id))
        .filter(quest_participants::user_id.eq(user_id))
        .select(Participant::as_select())
        .first(conn)
        .optional()?)
}

/// Read the participant row as the first statement of a write transaction.
///
/// SQLite has no `SELECT ... FOR UPDATE`; the row is protected by the
/// database write lock taken by `immediate_transaction`, which the caller
/// must already hold. Any other writer blocks until that transaction ends.
pub fn lock_participant(
    conn: &mut SqliteConnection,
    quest_id: &str,
    user_id: &str,
) -> Result<Option<Participant>, QuestError> {
    get_participant(conn, quest_id, user_id)
}

/// List participants of a quest in join order
pub fn list_participants(
    conn: &mut SqliteConnection,
    quest_id: &str,
) -> Result<Vec<Participant>, QuestError> {
    Ok(quest_participants::table
        .filter(quest_participants::quest_id.eq(quest_id))
        .order(quest_participants::joined_at.asc())
        .select(Participant::as_select())
        .load(conn)?)
}

/// Count a user's verified participations across all quests
pub fn count_verified(conn: &mut SqliteConnection, user_id: &str) -> Result<i64, QuestError> {
    Ok(quest_participants::table
        .filter(quest_participants::user_id.eq(user_id))
        .filter(quest_participants::status.eq(participant_status::VERIFIED))
        .count()
        .get_result(conn)?)
}

/// A verified participation of the quest whose reward is not yet closed
/// (`sent` or `skipped`), if any
pub fn first_unsettled(
    conn: &mut SqliteConnection,
    quest_id: &str,
) -> Result<Option<Participant>, QuestError> {
    Ok(quest_participants::table
        .filter(quest_participants::quest_id.eq(quest_id))
        .filter(quest_participants::status.eq(participant_status::VERIFIED))
        .filter(
            quest_participants::settlement_status
                .ne_all([settlement_status::SENT, settlement_status::SKIPPED]),
        )
        .select(Participant::as_select())
        .first(conn)
        .optional()?)
}

/// Verified participations whose settlement is in `status`
pub fn list_by_settlement_status(
    conn: &mut SqliteConnection,
    status: &str,
    limit: i64,
) -> Result<Vec<Participant>, QuestError> {
    Ok(quest_participants::table
        .filter(quest_participants::settlement_status.eq(status))
        .order(quest_participants::updated_at.asc())
        .limit(limit)
        .select(Participant::as_select())
        .load(conn)?)
}

// ============================================================================
// Lifecycle Transitions
// ============================================================================

/// Insert a `joined` record.
///
/// The (quest_id, user_id) primary key decides races: the losing insert
/// surfaces as `AlreadyJoined`, never as a store error.
pub fn insert_participant(
    conn: &mut SqliteConnection,
    quest_id: &str,
    user_id: &str,
) -> Result<Participant, QuestError> {
    let now = current_timestamp();
    let new_participant = NewParticipant {
        quest_id,
        user_id,
        status: participant_status::JOINED,
        joined_at: &now,
        updated_at: &now,
    };

    diesel::insert_into(quest_participants::table)
        .values(&new_participant)
        .execute(conn)
        .map_err(|e| match e {
            ref e if is_unique_violation(e) => QuestError::AlreadyJoined,
            // Quest deleted between lookup and insert
            diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::ForeignKeyViolation,
                _,
            ) => QuestError::QuestNotFound,
            e => QuestError::Database(e),
        })?;

    get_participant(conn, quest_id, user_id)?
        .ok_or_else(|| QuestError::Internal("Failed to retrieve joined participant".into()))
}

/// Move `from -> to` if the record is currently `from`. Returns rows affected.
fn advance_status(
    conn: &mut SqliteConnection,
    quest_id: &str,
    user_id: &str,
    from: &str,
    to: &str,
    settlement: Option<&str>,
) -> Result<usize, QuestError> {
    let now = current_timestamp();
    let target = quest_participants::table
        .filter(quest_participants::quest_id.eq(quest_id))
        .filter(quest_participants::user_id.eq(user_id))
        .filter(quest_participants::status.eq(from));

    let rows = match settlement {
        Some(settlement) => diesel::update(target)
            .set((
                quest_participants::status.eq(to),
                quest_participants::settlement_status.eq(settlement),
                quest_participants::updated_at.eq(&now),
            ))
            .execute(conn)?,
        None => diesel::update(target)
            .set((
                quest_participants::status.eq(to),
                quest_participants::updated_at.eq(&now),
            ))
            .execute(conn)?,
    };

    Ok(rows)
}

/// `joined -> submitted`
pub fn mark_submitted(
    conn: &mut SqliteConnection,
    quest_id: &str,
    user_id: &str,
) -> Result<Participant, QuestError> {
    let rows = advance_status(
        conn,
        quest_id,
        user_id,
        participant_status::JOINED,
        participant_status::SUBMITTED,
        None,
    )?;

    match get_participant(conn, quest_id, user_id)? {
        Some(participant) if rows == 1 => Ok(participant),
        Some(_) => Err(QuestError::AlreadySubmitted),
        None => Err(QuestError::NotAParticipant),
    }
}

/// `submitted -> verified`, opening a `pending` settlement in the same write
pub fn mark_verified(
    conn: &mut SqliteConnection,
    quest_id: &str,
    user_id: &str,
) -> Result<Participant, QuestError> {
    let rows = advance_status(
        conn,
        quest_id,
        user_id,
        participant_status::SUBMITTED,
        participant_status::VERIFIED,
        Some(settlement_status::PENDING),
    )?;

    match get_participant(conn, quest_id, user_id)? {
        Some(participant) if rows == 1 => Ok(participant),
        Some(participant) => Err(QuestError::InvalidStatus { current: participant.status }),
        None => Err(QuestError::ParticipantNotFound),
    }
}

// ============================================================================
// Settlement Status
// ============================================================================

/// Conditional settlement write: applies only while the row is in `from`.
///
/// Returns true when this caller won the transition.
pub fn transition_settlement(
    conn: &mut SqliteConnection,
    quest_id: &str,
    user_id: &str,
    from: &str,
    to: &str,
    tx_handle: Option<&str>,
    error: Option<&str>,
) -> Result<bool, QuestError> {
    let now = current_timestamp();
    let rows = diesel::update(
        quest_participants::table
            .filter(quest_participants::quest_id.eq(quest_id))
            .filter(quest_participants::user_id.eq(user_id))
            .filter(quest_participants::status.eq(participant_status::VERIFIED))
            .filter(quest_participants::settlement_status.eq(from)),
    )
    .set((
        quest_participants::settlement_status.eq(to),
        quest_participants::settlement_tx.eq(tx_handle),
        quest_participants::settlement_error.eq(error),
        quest_participants::updated_at.eq(&now),
    ))
    .execute(conn)?;

    Ok(rows == 1)
}
