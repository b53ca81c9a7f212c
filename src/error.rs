//! Error types for elohim-quests
//!
//! `QuestError` is the closed set of conditions a lifecycle operation can
//! report. Each variant carries a stable machine tag (`code()`) so the HTTP
//! layer maps kinds to status codes without inspecting message text.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum QuestError {
    #[error("Quest not found")]
    QuestNotFound,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Already joined this quest")]
    AlreadyJoined,

    #[error("Quest already submitted")]
    AlreadySubmitted,

    #[error("Cannot join your own quest")]
    CannotJoinOwnQuest,

    #[error("Invalid status for this operation: {current}")]
    InvalidStatus { current: String },

    #[error("Participant not found")]
    ParticipantNotFound,

    #[error("Not a participant of this quest")]
    NotAParticipant,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Authentication required")]
    Unauthenticated,

    #[error("Membership service unavailable: {0}")]
    MembershipUnavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl QuestError {
    /// Stable machine-readable tag for API consumers
    pub fn code(&self) -> &'static str {
        match self {
            QuestError::QuestNotFound => "QUEST_NOT_FOUND",
            QuestError::Forbidden(_) => "FORBIDDEN",
            QuestError::AlreadyJoined => "ALREADY_JOINED",
            QuestError::AlreadySubmitted => "ALREADY_SUBMITTED",
            QuestError::CannotJoinOwnQuest => "CANNOT_JOIN_OWN_QUEST",
            QuestError::InvalidStatus { .. } => "INVALID_STATUS",
            QuestError::ParticipantNotFound => "PARTICIPANT_NOT_FOUND",
            QuestError::NotAParticipant => "NOT_A_PARTICIPANT",
            QuestError::InvalidInput(_) => "INVALID_INPUT",
            QuestError::Unauthenticated => "UNAUTHENTICATED",
            QuestError::MembershipUnavailable(_) => "MEMBERSHIP_UNAVAILABLE",
            _ => "INTERNAL_ERROR",
        }
    }

    /// Whether this error is an expected domain outcome rather than a fault
    pub fn is_domain(&self) -> bool {
        self.code() != "INTERNAL_ERROR"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(QuestError::AlreadyJoined.code(), "ALREADY_JOINED");
        assert_eq!(
            QuestError::InvalidStatus { current: "verified".into() }.code(),
            "INVALID_STATUS"
        );
        assert_eq!(QuestError::Internal("boom".into()).code(), "INTERNAL_ERROR");
    }

    #[test]
    fn test_store_errors_are_not_domain() {
        let err = QuestError::Database(diesel::result::Error::NotFound);
        assert!(!err.is_domain());
        assert!(QuestError::Forbidden("not creator".into()).is_domain());
    }
}
