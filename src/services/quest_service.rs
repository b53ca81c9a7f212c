//! Quest service - the quest lifecycle engine
//!
//! Every operation follows the same shape:
//!
//! 1. Ask the membership oracle (outside any transaction)
//! 2. Run one short transaction against the quest store
//! 3. After commit, emit events and, for verify, hand off settlement
//!
//! ## Participant state machine
//!
//! | From | Action | To | Guard |
//! |------|--------|----|-------|
//! | (none) | join | joined | unique (quest, user); actor is not the creator |
//! | joined | complete | submitted | status = joined |
//! | submitted | verify | verified | verifier is the creator; status = submitted |

use std::sync::Arc;

use chrono::{DateTime, Utc};
use diesel::Connection;
use serde::Serialize;
use tracing::{debug, info};

use super::achievements;
use super::events::{EventBus, QuestEvent};
use super::membership::MembershipOracle;
use super::settlement::{SettlementDispatcher, SettlementJob, SettlementOutcome};
use crate::db::models::{
    activity_types, participant_status, quest_categories, settlement_status, AchievementGrant,
    ActivityEntry, Participant, Quest, Wallet,
};
use crate::db::quests::{CreateQuestInput, QuestQuery, UpdateQuestInput};
use crate::db::{self, participants, quests, QuestDb};
use crate::error::QuestError;

/// Result of a successful verification
#[derive(Debug, Clone, Serialize)]
pub struct VerifyResult {
    pub participant: Participant,
    pub achievements_granted: Vec<i32>,
    pub settlement: SettlementOutcome,
}

/// Quest lifecycle engine
pub struct QuestService {
    db: QuestDb,
    membership: Arc<dyn MembershipOracle>,
    settlement: Arc<SettlementDispatcher>,
    events: Arc<EventBus>,
    default_currency: String,
    settle_in_background: bool,
}

impl QuestService {
    /// Create a new quest service
    pub fn new(
        db: QuestDb,
        membership: Arc<dyn MembershipOracle>,
        settlement: Arc<SettlementDispatcher>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            db,
            membership,
            settlement,
            events,
            default_currency: "ETH".to_string(),
            settle_in_background: true,
        }
    }

    /// Currency tag for quests that do not name one
    pub fn with_default_currency(mut self, currency: impl Into<String>) -> Self {
        self.default_currency = currency.into();
        self
    }

    /// Await settlement inside verify instead of spawning it
    pub fn with_inline_settlement(mut self) -> Self {
        self.settle_in_background = false;
        self
    }

    // =========================================================================
    // Authorization
    // =========================================================================

    async fn require_member(&self, group_id: &str, user_id: &str) -> Result<(), QuestError> {
        if self.membership.is_member(group_id, user_id).await? {
            Ok(())
        } else {
            debug!(group_id = %group_id, user_id = %user_id, "Membership check failed");
            Err(QuestError::Forbidden("not a member of this group".into()))
        }
    }

    // =========================================================================
    // Quest management
    // =========================================================================

    /// Create an active quest owned by `actor`
    pub async fn create_quest(
        &self,
        group_id: &str,
        actor: &str,
        mut input: CreateQuestInput,
    ) -> Result<Quest, QuestError> {
        self.require_member(group_id, actor).await?;
        self.validate_create(&mut input)?;

        let currency = input
            .reward_currency
            .clone()
            .unwrap_or_else(|| self.default_currency.clone());
        let group = group_id.to_string();
        let creator = actor.to_string();

        let quest = self
            .db
            .run(move |conn| {
                conn.transaction::<_, QuestError, _>(|conn| {
                    let quest = quests::insert_quest(conn, &group, &creator, &input, &currency)?;
                    db::activities::record_activity(
                        conn,
                        &creator,
                        activity_types::QUEST_CREATED,
                        &serde_json::json!({ "quest_id": quest.id, "group_id": group }),
                    )?;
                    Ok(quest)
                })
            })
            .await?;

        info!(quest_id = %quest.id, group_id = %group_id, creator = %actor, reward = quest.reward_amount, "Quest created");
        self.events.emit(QuestEvent::QuestCreated {
            quest_id: quest.id.clone(),
            group_id: quest.group_id.clone(),
            creator_id: quest.creator_id.clone(),
        });

        Ok(quest)
    }

    /// Get a quest of a group
    pub async fn get_quest(&self, group_id: &str, quest_id: &str, actor: &str) -> Result<Quest, QuestError> {
        self.require_member(group_id, actor).await?;
        self.load_quest(group_id, quest_id).await
    }

    /// List quests of a group
    pub async fn list_quests(
        &self,
        group_id: &str,
        actor: &str,
        query: QuestQuery,
    ) -> Result<Vec<Quest>, QuestError> {
        self.require_member(group_id, actor).await?;
        let group = group_id.to_string();
        self.db.run(move |conn| quests::list_quests(conn, &group, &query)).await
    }

    /// Patch a quest; creator only
    pub async fn update_quest(
        &self,
        group_id: &str,
        quest_id: &str,
        actor: &str,
        mut input: UpdateQuestInput,
    ) -> Result<Quest, QuestError> {
        self.require_member(group_id, actor).await?;

        if let Some(ref title) = input.title {
            if title.trim().is_empty() {
                return Err(QuestError::InvalidInput("title must not be empty".into()));
            }
        }
        if let Some(ref expires_at) = input.expires_at {
            input.expires_at = Some(parse_future_timestamp(expires_at)?);
        }

        let (group, quest_id, actor_id) = (group_id.to_string(), quest_id.to_string(), actor.to_string());
        let quest = self
            .db
            .run(move |conn| {
                conn.immediate_transaction::<_, QuestError, _>(|conn| {
                    let quest = quests::get_quest_in_group(conn, &group, &quest_id)?
                        .ok_or(QuestError::QuestNotFound)?;
                    if quest.creator_id != actor_id {
                        return Err(QuestError::Forbidden("only the quest creator can edit it".into()));
                    }
                    quests::update_quest(conn, &quest_id, &input)
                })
            })
            .await?;

        self.events.emit(QuestEvent::QuestUpdated { quest_id: quest.id.clone() });
        Ok(quest)
    }

    /// Delete a quest; creator only
    pub async fn delete_quest(&self, group_id: &str, quest_id: &str, actor: &str) -> Result<(), QuestError> {
        self.require_member(group_id, actor).await?;

        let (group, id, actor_id) = (group_id.to_string(), quest_id.to_string(), actor.to_string());
        self.db
            .run(move |conn| {
                conn.immediate_transaction::<_, QuestError, _>(|conn| {
                    let quest = quests::get_quest_in_group(conn, &group, &id)?
                        .ok_or(QuestError::QuestNotFound)?;
                    if quest.creator_id != actor_id {
                        return Err(QuestError::Forbidden("only the quest creator can delete it".into()));
                    }
                    // Participant rows carry the settlement record; keep them until paid out
                    if let Some(open) = participants::first_unsettled(conn, &quest.id)? {
                        return Err(QuestError::InvalidStatus {
                            current: open.settlement_status.unwrap_or_default(),
                        });
                    }
                    quests::delete_quest(conn, &id)
                })
            })
            .await?;

        info!(quest_id = %quest_id, actor = %actor, "Quest deleted");
        self.events.emit(QuestEvent::QuestDeleted { quest_id: quest_id.to_string() });
        Ok(())
    }

    /// Participants of a quest
    pub async fn list_participants(
        &self,
        group_id: &str,
        quest_id: &str,
        actor: &str,
    ) -> Result<Vec<Participant>, QuestError> {
        self.require_member(group_id, actor).await?;
        let quest = self.load_quest(group_id, quest_id).await?;
        self.db.run(move |conn| participants::list_participants(conn, &quest.id)).await
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Join a quest.
    ///
    /// No pre-check for an existing record: the insert either wins or
    /// fails on the primary key and is reported as `AlreadyJoined`.
    pub async fn join(&self, group_id: &str, quest_id: &str, actor: &str) -> Result<Participant, QuestError> {
        self.require_member(group_id, actor).await?;

        let quest = self.load_quest(group_id, quest_id).await?;
        if quest.creator_id == actor {
            return Err(QuestError::CannotJoinOwnQuest);
        }

        let user = actor.to_string();
        let participant = self
            .db
            .run(move |conn| {
                conn.transaction::<_, QuestError, _>(|conn| {
                    let participant = participants::insert_participant(conn, &quest.id, &user)?;
                    db::activities::record_activity(
                        conn,
                        &user,
                        activity_types::QUEST_JOINED,
                        &serde_json::json!({ "quest_id": quest.id }),
                    )?;
                    Ok(participant)
                })
            })
            .await?;

        info!(quest_id = %quest_id, user_id = %actor, "Participant joined");
        self.events.emit(QuestEvent::ParticipantJoined {
            quest_id: participant.quest_id.clone(),
            user_id: participant.user_id.clone(),
        });

        Ok(participant)
    }

    /// Submit completion: `joined -> submitted`
    pub async fn complete(&self, group_id: &str, quest_id: &str, actor: &str) -> Result<Participant, QuestError> {
        self.require_member(group_id, actor).await?;

        let quest = self.load_quest(group_id, quest_id).await?;
        let user = actor.to_string();
        let participant = self
            .db
            .run(move |conn| {
                conn.transaction::<_, QuestError, _>(|conn| {
                    let participant = participants::mark_submitted(conn, &quest.id, &user)?;
                    db::activities::record_activity(
                        conn,
                        &user,
                        activity_types::QUEST_SUBMITTED,
                        &serde_json::json!({ "quest_id": quest.id }),
                    )?;
                    Ok(participant)
                })
            })
            .await?;

        info!(quest_id = %quest_id, user_id = %actor, "Quest submission received");
        self.events.emit(QuestEvent::SubmissionReceived {
            quest_id: participant.quest_id.clone(),
            user_id: participant.user_id.clone(),
        });

        Ok(participant)
    }

    /// Verify a submission: `submitted -> verified`.
    ///
    /// The status change, activity entry and achievement grants commit
    /// together under the store write lock, or not at all. Settlement runs
    /// after commit and cannot fail this call.
    pub async fn verify(
        &self,
        group_id: &str,
        quest_id: &str,
        participant_id: &str,
        verifier: &str,
    ) -> Result<VerifyResult, QuestError> {
        self.require_member(group_id, verifier).await?;

        let (group, quest_key, user, verifier_id) = (
            group_id.to_string(),
            quest_id.to_string(),
            participant_id.to_string(),
            verifier.to_string(),
        );

        let (quest, participant, granted) = self
            .db
            .run(move |conn| {
                conn.immediate_transaction::<_, QuestError, _>(|conn| {
                    let quest = quests::get_quest_in_group(conn, &group, &quest_key)?
                        .ok_or(QuestError::QuestNotFound)?;
                    if quest.creator_id != verifier_id {
                        return Err(QuestError::Forbidden("only the quest creator can verify".into()));
                    }

                    let locked = participants::lock_participant(conn, &quest.id, &user)?
                        .ok_or(QuestError::ParticipantNotFound)?;
                    if locked.status != participant_status::SUBMITTED {
                        return Err(QuestError::InvalidStatus { current: locked.status });
                    }

                    let participant = participants::mark_verified(conn, &quest.id, &user)?;
                    db::activities::record_activity(
                        conn,
                        &user,
                        activity_types::QUEST_VERIFIED,
                        &serde_json::json!({
                            "quest_id": quest.id,
                            "verified_by": verifier_id,
                            "reward_amount": quest.reward_amount,
                            "reward_currency": quest.reward_currency,
                        }),
                    )?;
                    let granted = achievements::evaluate(conn, &user)?;

                    Ok((quest, participant, granted))
                })
            })
            .await?;

        info!(
            quest_id = %quest.id,
            user_id = %participant.user_id,
            verifier = %verifier,
            achievements = ?granted,
            "Participant verified"
        );

        self.events.emit(QuestEvent::ParticipantVerified {
            quest_id: quest.id.clone(),
            user_id: participant.user_id.clone(),
            verifier_id: verifier.to_string(),
        });
        for achievement_id in &granted {
            self.events.emit(QuestEvent::AchievementGranted {
                user_id: participant.user_id.clone(),
                achievement_id: *achievement_id,
            });
        }

        let settlement = self.settle(SettlementJob::new(&quest, &participant)).await;

        Ok(VerifyResult {
            participant,
            achievements_granted: granted,
            settlement,
        })
    }

    /// Re-attempt a failed settlement; creator only
    pub async fn retry_settlement(
        &self,
        group_id: &str,
        quest_id: &str,
        participant_id: &str,
        actor: &str,
    ) -> Result<SettlementOutcome, QuestError> {
        self.require_member(group_id, actor).await?;

        let quest = self.load_quest(group_id, quest_id).await?;
        if quest.creator_id != actor {
            return Err(QuestError::Forbidden("only the quest creator can retry settlement".into()));
        }

        let (id, user) = (quest.id.clone(), participant_id.to_string());
        let participant = self
            .db
            .run(move |conn| participants::get_participant(conn, &id, &user))
            .await?
            .ok_or(QuestError::ParticipantNotFound)?;

        let current = participant.settlement_status.clone().unwrap_or_default();
        if current != settlement_status::FAILED
            || !self.settlement.reopen_failed(&quest.id, participant_id).await?
        {
            return Err(QuestError::InvalidStatus {
                current: if current.is_empty() { participant.status } else { current },
            });
        }

        info!(quest_id = %quest.id, user_id = %participant_id, "Retrying settlement");
        Ok(self.settle(SettlementJob::new(&quest, &participant)).await)
    }

    async fn settle(&self, job: SettlementJob) -> SettlementOutcome {
        if self.settle_in_background {
            self.settlement.spawn(job);
            SettlementOutcome::Pending
        } else {
            self.settlement.dispatch(job).await
        }
    }

    // =========================================================================
    // User data
    // =========================================================================

    /// Register the caller's reward address
    pub async fn set_wallet(&self, actor: &str, address: &str) -> Result<Wallet, QuestError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(QuestError::InvalidInput("address must not be empty".into()));
        }
        let (user, address) = (actor.to_string(), address.to_string());
        self.db.run(move |conn| db::wallets::set_wallet(conn, &user, &address)).await
    }

    pub async fn achievements(&self, user_id: &str) -> Result<Vec<AchievementGrant>, QuestError> {
        let user = user_id.to_string();
        self.db.run(move |conn| db::achievements::list_for_user(conn, &user)).await
    }

    pub async fn activities(&self, user_id: &str, limit: i64) -> Result<Vec<ActivityEntry>, QuestError> {
        let user = user_id.to_string();
        let limit = limit.clamp(1, 500);
        self.db.run(move |conn| db::activities::list_for_user(conn, &user, limit)).await
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn load_quest(&self, group_id: &str, quest_id: &str) -> Result<Quest, QuestError> {
        let (group, id) = (group_id.to_string(), quest_id.to_string());
        self.db
            .run(move |conn| quests::get_quest_in_group(conn, &group, &id))
            .await?
            .ok_or(QuestError::QuestNotFound)
    }

    fn validate_create(&self, input: &mut CreateQuestInput) -> Result<(), QuestError> {
        input.title = input.title.trim().to_string();
        if input.title.is_empty() {
            return Err(QuestError::InvalidInput("title must not be empty".into()));
        }
        if input.reward_amount < 0 {
            return Err(QuestError::InvalidInput("reward_amount must be non-negative".into()));
        }
        if !quest_categories::is_valid(&input.category) {
            return Err(QuestError::InvalidInput(format!(
                "Invalid category: {}. Valid categories: {:?}",
                input.category,
                quest_categories::ALL
            )));
        }
        if let Some(ref currency) = input.reward_currency {
            if currency.trim().is_empty() {
                return Err(QuestError::InvalidInput("reward_currency must not be empty".into()));
            }
        }
        input.expires_at = parse_future_timestamp(&input.expires_at)?;
        Ok(())
    }
}

/// Parse an RFC 3339 timestamp that must lie strictly in the future;
/// returns it normalized to UTC.
fn parse_future_timestamp(value: &str) -> Result<String, QuestError> {
    let parsed = DateTime::parse_from_rfc3339(value)
        .map_err(|e| QuestError::InvalidInput(format!("expires_at is not RFC 3339: {}", e)))?
        .with_timezone(&Utc);

    if parsed <= Utc::now() {
        return Err(QuestError::InvalidInput("expires_at must be in the future".into()));
    }

    Ok(parsed.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_future_timestamp() {
        assert!(parse_future_timestamp("2999-06-01T12:00:00+02:00")
            .unwrap()
            .starts_with("2999-06-01T10:00:00"));
        assert!(parse_future_timestamp("2001-01-01T00:00:00Z").is_err());
        assert!(parse_future_timestamp("tomorrow").is_err());
    }
}
