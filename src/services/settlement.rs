//! Settlement dispatcher
//!
//! Pays a verified participation through the external ledger, strictly
//! after the verify transaction has committed. Nothing here returns an
//! error to the verifier: every failure ends as a logged, durable
//! settlement status that an operator can retry.
//!
//! ## Settlement status flow
//!
//! ```text
//! pending ──(no wallet / zero reward)──▶ skipped
//!    │
//!    └──claim──▶ in_flight ──ok──▶ sent
//!                    │
//!                    ├──rejected──▶ failed ──retry──▶ pending
//!                    │
//!                    └──timeout / lost response──▶ unknown
//! ```
//!
//! Each arrow is a conditional write on the current status, so two
//! dispatchers racing for the same row cannot both reach the ledger.
//! Only `failed` can be reopened. An `unknown` row, or one left
//! `in_flight` by a crash, may already have been paid and needs operator
//! reconciliation against the ledger.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::events::{EventBus, QuestEvent};
use super::ledger::{LedgerError, RewardLedger};
use crate::db::models::{settlement_status, Participant, Quest};
use crate::db::{participants, quests, wallets, QuestDb};
use crate::error::QuestError;

/// One payable verification
#[derive(Debug, Clone)]
pub struct SettlementJob {
    pub quest_id: String,
    pub user_id: String,
    pub amount: i64,
    pub currency: String,
}

impl SettlementJob {
    pub fn new(quest: &Quest, participant: &Participant) -> Self {
        Self {
            quest_id: quest.id.clone(),
            user_id: participant.user_id.clone(),
            amount: quest.reward_amount,
            currency: quest.reward_currency.clone(),
        }
    }
}

/// What happened to a settlement attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SettlementOutcome {
    /// Handed to a background task
    Pending,
    /// Transfer accepted by the ledger
    Sent { tx_handle: String },
    /// Ledger refused or was never reached; row is `failed`
    Failed { reason: String },
    /// Transfer may have landed; row is `unknown`
    Unknown { reason: String },
    /// Nothing payable; row is `skipped`
    Skipped { reason: String },
    /// Another dispatcher already owns this row
    AlreadyClaimed,
    /// Store unavailable before the ledger was called; row stays `pending`
    Deferred { reason: String },
}

/// Post-commit reward dispatcher
pub struct SettlementDispatcher {
    db: QuestDb,
    ledger: Arc<dyn RewardLedger>,
    events: Arc<EventBus>,
    timeout: Duration,
}

impl SettlementDispatcher {
    pub fn new(
        db: QuestDb,
        ledger: Arc<dyn RewardLedger>,
        events: Arc<EventBus>,
        timeout: Duration,
    ) -> Self {
        Self {
            db,
            ledger,
            events,
            timeout,
        }
    }

    /// Run the dispatch on a background task
    pub fn spawn(self: &Arc<Self>, job: SettlementJob) -> tokio::task::JoinHandle<SettlementOutcome> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move { dispatcher.dispatch(job).await })
    }

    /// Attempt the transfer for a `pending` verification
    pub async fn dispatch(&self, job: SettlementJob) -> SettlementOutcome {
        let user_id = job.user_id.clone();
        let wallet = match self.db.run(move |conn| wallets::get_wallet(conn, &user_id)).await {
            Ok(wallet) => wallet,
            Err(e) => return self.defer(&job, e),
        };

        let destination = match wallet {
            None => return self.skip(&job, "no wallet address").await,
            Some(_) if job.amount == 0 => return self.skip(&job, "zero reward").await,
            Some(wallet) => wallet.address,
        };

        match self
            .transition(&job, settlement_status::PENDING, settlement_status::IN_FLIGHT, None, None)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!(quest_id = %job.quest_id, user_id = %job.user_id, "Settlement already claimed");
                return SettlementOutcome::AlreadyClaimed;
            }
            Err(e) => return self.defer(&job, e),
        }

        info!(
            quest_id = %job.quest_id,
            user_id = %job.user_id,
            amount = job.amount,
            currency = %job.currency,
            "Dispatching reward transfer"
        );

        let result = match tokio::time::timeout(
            self.timeout,
            self.ledger.transfer(&destination, job.amount, &job.currency),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(LedgerError::Timeout(self.timeout)),
        };

        match result {
            Ok(receipt) => {
                match self
                    .transition(
                        &job,
                        settlement_status::IN_FLIGHT,
                        settlement_status::SENT,
                        Some(receipt.tx_handle.clone()),
                        None,
                    )
                    .await
                {
                    Ok(true) => {}
                    // The money moved; the row stays as it is for manual reconciliation
                    Ok(false) => error!(
                        quest_id = %job.quest_id,
                        user_id = %job.user_id,
                        tx = %receipt.tx_handle,
                        "Transfer succeeded but the settlement row was no longer in flight"
                    ),
                    Err(e) => error!(
                        quest_id = %job.quest_id,
                        user_id = %job.user_id,
                        tx = %receipt.tx_handle,
                        error = %e,
                        "Transfer succeeded but settlement status could not be recorded"
                    ),
                }

                self.events.emit(QuestEvent::SettlementSent {
                    quest_id: job.quest_id.clone(),
                    user_id: job.user_id.clone(),
                    amount: job.amount,
                    tx_handle: receipt.tx_handle.clone(),
                });

                SettlementOutcome::Sent { tx_handle: receipt.tx_handle }
            }
            Err(ledger_error) if ledger_error.is_definite() => {
                let reason = ledger_error.to_string();
                warn!(
                    quest_id = %job.quest_id,
                    user_id = %job.user_id,
                    amount = job.amount,
                    reason = %reason,
                    "Reward transfer failed"
                );

                self.record_unpaid(&job, settlement_status::FAILED, &reason).await;
                self.events.emit(QuestEvent::SettlementFailed {
                    quest_id: job.quest_id.clone(),
                    user_id: job.user_id.clone(),
                    reason: reason.clone(),
                });

                SettlementOutcome::Failed { reason }
            }
            Err(ledger_error) => {
                let reason = ledger_error.to_string();
                error!(
                    quest_id = %job.quest_id,
                    user_id = %job.user_id,
                    amount = job.amount,
                    reason = %reason,
                    "Reward transfer outcome unknown, not retrying"
                );

                self.record_unpaid(&job, settlement_status::UNKNOWN, &reason).await;
                self.events.emit(QuestEvent::SettlementUnknown {
                    quest_id: job.quest_id.clone(),
                    user_id: job.user_id.clone(),
                    reason: reason.clone(),
                });

                SettlementOutcome::Unknown { reason }
            }
        }
    }

    /// Reopen a `failed` settlement. Returns false if it was not failed.
    pub async fn reopen_failed(&self, quest_id: &str, user_id: &str) -> Result<bool, QuestError> {
        let quest_id = quest_id.to_string();
        let user_id = user_id.to_string();
        self.db
            .run(move |conn| {
                participants::transition_settlement(
                    conn,
                    &quest_id,
                    &user_id,
                    settlement_status::FAILED,
                    settlement_status::PENDING,
                    None,
                    None,
                )
            })
            .await
    }

    /// Dispatch every verification still `pending` (e.g. after a restart
    /// between commit and dispatch).
    pub async fn sweep_pending(&self, limit: i64) -> Result<Vec<SettlementOutcome>, QuestError> {
        let jobs = self
            .db
            .run(move |conn| {
                let pending = participants::list_by_settlement_status(conn, settlement_status::PENDING, limit)?;
                let mut jobs = Vec::with_capacity(pending.len());
                for participant in pending {
                    if let Some(quest) = quests::get_quest(conn, &participant.quest_id)? {
                        jobs.push(SettlementJob::new(&quest, &participant));
                    }
                }
                Ok(jobs)
            })
            .await?;

        if !jobs.is_empty() {
            info!(count = jobs.len(), "Sweeping pending settlements");
        }

        let mut outcomes = Vec::with_capacity(jobs.len());
        for job in jobs {
            outcomes.push(self.dispatch(job).await);
        }
        Ok(outcomes)
    }

    async fn skip(&self, job: &SettlementJob, reason: &str) -> SettlementOutcome {
        info!(quest_id = %job.quest_id, user_id = %job.user_id, reason = %reason, "Settlement skipped");

        match self
            .transition(job, settlement_status::PENDING, settlement_status::SKIPPED, None, Some(reason.to_string()))
            .await
        {
            Ok(true) => {
                self.events.emit(QuestEvent::SettlementSkipped {
                    quest_id: job.quest_id.clone(),
                    user_id: job.user_id.clone(),
                    reason: reason.to_string(),
                });
                SettlementOutcome::Skipped { reason: reason.to_string() }
            }
            Ok(false) => SettlementOutcome::AlreadyClaimed,
            Err(e) => self.defer(job, e),
        }
    }

    /// Move an `in_flight` row to `failed` or `unknown`
    async fn record_unpaid(&self, job: &SettlementJob, to: &'static str, reason: &str) {
        match self
            .transition(job, settlement_status::IN_FLIGHT, to, None, Some(reason.to_string()))
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!(
                quest_id = %job.quest_id,
                user_id = %job.user_id,
                status = to,
                "Settlement row was no longer in flight"
            ),
            Err(e) => error!(
                quest_id = %job.quest_id,
                user_id = %job.user_id,
                status = to,
                error = %e,
                "Failed to record settlement outcome"
            ),
        }
    }

    fn defer(&self, job: &SettlementJob, error: QuestError) -> SettlementOutcome {
        error!(
            quest_id = %job.quest_id,
            user_id = %job.user_id,
            error = %error,
            "Settlement deferred, store unavailable"
        );
        SettlementOutcome::Deferred { reason: "store unavailable".to_string() }
    }

    async fn transition(
        &self,
        job: &SettlementJob,
        from: &'static str,
        to: &'static str,
        tx_handle: Option<String>,
        error: Option<String>,
    ) -> Result<bool, QuestError> {
        let quest_id = job.quest_id.clone();
        let user_id = job.user_id.clone();
        self.db
            .run(move |conn| {
                participants::transition_settlement(
                    conn,
                    &quest_id,
                    &user_id,
                    from,
                    to,
                    tx_handle.as_deref(),
                    error.as_deref(),
                )
            })
            .await
    }
}
