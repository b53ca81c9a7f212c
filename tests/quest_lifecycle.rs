//! Quest lifecycle integration tests
//!
//! Runs the engine against a file-backed SQLite database so concurrent
//! operations contend on the real write lock.
//!
//! Run with: cargo test --test quest_lifecycle

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use elohim_quests::db::quests::CreateQuestInput;
use elohim_quests::db::models::Participant;
use elohim_quests::db::{activities, participants};
use elohim_quests::services::ledger::{LedgerError, RewardLedger, TransferReceipt};
use elohim_quests::services::{SettlementOutcome, StaticMembership};
use elohim_quests::{Config, QuestDb, QuestError, Services};
use diesel::connection::SimpleConnection;
use tempfile::TempDir;

/// Ledger double that records every transfer.
/// With `ack_delay` set it records first and answers late.
#[derive(Default)]
struct RecordingLedger {
    transfers: Mutex<Vec<(String, i64, String)>>,
    fail: bool,
    ack_delay: Option<Duration>,
}

impl RecordingLedger {
    fn transfers(&self) -> Vec<(String, i64, String)> {
        self.transfers.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl RewardLedger for RecordingLedger {
    async fn transfer(
        &self,
        destination: &str,
        amount: i64,
        currency: &str,
    ) -> Result<TransferReceipt, LedgerError> {
        self.transfers
            .lock()
            .unwrap()
            .push((destination.to_string(), amount, currency.to_string()));
        if let Some(delay) = self.ack_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(LedgerError::Unreachable("connection refused".into()));
        }
        Ok(TransferReceipt {
            tx_handle: format!("0xtx{}", self.transfers.lock().unwrap().len()),
        })
    }
}

struct Harness {
    _dir: TempDir,
    db: QuestDb,
    services: Services,
    ledger: Arc<RecordingLedger>,
}

const MEMBERS: &[&str] = &["carol", "alice", "bob", "dave", "erin", "frank", "grace", "heidi"];

fn harness(ledger: RecordingLedger) -> Harness {
    harness_with(ledger, |_| {})
}

fn harness_with(ledger: RecordingLedger, tune: impl FnOnce(&mut Config)) -> Harness {
    let dir = TempDir::new().unwrap();

    let mut config = Config::default();
    config.storage_dir = dir.path().to_path_buf();
    config.settlement_in_background = false;
    config.settlement_timeout_secs = 2;
    tune(&mut config);

    let mut groups = HashMap::new();
    groups.insert("hikers".to_string(), MEMBERS.iter().map(|m| m.to_string()).collect());
    groups.insert("cyclists".to_string(), vec!["mallory".to_string()]);

    let db = QuestDb::open(&config.database_path(), 8, Duration::from_secs(10)).unwrap();
    let ledger = Arc::new(ledger);
    let services = Services::new(
        &config,
        db.clone(),
        Arc::new(StaticMembership::from_groups(&groups)),
        ledger.clone(),
    );

    Harness { _dir: dir, db, services, ledger }
}

fn quest_input(reward: i64) -> CreateQuestInput {
    CreateQuestInput {
        title: "Sunrise summit".into(),
        description: Some("Reach the top before 7am".into()),
        reward_amount: reward,
        reward_currency: None,
        category: "location_based".into(),
        expires_at: "2999-01-01T00:00:00Z".into(),
    }
}

fn activity_count(db: &QuestDb, user: &str, activity_type: &str) -> i64 {
    db.with_conn(|conn| activities::count_for_user(conn, user, activity_type))
        .unwrap()
}

fn participant_row(db: &QuestDb, quest_id: &str, user: &str) -> Option<Participant> {
    db.with_conn(|conn| participants::get_participant(conn, quest_id, user))
        .unwrap()
}

/// Create a quest and bring `alice` to `submitted`
async fn submitted_quest(h: &Harness, reward: i64) -> String {
    let quests = &h.services.quests;
    let quest = quests.create_quest("hikers", "carol", quest_input(reward)).await.unwrap();
    quests.join("hikers", &quest.id, "alice").await.unwrap();
    quests.complete("hikers", &quest.id, "alice").await.unwrap();
    quest.id
}

#[tokio::test]
async fn test_verify_scenario() {
    let h = harness(RecordingLedger::default());
    let quests = &h.services.quests;

    let quest = quests.create_quest("hikers", "carol", quest_input(100)).await.unwrap();
    quests.set_wallet("alice", "0xalice").await.unwrap();

    let joined = quests.join("hikers", &quest.id, "alice").await.unwrap();
    assert_eq!(joined.status, "joined");
    let submitted = quests.complete("hikers", &quest.id, "alice").await.unwrap();
    assert_eq!(submitted.status, "submitted");

    let result = quests.verify("hikers", &quest.id, "alice", "carol").await.unwrap();
    assert_eq!(result.participant.status, "verified");
    assert_eq!(result.achievements_granted, vec![1]);
    assert!(matches!(result.settlement, SettlementOutcome::Sent { .. }));

    assert_eq!(activity_count(&h.db, "alice", "quest_verified"), 1);
    assert_eq!(quests.achievements("alice").await.unwrap().len(), 1);
    assert_eq!(
        h.ledger.transfers(),
        vec![("0xalice".to_string(), 100, "ETH".to_string())]
    );

    let row = h
        .db
        .with_conn(|conn| participants::get_participant(conn, &quest.id, "alice"))
        .unwrap()
        .unwrap();
    assert_eq!(row.settlement_status.as_deref(), Some("sent"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_joins_admit_exactly_one() {
    let h = harness(RecordingLedger::default());
    let quest = h.services.quests.create_quest("hikers", "carol", quest_input(10)).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let quests = h.services.quests.clone();
        let quest_id = quest.id.clone();
        handles.push(tokio::spawn(async move { quests.join("hikers", &quest_id, "alice").await }));
    }

    let mut joined = 0;
    let mut already = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => joined += 1,
            Err(QuestError::AlreadyJoined) => already += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(joined, 1);
    assert_eq!(already, 7);
    assert_eq!(activity_count(&h.db, "alice", "quest_joined"), 1);
}

#[tokio::test]
async fn test_creator_cannot_join_own_quest() {
    let h = harness(RecordingLedger::default());
    let quests = &h.services.quests;
    let quest = quests.create_quest("hikers", "carol", quest_input(10)).await.unwrap();

    let err = quests.join("hikers", &quest.id, "carol").await.unwrap_err();
    assert_eq!(err.code(), "CANNOT_JOIN_OWN_QUEST");
    assert!(quests.list_participants("hikers", &quest.id, "carol").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_complete_twice() {
    let h = harness(RecordingLedger::default());
    let quests = &h.services.quests;
    let quest = quests.create_quest("hikers", "carol", quest_input(10)).await.unwrap();

    let err = quests.complete("hikers", &quest.id, "alice").await.unwrap_err();
    assert_eq!(err.code(), "NOT_A_PARTICIPANT");

    quests.join("hikers", &quest.id, "alice").await.unwrap();
    quests.complete("hikers", &quest.id, "alice").await.unwrap();
    let err = quests.complete("hikers", &quest.id, "alice").await.unwrap_err();
    assert_eq!(err.code(), "ALREADY_SUBMITTED");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_verifies_apply_once() {
    let h = harness(RecordingLedger::default());
    let quests = &h.services.quests;
    let quest = quests.create_quest("hikers", "carol", quest_input(50)).await.unwrap();
    quests.set_wallet("alice", "0xalice").await.unwrap();
    quests.join("hikers", &quest.id, "alice").await.unwrap();
    quests.complete("hikers", &quest.id, "alice").await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..6 {
        let quests = h.services.quests.clone();
        let quest_id = quest.id.clone();
        handles.push(tokio::spawn(async move {
            quests.verify("hikers", &quest_id, "alice", "carol").await
        }));
    }

    let mut verified = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => verified += 1,
            Err(QuestError::InvalidStatus { current }) => {
                assert_eq!(current, "verified");
                rejected += 1;
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(verified, 1);
    assert_eq!(rejected, 5);
    assert_eq!(activity_count(&h.db, "alice", "quest_verified"), 1);
    assert_eq!(quests.achievements("alice").await.unwrap().len(), 1);
    assert_eq!(h.ledger.transfers().len(), 1);
}

#[tokio::test]
async fn test_first_quest_achievement_granted_once() {
    let h = harness(RecordingLedger::default());
    let quests = &h.services.quests;

    for _ in 0..2 {
        let quest = quests.create_quest("hikers", "carol", quest_input(10)).await.unwrap();
        quests.join("hikers", &quest.id, "alice").await.unwrap();
        quests.complete("hikers", &quest.id, "alice").await.unwrap();
        quests.verify("hikers", &quest.id, "alice", "carol").await.unwrap();
    }

    let grants = quests.achievements("alice").await.unwrap();
    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0].achievement_id, 1);
    assert_eq!(activity_count(&h.db, "alice", "quest_verified"), 2);
    assert_eq!(activity_count(&h.db, "alice", "achievement_granted"), 1);
}

#[tokio::test]
async fn test_ledger_failure_keeps_verification() {
    let h = harness(RecordingLedger {
        fail: true,
        ..Default::default()
    });
    let quests = &h.services.quests;
    let quest = quests.create_quest("hikers", "carol", quest_input(100)).await.unwrap();
    quests.set_wallet("alice", "0xalice").await.unwrap();
    quests.join("hikers", &quest.id, "alice").await.unwrap();
    quests.complete("hikers", &quest.id, "alice").await.unwrap();

    let result = quests.verify("hikers", &quest.id, "alice", "carol").await.unwrap();
    assert!(matches!(result.settlement, SettlementOutcome::Failed { .. }));

    let row = h
        .db
        .with_conn(|conn| participants::get_participant(conn, &quest.id, "alice"))
        .unwrap()
        .unwrap();
    assert_eq!(row.status, "verified");
    assert_eq!(row.settlement_status.as_deref(), Some("failed"));
    assert_eq!(activity_count(&h.db, "alice", "quest_verified"), 1);
    assert_eq!(quests.achievements("alice").await.unwrap().len(), 1);

    // Retry reopens the failed settlement and attempts the transfer again
    let retried = quests
        .retry_settlement("hikers", &quest.id, "alice", "carol")
        .await
        .unwrap();
    assert!(matches!(retried, SettlementOutcome::Failed { .. }));
    assert_eq!(h.ledger.transfers().len(), 2);
}

#[tokio::test]
async fn test_self_verify_is_forbidden() {
    let h = harness(RecordingLedger::default());
    let quests = &h.services.quests;
    let quest = quests.create_quest("hikers", "carol", quest_input(10)).await.unwrap();
    quests.join("hikers", &quest.id, "alice").await.unwrap();
    quests.complete("hikers", &quest.id, "alice").await.unwrap();

    let err = quests.verify("hikers", &quest.id, "alice", "alice").await.unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");

    let row = h
        .db
        .with_conn(|conn| participants::get_participant(conn, &quest.id, "alice"))
        .unwrap()
        .unwrap();
    assert_eq!(row.status, "submitted");
    assert_eq!(activity_count(&h.db, "alice", "quest_verified"), 0);
    assert!(quests.achievements("alice").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_non_member_is_forbidden() {
    let h = harness(RecordingLedger::default());
    let quests = &h.services.quests;
    let quest = quests.create_quest("hikers", "carol", quest_input(10)).await.unwrap();

    let err = quests.join("hikers", &quest.id, "mallory").await.unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");

    let err = quests
        .create_quest("cyclists", "carol", quest_input(10))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");

    // A quest is only addressable through its own group
    let err = quests.get_quest("cyclists", &quest.id, "mallory").await.unwrap_err();
    assert_eq!(err.code(), "QUEST_NOT_FOUND");
}

#[tokio::test]
async fn test_verify_error_taxonomy() {
    let h = harness(RecordingLedger::default());
    let quests = &h.services.quests;
    let quest = quests.create_quest("hikers", "carol", quest_input(10)).await.unwrap();

    let err = quests.verify("hikers", "no-such-quest", "alice", "carol").await.unwrap_err();
    assert_eq!(err.code(), "QUEST_NOT_FOUND");

    let err = quests.verify("hikers", &quest.id, "alice", "carol").await.unwrap_err();
    assert_eq!(err.code(), "PARTICIPANT_NOT_FOUND");

    quests.join("hikers", &quest.id, "alice").await.unwrap();
    let err = quests.verify("hikers", &quest.id, "alice", "carol").await.unwrap_err();
    assert_eq!(err.code(), "INVALID_STATUS");
}

#[tokio::test]
async fn test_quest_management() {
    let h = harness(RecordingLedger::default());
    let quests = &h.services.quests;

    let mut bad = quest_input(10);
    bad.expires_at = "2001-01-01T00:00:00Z".into();
    assert_eq!(
        quests.create_quest("hikers", "carol", bad).await.unwrap_err().code(),
        "INVALID_INPUT"
    );

    let quest = quests.create_quest("hikers", "carol", quest_input(10)).await.unwrap();
    assert_eq!(quest.status, "active");
    assert_eq!(quest.reward_currency, "ETH");

    let listed = quests
        .list_quests("hikers", "alice", Default::default())
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);

    let err = quests
        .delete_quest("hikers", &quest.id, "alice")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");

    quests.join("hikers", &quest.id, "alice").await.unwrap();
    quests.delete_quest("hikers", &quest.id, "carol").await.unwrap();
    assert_eq!(
        quests.get_quest("hikers", &quest.id, "alice").await.unwrap_err().code(),
        "QUEST_NOT_FOUND"
    );
}

#[tokio::test]
async fn test_late_ledger_ack_is_never_resent() {
    let h = harness_with(
        RecordingLedger {
            ack_delay: Some(Duration::from_secs(3)),
            ..Default::default()
        },
        |config| config.settlement_timeout_secs = 1,
    );
    let quests = &h.services.quests;
    quests.set_wallet("alice", "0xalice").await.unwrap();
    let quest_id = submitted_quest(&h, 100).await;

    let result = quests.verify("hikers", &quest_id, "alice", "carol").await.unwrap();
    assert!(matches!(result.settlement, SettlementOutcome::Unknown { .. }));
    assert_eq!(
        participant_row(&h.db, &quest_id, "alice").unwrap().settlement_status.as_deref(),
        Some("unknown")
    );

    // The first transfer may have landed; a retry must not send another
    let err = quests
        .retry_settlement("hikers", &quest_id, "alice", "carol")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_STATUS");
    assert_eq!(h.ledger.transfers().len(), 1);
}

#[tokio::test]
async fn test_delete_keeps_unpaid_settlements() {
    let h = harness(RecordingLedger {
        fail: true,
        ..Default::default()
    });
    let quests = &h.services.quests;
    quests.set_wallet("alice", "0xalice").await.unwrap();
    let quest_id = submitted_quest(&h, 100).await;

    let result = quests.verify("hikers", &quest_id, "alice", "carol").await.unwrap();
    assert!(matches!(result.settlement, SettlementOutcome::Failed { .. }));

    let err = quests.delete_quest("hikers", &quest_id, "carol").await.unwrap_err();
    assert_eq!(err.code(), "INVALID_STATUS");
    let row = participant_row(&h.db, &quest_id, "alice").unwrap();
    assert_eq!(row.settlement_status.as_deref(), Some("failed"));
    quests.get_quest("hikers", &quest_id, "carol").await.unwrap();

    // Nothing owed (no wallet for bob): the quest can go
    let quest = quests.create_quest("hikers", "carol", quest_input(100)).await.unwrap();
    quests.join("hikers", &quest.id, "bob").await.unwrap();
    quests.complete("hikers", &quest.id, "bob").await.unwrap();
    let result = quests.verify("hikers", &quest.id, "bob", "carol").await.unwrap();
    assert!(matches!(result.settlement, SettlementOutcome::Skipped { .. }));
    quests.delete_quest("hikers", &quest.id, "carol").await.unwrap();
    assert!(participant_row(&h.db, &quest.id, "bob").is_none());
}

#[tokio::test]
async fn test_verify_rolls_back_when_recording_fails() {
    let h = harness(RecordingLedger::default());
    let quests = &h.services.quests;
    let quest_id = submitted_quest(&h, 100).await;

    // Break the activity log partway through the verify transaction,
    // after the status change and the achievement grant
    h.db.with_conn(|conn| {
        Ok(conn.batch_execute(
            "CREATE TRIGGER reject_achievement_activity BEFORE INSERT ON user_activities \
             WHEN NEW.activity_type = 'achievement_granted' \
             BEGIN SELECT RAISE(ABORT, 'activity log unavailable'); END;",
        )?)
    })
    .unwrap();

    let err = quests.verify("hikers", &quest_id, "alice", "carol").await.unwrap_err();
    assert_eq!(err.code(), "INTERNAL_ERROR");

    let row = participant_row(&h.db, &quest_id, "alice").unwrap();
    assert_eq!(row.status, "submitted");
    assert_eq!(row.settlement_status, None);
    assert_eq!(activity_count(&h.db, "alice", "quest_verified"), 0);
    assert!(quests.achievements("alice").await.unwrap().is_empty());
    assert!(h.ledger.transfers().is_empty());
}

#[tokio::test]
async fn test_background_settlement() {
    let h = harness_with(RecordingLedger::default(), |config| {
        config.settlement_in_background = true;
    });
    let quests = &h.services.quests;
    quests.set_wallet("alice", "0xalice").await.unwrap();
    let quest_id = submitted_quest(&h, 100).await;

    let result = quests.verify("hikers", &quest_id, "alice", "carol").await.unwrap();
    assert_eq!(result.settlement, SettlementOutcome::Pending);

    let mut status = None;
    for _ in 0..50 {
        status = participant_row(&h.db, &quest_id, "alice").unwrap().settlement_status;
        if status.as_deref() == Some("sent") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    assert_eq!(status.as_deref(), Some("sent"));
    assert_eq!(
        h.ledger.transfers(),
        vec![("0xalice".to_string(), 100, "ETH".to_string())]
    );
}
