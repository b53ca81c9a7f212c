//! Service layer for elohim-quests
//!
//! Services encapsulate business logic between HTTP handlers and repositories.
//!
//! ## Architecture
//!
//! ```text
//! HTTP Handlers (thin)
//!     ↓
//! QuestService (authorization, transactions, events)
//!     ↓                         ↘ after commit
//! Repository Layer (db/*.rs)      SettlementDispatcher → RewardLedger
//!     ↓
//! SQLite Database
//! ```

pub mod achievements;
pub mod events;
pub mod ledger;
pub mod membership;
pub mod quest_service;
pub mod response;
pub mod settlement;

// Re-exports
pub use events::{EventBus, EventListener, QuestEvent};
pub use ledger::{DisabledLedger, HttpRewardLedger, LedgerError, RewardLedger, TransferReceipt};
pub use membership::{HttpMembershipOracle, MembershipOracle, StaticMembership};
pub use quest_service::{QuestService, VerifyResult};
pub use settlement::{SettlementDispatcher, SettlementJob, SettlementOutcome};

use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::db::QuestDb;
use crate::error::QuestError;

/// Service container for dependency injection
///
/// Pass this to HttpServer for handler access.
pub struct Services {
    pub db: QuestDb,
    pub quests: Arc<QuestService>,
    pub settlement: Arc<SettlementDispatcher>,
    pub events: Arc<EventBus>,
}

impl Services {
    /// Wire services from explicit collaborators
    pub fn new(
        config: &Config,
        db: QuestDb,
        membership: Arc<dyn MembershipOracle>,
        ledger: Arc<dyn RewardLedger>,
    ) -> Self {
        let events = Arc::new(EventBus::new());
        let settlement = Arc::new(SettlementDispatcher::new(
            db.clone(),
            ledger,
            events.clone(),
            Duration::from_secs(config.settlement_timeout_secs),
        ));

        let mut quests = QuestService::new(db.clone(), membership, settlement.clone(), events.clone())
            .with_default_currency(config.default_reward_currency.clone());
        if !config.settlement_in_background {
            quests = quests.with_inline_settlement();
        }

        Self {
            db,
            quests: Arc::new(quests),
            settlement,
            events,
        }
    }

    /// Wire services from config: HTTP oracle/ledger when URLs are set,
    /// static membership and a disabled ledger otherwise
    pub fn from_config(config: &Config, db: QuestDb) -> Result<Self, QuestError> {
        let membership: Arc<dyn MembershipOracle> = match config.membership_url {
            Some(ref url) => Arc::new(HttpMembershipOracle::new(url.clone(), Duration::from_secs(5))?),
            None => Arc::new(StaticMembership::from_groups(&config.groups)),
        };

        let ledger: Arc<dyn RewardLedger> = match config.ledger_url {
            Some(ref url) => Arc::new(
                HttpRewardLedger::new(url.clone())
                    .map_err(|e| QuestError::Config(format!("Ledger client: {}", e)))?,
            ),
            None => Arc::new(DisabledLedger),
        };

        Ok(Self::new(config, db, membership, ledger))
    }
}
