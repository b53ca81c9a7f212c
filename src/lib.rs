//! Elohim Quests - group quest lifecycle and reward settlement
//!
//! Members of a group create quests; other members join, complete and
//! are verified by the quest creator. Verification grants milestone
//! achievements and triggers a reward transfer on an external ledger.
//!
//! ## Architecture
//!
//! - **Membership oracle**: answers "is user U in group G" (HTTP or static)
//! - **Quest store**: SQLite via diesel; every lifecycle step is one transaction
//! - **Settlement dispatcher**: pays verified participants after commit
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/elohim-quests/
//! ├── quests.db              # Quests, participants, achievements, activities, wallets
//! └── config.toml            # Configuration
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod services;

// Re-exports
pub use config::Config;
pub use db::QuestDb;
pub use error::QuestError;
pub use http::HttpServer;
pub use services::{QuestService, Services, SettlementDispatcher};
