//! Group membership oracle
//!
//! Membership lives in another service. The engine asks before every
//! lifecycle operation and does not hold the answer across its own
//! transaction; a member removed between the check and the write can
//! complete one more action.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::QuestError;

/// Answers "is user U a member of group G?"
#[async_trait::async_trait]
pub trait MembershipOracle: Send + Sync {
    async fn is_member(&self, group_id: &str, user_id: &str) -> Result<bool, QuestError>;
}

// ============================================================================
// In-memory oracle
// ============================================================================

/// Static membership table, seeded from config or tests
#[derive(Default)]
pub struct StaticMembership {
    groups: HashMap<String, HashSet<String>>,
}

impl StaticMembership {
    /// Build from a group -> members map
    pub fn from_groups(groups: &HashMap<String, Vec<String>>) -> Self {
        Self {
            groups: groups
                .iter()
                .map(|(group, members)| (group.clone(), members.iter().cloned().collect()))
                .collect(),
        }
    }
}

#[async_trait::async_trait]
impl MembershipOracle for StaticMembership {
    async fn is_member(&self, group_id: &str, user_id: &str) -> Result<bool, QuestError> {
        Ok(self
            .groups
            .get(group_id)
            .map(|members| members.contains(user_id))
            .unwrap_or(false))
    }
}

// ============================================================================
// HTTP oracle
// ============================================================================

/// Membership service client.
///
/// `GET {base}/groups/{group}/members/{user}`: 2xx means member, 404 means
/// not a member, anything else is an outage.
pub struct HttpMembershipOracle {
    base_url: String,
    client: reqwest::Client,
}

impl HttpMembershipOracle {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, QuestError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| QuestError::Config(format!("Failed to build membership client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait::async_trait]
impl MembershipOracle for HttpMembershipOracle {
    async fn is_member(&self, group_id: &str, user_id: &str) -> Result<bool, QuestError> {
        let url = format!("{}/groups/{}/members/{}", self.base_url, group_id, user_id);
        debug!(url = %url, "Checking group membership");

        let response = self.client.get(&url).send().await.map_err(|e| {
            warn!(group_id = %group_id, error = %e, "Membership request failed");
            QuestError::MembershipUnavailable(e.to_string())
        })?;

        match response.status() {
            s if s.is_success() => Ok(true),
            reqwest::StatusCode::NOT_FOUND => Ok(false),
            s => Err(QuestError::MembershipUnavailable(format!(
                "membership service returned {}",
                s
            ))),
        }
    }
}
