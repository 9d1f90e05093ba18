//! Ownership directory abstraction.
//!
//! The directory is the only state shared between replicas. It maps a
//! conversation id to the advertised address of the replica currently
//! recording it. Claims carry a TTL and must be refreshed by the owner;
//! an unrefreshed claim reads as absent once it expires, which is how a
//! crashed owner is forgotten.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;

/// Who is recording a conversation right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipRecord {
    pub conversation_id: String,
    pub owner_address: String,
    pub active: bool,
    pub last_updated: DateTime<Utc>,
}

/// Result of an atomic claim-if-absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ClaimOutcome {
    Claimed,
    Conflict { owner_address: String },
}

impl ClaimOutcome {
    pub fn is_claimed(&self) -> bool {
        matches!(self, ClaimOutcome::Claimed)
    }
}

#[async_trait]
pub trait OwnershipDirectory: Send + Sync {
    /// Whether the directory is shared with other replicas. A directory that
    /// is not available never produces redirects.
    fn available(&self) -> bool {
        true
    }

    /// Claim the conversation for `owner_address`. Succeeds when there is no
    /// unexpired claim or the existing claim already belongs to the same
    /// address (which refreshes it).
    async fn claim(
        &self,
        conversation_id: &str,
        owner_address: &str,
        ttl: Duration,
    ) -> Result<ClaimOutcome>;

    /// Extend a claim held by `owner_address`. Returns `false` when the claim
    /// expired or belongs to someone else.
    async fn refresh(&self, conversation_id: &str, owner_address: &str, ttl: Duration)
    -> Result<bool>;

    /// Current unexpired owner, if any.
    async fn lookup(&self, conversation_id: &str) -> Result<Option<OwnershipRecord>>;

    /// Clear the claim if it is still held by `owner_address`.
    async fn release(&self, conversation_id: &str, owner_address: &str) -> Result<bool>;
}
