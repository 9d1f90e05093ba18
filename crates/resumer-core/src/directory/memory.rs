use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use resumer_traits::{ClaimOutcome, OwnershipDirectory, OwnershipRecord, Result, same_address};
use std::time::{Duration, Instant};
use tracing::debug;

/// Expiry used when `now + ttl` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

fn expiry(ttl: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(ttl)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

struct ClaimEntry {
    owner_address: String,
    expires_at: Instant,
    last_updated: DateTime<Utc>,
}

impl ClaimEntry {
    fn new(owner_address: &str, ttl: Duration) -> Self {
        Self {
            owner_address: owner_address.to_string(),
            expires_at: expiry(ttl),
            last_updated: Utc::now(),
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    fn extend(&mut self, ttl: Duration) {
        self.expires_at = expiry(ttl);
        self.last_updated = Utc::now();
    }
}

/// Process-local directory with per-claim expiry.
///
/// Expired claims read as absent immediately and are physically removed by
/// [`InMemoryDirectory::purge_expired`].
#[derive(Default)]
pub struct InMemoryDirectory {
    claims: DashMap<String, ClaimEntry>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired claims. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.claims.len();
        self.claims.retain(|_, claim| !claim.is_expired());
        let removed = before.saturating_sub(self.claims.len());
        if removed > 0 {
            debug!(removed, "Purged expired ownership claims");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }
}

#[async_trait]
impl OwnershipDirectory for InMemoryDirectory {
    async fn claim(
        &self,
        conversation_id: &str,
        owner_address: &str,
        ttl: Duration,
    ) -> Result<ClaimOutcome> {
        match self.claims.entry(conversation_id.to_string()) {
            Entry::Occupied(mut entry) => {
                let current = entry.get();
                if current.is_expired() || same_address(&current.owner_address, owner_address) {
                    entry.insert(ClaimEntry::new(owner_address, ttl));
                    Ok(ClaimOutcome::Claimed)
                } else {
                    Ok(ClaimOutcome::Conflict {
                        owner_address: current.owner_address.clone(),
                    })
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(ClaimEntry::new(owner_address, ttl));
                Ok(ClaimOutcome::Claimed)
            }
        }
    }

    async fn refresh(
        &self,
        conversation_id: &str,
        owner_address: &str,
        ttl: Duration,
    ) -> Result<bool> {
        let Some(mut claim) = self.claims.get_mut(conversation_id) else {
            return Ok(false);
        };
        if claim.is_expired() || !same_address(&claim.owner_address, owner_address) {
            return Ok(false);
        }
        claim.extend(ttl);
        Ok(true)
    }

    async fn lookup(&self, conversation_id: &str) -> Result<Option<OwnershipRecord>> {
        Ok(self
            .claims
            .get(conversation_id)
            .filter(|claim| !claim.is_expired())
            .map(|claim| OwnershipRecord {
                conversation_id: conversation_id.to_string(),
                owner_address: claim.owner_address.clone(),
                active: true,
                last_updated: claim.last_updated,
            }))
    }

    async fn release(&self, conversation_id: &str, owner_address: &str) -> Result<bool> {
        Ok(self
            .claims
            .remove_if(conversation_id, |_, claim| {
                same_address(&claim.owner_address, owner_address)
            })
            .is_some())
    }
}
