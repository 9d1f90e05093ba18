use async_trait::async_trait;
use resumer_traits::{ClaimOutcome, OwnershipDirectory, OwnershipRecord, Result};
use std::time::Duration;

/// Directory for a single replica. Every claim succeeds and nothing is ever
/// owned elsewhere, so requests are always served locally.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDirectory;

#[async_trait]
impl OwnershipDirectory for NoopDirectory {
    fn available(&self) -> bool {
        false
    }

    async fn claim(&self, _: &str, _: &str, _: Duration) -> Result<ClaimOutcome> {
        Ok(ClaimOutcome::Claimed)
    }

    async fn refresh(&self, _: &str, _: &str, _: Duration) -> Result<bool> {
        Ok(true)
    }

    async fn lookup(&self, _: &str) -> Result<Option<OwnershipRecord>> {
        Ok(None)
    }

    async fn release(&self, _: &str, _: &str) -> Result<bool> {
        Ok(true)
    }
}
