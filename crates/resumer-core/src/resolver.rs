use resumer_traits::{RedirectTarget, Result, same_address};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::recorder::Recorder;
use crate::registry::RecorderRegistry;

/// Where a conversation-scoped request should be served.
#[derive(Debug)]
pub enum Route {
    Local(Arc<Recorder>),
    Redirect(RedirectTarget),
    NotActive,
}

/// Decides between serving locally, redirecting to the owner, or reporting
/// that nothing is being recorded.
#[derive(Clone)]
pub struct RedirectResolver {
    registry: Arc<RecorderRegistry>,
}

impl RedirectResolver {
    pub fn new(registry: Arc<RecorderRegistry>) -> Self {
        Self { registry }
    }

    pub async fn resolve(&self, conversation_id: &str) -> Result<Route> {
        if let Some(recorder) = self.registry.active(conversation_id) {
            return Ok(Route::Local(recorder));
        }

        if let Some(target) = self.remote_owner(conversation_id).await? {
            debug!(conversation_id, target = %target, "Redirecting to owner");
            return Ok(Route::Redirect(target));
        }

        // A recording that finished here moments ago can still be replayed.
        if let Some(recorder) = self.registry.get(conversation_id) {
            return Ok(Route::Local(recorder));
        }
        Ok(Route::NotActive)
    }

    /// Whether a response is in progress anywhere. Answered from the local
    /// registry and the directory; never redirects.
    pub async fn is_active(&self, conversation_id: &str) -> Result<bool> {
        if self.registry.has_response_in_progress(conversation_id) {
            return Ok(true);
        }
        Ok(self.remote_owner(conversation_id).await?.is_some())
    }

    async fn remote_owner(&self, conversation_id: &str) -> Result<Option<RedirectTarget>> {
        let directory = self.registry.directory();
        if !directory.available() {
            return Ok(None);
        }
        let Some(record) = directory.lookup(conversation_id).await? else {
            return Ok(None);
        };
        let local = self.registry.advertised_address().authority();
        if !record.active || same_address(&record.owner_address, &local) {
            // Our own claim without a live local recorder is stale.
            return Ok(None);
        }
        match RedirectTarget::parse(&record.owner_address) {
            Some(target) => Ok(Some(target)),
            None => {
                warn!(
                    conversation_id,
                    owner = %record.owner_address,
                    "Ignoring unparseable owner address"
                );
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{InMemoryDirectory, NoopDirectory};
    use resumer_traits::OwnershipDirectory;
    use crate::registry::RegistrySettings;
    use std::time::Duration;

    fn registry(
        directory: Arc<dyn OwnershipDirectory>,
        address: &str,
    ) -> Arc<RecorderRegistry> {
        Arc::new(RecorderRegistry::new(
            directory,
            RedirectTarget::parse(address).unwrap(),
            RegistrySettings::default(),
        ))
    }

    #[tokio::test]
    async fn test_local_recording_served_locally() {
        let directory = Arc::new(InMemoryDirectory::new());
        let a = registry(directory, "10.0.0.1:9090");
        let _handle = a.start("c1").await.unwrap();

        let resolver = RedirectResolver::new(a);
        assert!(matches!(resolver.resolve("c1").await.unwrap(), Route::Local(_)));
        assert!(resolver.is_active("c1").await.unwrap());
    }

    #[tokio::test]
    async fn test_remote_owner_produces_redirect() {
        let directory = Arc::new(InMemoryDirectory::new());
        let a = registry(directory.clone(), "10.0.0.1:9090");
        let b = registry(directory, "10.0.0.2:9191");
        let _handle = a.start("c1").await.unwrap();

        let resolver = RedirectResolver::new(b);
        match resolver.resolve("c1").await.unwrap() {
            Route::Redirect(target) => assert_eq!(target.authority(), "10.0.0.1:9090"),
            other => panic!("expected redirect, got {other:?}"),
        }
        assert!(resolver.is_active("c1").await.unwrap());
        assert!(matches!(
            resolver.resolve("other").await.unwrap(),
            Route::NotActive
        ));
    }

    #[tokio::test]
    async fn test_stale_self_claim_is_not_redirected() {
        let directory = Arc::new(InMemoryDirectory::new());
        directory
            .claim("c1", "10.0.0.1:9090", Duration::from_secs(10))
            .await
            .unwrap();
        let a = registry(directory, "10.0.0.1:9090");

        let resolver = RedirectResolver::new(a);
        assert!(matches!(resolver.resolve("c1").await.unwrap(), Route::NotActive));
        assert!(!resolver.is_active("c1").await.unwrap());
    }

    #[tokio::test]
    async fn test_unavailable_directory_never_redirects() {
        let a = registry(Arc::new(NoopDirectory), "10.0.0.1:9090");
        let resolver = RedirectResolver::new(a.clone());
        assert!(matches!(resolver.resolve("c1").await.unwrap(), Route::NotActive));

        a.start("c1").await.unwrap().complete().await;
        assert!(matches!(resolver.resolve("c1").await.unwrap(), Route::Local(_)));
        assert!(!resolver.is_active("c1").await.unwrap());
    }
}
