//! Per-process map of recordings keyed by conversation id.
//!
//! A recording is only inserted after the ownership claim succeeded, so the
//! registry never holds a live recorder for a conversation owned elsewhere.

use parking_lot::Mutex;
use resumer_traits::{ClaimOutcome, OwnershipDirectory, RedirectTarget, Result, ResumerError};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ResumerConfig;
use crate::recorder::Recorder;

#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub claim_ttl: Duration,
    pub refresh_interval: Duration,
    /// How long a completed recording stays replayable.
    pub retention: Duration,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self::from_config(&ResumerConfig::default())
    }
}

impl RegistrySettings {
    pub fn from_config(config: &ResumerConfig) -> Self {
        Self {
            claim_ttl: config.directory.claim_ttl(),
            refresh_interval: config.directory.refresh_interval(),
            retention: config.recording.retention(),
        }
    }
}

pub struct RecorderRegistry {
    recordings: Mutex<HashMap<String, Arc<Recorder>>>,
    directory: Arc<dyn OwnershipDirectory>,
    advertised: RedirectTarget,
    settings: RegistrySettings,
}

impl RecorderRegistry {
    pub fn new(
        directory: Arc<dyn OwnershipDirectory>,
        advertised: RedirectTarget,
        settings: RegistrySettings,
    ) -> Self {
        Self {
            recordings: Mutex::new(HashMap::new()),
            directory,
            advertised,
            settings,
        }
    }

    pub fn advertised_address(&self) -> &RedirectTarget {
        &self.advertised
    }

    pub fn directory(&self) -> &Arc<dyn OwnershipDirectory> {
        &self.directory
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    /// Claim `conversation_id` for this replica and begin a new recording.
    ///
    /// A local recording for the same id is completed and replaced. A live
    /// claim held by another replica is a hard error.
    pub async fn start(self: &Arc<Self>, conversation_id: &str) -> Result<RecordingHandle> {
        let owner = self.advertised.authority();
        if let ClaimOutcome::Conflict { owner_address } = self
            .directory
            .claim(conversation_id, &owner, self.settings.claim_ttl)
            .await?
        {
            warn!(
                conversation_id,
                owner = %owner_address,
                "Recording rejected: conversation owned by another replica"
            );
            return Err(ResumerError::AlreadyOwnedElsewhere {
                conversation_id: conversation_id.to_string(),
                owner_address,
            });
        }

        let recorder = Arc::new(Recorder::new(conversation_id, owner.as_str()));
        let previous = self
            .recordings
            .lock()
            .insert(conversation_id.to_string(), recorder.clone());
        if let Some(previous) = previous
            && previous.complete()
        {
            info!(conversation_id, "Replaced in-progress recording");
        }

        let refresh = self.spawn_refresh(recorder.clone());
        info!(conversation_id, owner = %owner, "Recording started");

        Ok(RecordingHandle {
            registry: self.clone(),
            recorder,
            refresh: Some(refresh),
            finished: false,
        })
    }

    /// The local recording for `conversation_id`, completed or not.
    pub fn get(&self, conversation_id: &str) -> Option<Arc<Recorder>> {
        self.recordings.lock().get(conversation_id).cloned()
    }

    /// The local recording for `conversation_id` if it is still in progress.
    pub fn active(&self, conversation_id: &str) -> Option<Arc<Recorder>> {
        self.get(conversation_id)
            .filter(|recorder| !recorder.is_complete())
    }

    pub fn has_response_in_progress(&self, conversation_id: &str) -> bool {
        self.active(conversation_id).is_some()
    }

    pub fn active_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .recordings
            .lock()
            .values()
            .filter(|recorder| !recorder.is_complete())
            .map(|recorder| recorder.conversation_id().to_string())
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.recordings.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.recordings.lock().is_empty()
    }

    /// Drop completed recordings older than the retention window that no
    /// reader is attached to. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let retention = self.settings.retention;
        let mut recordings = self.recordings.lock();
        let before = recordings.len();
        recordings.retain(|_, recorder| {
            recorder.subscriber_count() > 0
                || recorder
                    .completed_at()
                    .is_none_or(|completed_at| completed_at.elapsed() < retention)
        });
        let removed = before - recordings.len();
        if removed > 0 {
            debug!(removed, "Purged completed recordings");
        }
        removed
    }

    /// Periodically purge expired recordings. Stops once the registry is
    /// dropped. Returns `None` outside a tokio runtime.
    pub fn spawn_cleanup_task(self: &Arc<Self>, interval: Duration) -> Option<JoinHandle<()>> {
        let handle = tokio::runtime::Handle::try_current().ok()?;
        let registry: Weak<Self> = Arc::downgrade(self);
        Some(handle.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                registry.purge_expired();
            }
        }))
    }

    fn is_current(&self, recorder: &Arc<Recorder>) -> bool {
        self.recordings
            .lock()
            .get(recorder.conversation_id())
            .is_some_and(|current| Arc::ptr_eq(current, recorder))
    }

    async fn release(&self, recorder: &Arc<Recorder>) {
        // A replacement recording shares this replica's claim; leave it alone.
        if !self.is_current(recorder) {
            return;
        }
        let conversation_id = recorder.conversation_id();
        match self
            .directory
            .release(conversation_id, recorder.owner_address())
            .await
        {
            Ok(released) => debug!(conversation_id, released, "Ownership released"),
            Err(err) => warn!(conversation_id, error = %err, "Failed to release ownership"),
        }
    }

    fn spawn_refresh(&self, recorder: Arc<Recorder>) -> JoinHandle<()> {
        let directory = self.directory.clone();
        let settings = self.settings.clone();
        tokio::spawn(async move {
            let conversation_id = recorder.conversation_id();
            let owner = recorder.owner_address();
            loop {
                tokio::time::sleep(settings.refresh_interval).await;
                if recorder.is_complete() {
                    break;
                }
                match directory
                    .refresh(conversation_id, owner, settings.claim_ttl)
                    .await
                {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!(conversation_id, "Ownership claim lost, re-claiming");
                        match directory.claim(conversation_id, owner, settings.claim_ttl).await {
                            Ok(ClaimOutcome::Claimed) => {}
                            Ok(ClaimOutcome::Conflict { owner_address }) => warn!(
                                conversation_id,
                                owner = %owner_address,
                                "Ownership taken by another replica"
                            ),
                            Err(err) => warn!(conversation_id, error = %err, "Re-claim failed"),
                        }
                    }
                    Err(err) => warn!(conversation_id, error = %err, "Ownership refresh failed"),
                }
            }
        })
    }
}

/// Write side of one recording. Completing (or dropping) the handle ends
/// the recording and releases the ownership claim.
pub struct RecordingHandle {
    registry: Arc<RecorderRegistry>,
    recorder: Arc<Recorder>,
    refresh: Option<JoinHandle<()>>,
    finished: bool,
}

impl RecordingHandle {
    pub fn recorder(&self) -> &Arc<Recorder> {
        &self.recorder
    }

    pub fn conversation_id(&self) -> &str {
        self.recorder.conversation_id()
    }

    pub fn append(&self, chunk: &str) -> bool {
        self.recorder.append(chunk)
    }

    pub fn cancel_requested(&self) -> bool {
        self.recorder.consume_cancel_requested()
    }

    /// Chunks recorded so far.
    pub fn position(&self) -> usize {
        self.recorder.len()
    }

    pub async fn complete(mut self) {
        self.finished = true;
        if let Some(refresh) = self.refresh.take() {
            refresh.abort();
        }
        if self.recorder.complete() {
            info!(
                conversation_id = self.recorder.conversation_id(),
                chunks = self.recorder.len(),
                "Recording completed"
            );
        }
        self.registry.release(&self.recorder).await;
    }
}

impl Drop for RecordingHandle {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Some(refresh) = self.refresh.take() {
            refresh.abort();
        }
        self.recorder.complete();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let registry = self.registry.clone();
            let recorder = self.recorder.clone();
            handle.spawn(async move {
                registry.release(&recorder).await;
            });
        }
    }
}
