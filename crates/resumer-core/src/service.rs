//! Resumer operations with access checks and routing applied.
//!
//! Every method takes the [`Caller`] resolved at the request boundary; the
//! service never looks up identity on its own.

use resumer_traits::{
    AccessGate, AccessLevel, Caller, Credentials, RedirectTarget, Result, ResumerError,
    require_access,
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::recorder::Subscription;
use crate::registry::{RecorderRegistry, RecordingHandle};
use crate::resolver::{RedirectResolver, Route};

const MAX_CONVERSATION_ID_LEN: usize = 256;

pub enum ReplayOutcome {
    Stream(Subscription),
    Redirect(RedirectTarget),
    NotActive,
}

impl std::fmt::Debug for ReplayOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplayOutcome::Stream(subscription) => f
                .debug_tuple("Stream")
                .field(&subscription.conversation_id())
                .finish(),
            ReplayOutcome::Redirect(target) => f.debug_tuple("Redirect").field(target).finish(),
            ReplayOutcome::NotActive => f.write_str("NotActive"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    Accepted(bool),
    Redirect(RedirectTarget),
}

pub struct ResumerService {
    enabled: bool,
    registry: Arc<RecorderRegistry>,
    resolver: RedirectResolver,
    gate: Arc<dyn AccessGate>,
}

impl ResumerService {
    pub fn new(enabled: bool, registry: Arc<RecorderRegistry>, gate: Arc<dyn AccessGate>) -> Self {
        Self {
            enabled,
            resolver: RedirectResolver::new(registry.clone()),
            registry,
            gate,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn registry(&self) -> &Arc<RecorderRegistry> {
        &self.registry
    }

    pub async fn authenticate(&self, credentials: &Credentials) -> Result<Caller> {
        if credentials.is_empty() {
            return Err(ResumerError::Unauthenticated);
        }
        self.gate.authenticate(credentials).await
    }

    /// Begin recording a response. Requires writer access.
    pub async fn start_recording(
        &self,
        caller: &Caller,
        conversation_id: &str,
    ) -> Result<RecordingHandle> {
        if !self.enabled {
            return Err(ResumerError::Disabled);
        }
        validate_conversation_id(conversation_id)?;
        require_access(self.gate.as_ref(), caller, conversation_id, AccessLevel::Writer).await?;
        self.registry.start(conversation_id).await
    }

    /// Replay from `resume_position`. Requires reader access.
    pub async fn replay(
        &self,
        caller: &Caller,
        conversation_id: &str,
        resume_position: u64,
    ) -> Result<ReplayOutcome> {
        if !self.enabled {
            return Ok(ReplayOutcome::NotActive);
        }
        validate_conversation_id(conversation_id)?;
        require_access(self.gate.as_ref(), caller, conversation_id, AccessLevel::Reader).await?;

        Ok(match self.resolver.resolve(conversation_id).await? {
            Route::Local(recorder) => {
                let position = usize::try_from(resume_position).unwrap_or(usize::MAX);
                debug!(conversation_id, position, "Replay attached");
                ReplayOutcome::Stream(recorder.subscribe(position))
            }
            Route::Redirect(target) => ReplayOutcome::Redirect(target),
            Route::NotActive => ReplayOutcome::NotActive,
        })
    }

    /// Ask the producer to stop. Requires writer access.
    pub async fn cancel(&self, caller: &Caller, conversation_id: &str) -> Result<CancelOutcome> {
        if !self.enabled {
            return Err(ResumerError::Disabled);
        }
        validate_conversation_id(conversation_id)?;
        require_access(self.gate.as_ref(), caller, conversation_id, AccessLevel::Writer).await?;

        Ok(match self.resolver.resolve(conversation_id).await? {
            Route::Local(recorder) => {
                let accepted = recorder.request_cancel();
                info!(conversation_id, caller = %caller, accepted, "Cancel handled");
                CancelOutcome::Accepted(accepted)
            }
            Route::Redirect(target) => CancelOutcome::Redirect(target),
            Route::NotActive => CancelOutcome::Accepted(false),
        })
    }

    /// The subset of `conversation_ids` the caller can read that have a
    /// response in progress. Unreadable ids are dropped silently.
    pub async fn check(&self, caller: &Caller, conversation_ids: &[String]) -> Result<Vec<String>> {
        if !self.enabled {
            return Ok(Vec::new());
        }
        let mut seen = HashSet::new();
        let mut active = Vec::new();
        for conversation_id in conversation_ids {
            if !seen.insert(conversation_id.as_str())
                || validate_conversation_id(conversation_id).is_err()
            {
                continue;
            }
            match self.gate.access_level(caller, conversation_id).await {
                Ok(Some(level)) if level.is_at_least(AccessLevel::Reader) => {}
                Ok(_) => continue,
                Err(err) => {
                    debug!(conversation_id, error = %err, "Access lookup failed during check");
                    continue;
                }
            }
            if self.resolver.is_active(conversation_id).await? {
                active.push(conversation_id.clone());
            }
        }
        Ok(active)
    }

    /// Single-conversation status. Requires reader access.
    pub async fn has_response_in_progress(
        &self,
        caller: &Caller,
        conversation_id: &str,
    ) -> Result<bool> {
        if !self.enabled {
            return Ok(false);
        }
        validate_conversation_id(conversation_id)?;
        require_access(self.gate.as_ref(), caller, conversation_id, AccessLevel::Reader).await?;
        self.resolver.is_active(conversation_id).await
    }
}

pub fn validate_conversation_id(conversation_id: &str) -> Result<()> {
    if conversation_id.trim().is_empty() {
        return Err(ResumerError::invalid_argument("conversation id is required"));
    }
    if conversation_id.len() > MAX_CONVERSATION_ID_LEN {
        return Err(ResumerError::invalid_argument(format!(
            "conversation id exceeds {MAX_CONVERSATION_ID_LEN} bytes"
        )));
    }
    if conversation_id.chars().any(char::is_control) {
        return Err(ResumerError::invalid_argument(
            "conversation id contains control characters",
        ));
    }
    Ok(())
}
