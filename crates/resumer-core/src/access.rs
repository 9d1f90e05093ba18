use async_trait::async_trait;
use resumer_traits::{AccessGate, AccessLevel, Caller, Credentials, Result, ResumerError};
use std::collections::{HashMap, HashSet};

use crate::config::AccessConfig;

/// Access gate backed by static configuration.
///
/// API keys authenticate as [`Caller::Agent`] with owner access everywhere.
/// Bearer tokens resolve to users whose access comes from explicit grants.
#[derive(Debug, Default, Clone)]
pub struct StaticAccessGate {
    api_keys: HashSet<String>,
    tokens: HashMap<String, String>,
    grants: HashMap<(String, String), AccessLevel>,
}

impl StaticAccessGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &AccessConfig) -> Self {
        let mut gate = Self::new();
        for key in &config.api_keys {
            gate = gate.with_api_key(key.as_str());
        }
        for (token, user) in &config.tokens {
            gate = gate.with_token(token.as_str(), user.as_str());
        }
        for grant in &config.grants {
            gate = gate.with_grant(grant.user.as_str(), grant.conversation.as_str(), grant.level);
        }
        gate
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_keys.insert(key.into());
        self
    }

    pub fn with_token(mut self, token: impl Into<String>, user: impl Into<String>) -> Self {
        self.tokens.insert(token.into(), user.into());
        self
    }

    pub fn with_grant(
        mut self,
        user: impl Into<String>,
        conversation_id: impl Into<String>,
        level: AccessLevel,
    ) -> Self {
        let key = (user.into(), conversation_id.into());
        // Keep the strongest grant when a pair is listed twice.
        let entry = self.grants.entry(key).or_insert(level);
        *entry = (*entry).max(level);
        self
    }
}

#[async_trait]
impl AccessGate for StaticAccessGate {
    async fn authenticate(&self, credentials: &Credentials) -> Result<Caller> {
        if let Some(key) = credentials.api_key.as_deref().filter(|k| !k.is_empty()) {
            return if self.api_keys.contains(key) {
                Ok(Caller::Agent)
            } else {
                Err(ResumerError::Unauthenticated)
            };
        }
        credentials
            .bearer_token
            .as_deref()
            .and_then(|token| self.tokens.get(token))
            .map(|user| Caller::User(user.clone()))
            .ok_or(ResumerError::Unauthenticated)
    }

    async fn access_level(
        &self,
        caller: &Caller,
        conversation_id: &str,
    ) -> Result<Option<AccessLevel>> {
        Ok(match caller {
            Caller::Agent => Some(AccessLevel::Owner),
            Caller::User(user) => self
                .grants
                .get(&(user.clone(), conversation_id.to_string()))
                .copied(),
        })
    }
}
