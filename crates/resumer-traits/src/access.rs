//! Caller identity and the access gate seam.
//!
//! Identity is resolved once at the request boundary (`AccessGate::authenticate`)
//! and then passed explicitly to every operation as a [`Caller`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, ResumerError};

/// Access a caller holds on a conversation, ordered from weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Reader,
    Writer,
    Manager,
    Owner,
}

impl AccessLevel {
    pub fn is_at_least(self, required: AccessLevel) -> bool {
        self >= required
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AccessLevel::Reader => "reader",
            AccessLevel::Writer => "writer",
            AccessLevel::Manager => "manager",
            AccessLevel::Owner => "owner",
        }
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessLevel {
    type Err = ResumerError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "reader" => Ok(AccessLevel::Reader),
            "writer" => Ok(AccessLevel::Writer),
            "manager" => Ok(AccessLevel::Manager),
            "owner" => Ok(AccessLevel::Owner),
            other => Err(ResumerError::invalid_argument(format!(
                "unknown access level '{other}'"
            ))),
        }
    }
}

/// Credentials presented with a call. Sent explicitly on every hop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Credentials {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            bearer_token: Some(token.into()),
            api_key: None,
        }
    }

    pub fn api_key(key: impl Into<String>) -> Self {
        Self {
            bearer_token: None,
            api_key: Some(key.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bearer_token.as_deref().is_none_or(str::is_empty)
            && self.api_key.as_deref().is_none_or(str::is_empty)
    }
}

/// The authenticated identity behind a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Caller {
    /// A user resolved from a bearer token.
    User(String),
    /// An agent presenting a configured API key.
    Agent,
}

impl fmt::Display for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Caller::User(id) => write!(f, "user:{id}"),
            Caller::Agent => f.write_str("agent"),
        }
    }
}

/// Resolves callers and their access levels on conversations.
///
/// Implementations are provided by the conversation store; the resumer only
/// consumes the answers.
#[async_trait]
pub trait AccessGate: Send + Sync {
    /// Resolve credentials into a caller. Missing or unknown credentials
    /// yield `ResumerError::Unauthenticated`.
    async fn authenticate(&self, credentials: &Credentials) -> Result<Caller>;

    /// Access level the caller holds on the conversation, `None` when the
    /// conversation is unknown or not visible to the caller.
    async fn access_level(&self, caller: &Caller, conversation_id: &str)
    -> Result<Option<AccessLevel>>;
}

/// Fail unless `caller` holds at least `required` on the conversation.
pub async fn require_access(
    gate: &dyn AccessGate,
    caller: &Caller,
    conversation_id: &str,
    required: AccessLevel,
) -> Result<()> {
    match gate.access_level(caller, conversation_id).await? {
        Some(level) if level.is_at_least(required) => Ok(()),
        Some(_) => Err(ResumerError::access_denied(format!(
            "{caller} does not have {required} access to conversation {conversation_id}"
        ))),
        None => Err(ResumerError::NotFound(conversation_id.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct TableGate {
        levels: HashMap<(String, String), AccessLevel>,
    }

    #[async_trait]
    impl AccessGate for TableGate {
        async fn authenticate(&self, credentials: &Credentials) -> Result<Caller> {
            credentials
                .bearer_token
                .clone()
                .map(Caller::User)
                .ok_or(ResumerError::Unauthenticated)
        }

        async fn access_level(
            &self,
            caller: &Caller,
            conversation_id: &str,
        ) -> Result<Option<AccessLevel>> {
            let Caller::User(user) = caller else {
                return Ok(Some(AccessLevel::Owner));
            };
            Ok(self
                .levels
                .get(&(user.clone(), conversation_id.to_string()))
                .copied())
        }
    }

    fn gate() -> TableGate {
        let mut levels = HashMap::new();
        levels.insert(("alice".to_string(), "c1".to_string()), AccessLevel::Reader);
        levels.insert(("bob".to_string(), "c1".to_string()), AccessLevel::Manager);
        TableGate { levels }
    }

    #[test]
    fn test_access_level_ordering() {
        assert!(AccessLevel::Owner.is_at_least(AccessLevel::Writer));
        assert!(AccessLevel::Writer.is_at_least(AccessLevel::Writer));
        assert!(!AccessLevel::Reader.is_at_least(AccessLevel::Writer));
        assert_eq!("Manager".parse::<AccessLevel>().unwrap(), AccessLevel::Manager);
        assert!("admin".parse::<AccessLevel>().is_err());
    }

    #[test]
    fn test_credentials_empty() {
        assert!(Credentials::default().is_empty());
        assert!(Credentials::bearer("").is_empty());
        assert!(!Credentials::api_key("k").is_empty());
    }

    #[tokio::test]
    async fn test_require_access() {
        let gate = gate();
        let alice = Caller::User("alice".to_string());
        let bob = Caller::User("bob".to_string());

        assert!(
            require_access(&gate, &alice, "c1", AccessLevel::Reader)
                .await
                .is_ok()
        );
        assert!(matches!(
            require_access(&gate, &alice, "c1", AccessLevel::Writer).await,
            Err(ResumerError::AccessDenied(_))
        ));
        assert!(
            require_access(&gate, &bob, "c1", AccessLevel::Writer)
                .await
                .is_ok()
        );
        assert!(matches!(
            require_access(&gate, &bob, "c2", AccessLevel::Reader).await,
            Err(ResumerError::NotFound(id)) if id == "c2"
        ));
        assert!(
            require_access(&gate, &Caller::Agent, "anything", AccessLevel::Owner)
                .await
                .is_ok()
        );
    }
}
