use thiserror::Error;

use crate::address::RedirectTarget;

pub type Result<T> = std::result::Result<T, ResumerError>;

/// Errors surfaced by resumer operations on both sides of the wire.
///
/// A conversation that is simply not being recorded is not an error; it is
/// reported through return values (empty replay, `accepted = false`, or
/// omission from a check).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResumerError {
    #[error("missing authorization")]
    Unauthenticated,

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("conversation not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("conversation {conversation_id} is already being recorded by {owner_address}")]
    AlreadyOwnedElsewhere {
        conversation_id: String,
        owner_address: String,
    },

    #[error("redirect required to {0}")]
    RedirectRequired(RedirectTarget),

    #[error("too many redirects ({hops} hops)")]
    RedirectLoop { hops: usize },

    #[error("response resumer disabled")]
    Disabled,

    #[error("ownership directory error: {0}")]
    Directory(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ResumerError {
    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::AccessDenied(message.into())
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Access and validation failures are terminal and must never be retried.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Unauthenticated
                | Self::AccessDenied(_)
                | Self::NotFound(_)
                | Self::InvalidArgument(_)
                | Self::RedirectLoop { .. }
                | Self::AlreadyOwnedElsewhere { .. }
        )
    }
}

impl From<std::io::Error> for ResumerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ResumerError::AlreadyOwnedElsewhere {
            conversation_id: "conv-1".to_string(),
            owner_address: "10.0.0.2:9090".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "conversation conv-1 is already being recorded by 10.0.0.2:9090"
        );
        assert_eq!(
            ResumerError::RedirectLoop { hops: 3 }.to_string(),
            "too many redirects (3 hops)"
        );
    }

    #[test]
    fn test_terminal_classification() {
        assert!(ResumerError::Unauthenticated.is_terminal());
        assert!(ResumerError::access_denied("nope").is_terminal());
        assert!(ResumerError::RedirectLoop { hops: 3 }.is_terminal());
        assert!(!ResumerError::Transport("reset".to_string()).is_terminal());
        assert!(!ResumerError::Disabled.is_terminal());
    }

    #[test]
    fn test_io_error_becomes_transport() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let err: ResumerError = io.into();
        assert!(matches!(err, ResumerError::Transport(message) if message.contains("reset")));
    }
}
