//! Wire messages for the resumer service.
//!
//! Every call opens one connection. The client sends a [`RequestEnvelope`]
//! (followed by [`RecordChunk`]s for `Record`); the server answers with zero
//! or more [`ResponseFrame::Message`]s and exactly one terminal
//! [`ResponseFrame::Trailers`]. Redirects live only in trailers.

use resumer_traits::{Credentials, RedirectTarget, ResumerError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    #[serde(default)]
    pub credentials: Credentials,
    /// Number of redirects already followed to reach this replica.
    #[serde(default)]
    pub hop: u8,
    pub request: ResumerRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ResumerRequest {
    Record {
        conversation_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
        #[serde(default)]
        complete: bool,
    },
    Replay {
        conversation_id: String,
        #[serde(default)]
        resume_position: u64,
    },
    Cancel {
        conversation_id: String,
    },
    Check {
        conversation_ids: Vec<String>,
    },
    HasResponseInProgress {
        conversation_id: String,
    },
    IsEnabled,
}

impl ResumerRequest {
    pub fn name(&self) -> &'static str {
        match self {
            ResumerRequest::Record { .. } => "Record",
            ResumerRequest::Replay { .. } => "Replay",
            ResumerRequest::Cancel { .. } => "Cancel",
            ResumerRequest::Check { .. } => "Check",
            ResumerRequest::HasResponseInProgress { .. } => "HasResponseInProgress",
            ResumerRequest::IsEnabled => "IsEnabled",
        }
    }

    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            ResumerRequest::Record {
                conversation_id, ..
            }
            | ResumerRequest::Replay {
                conversation_id, ..
            }
            | ResumerRequest::Cancel { conversation_id }
            | ResumerRequest::HasResponseInProgress { conversation_id } => {
                Some(conversation_id)
            }
            ResumerRequest::Check { .. } | ResumerRequest::IsEnabled => None,
        }
    }
}

/// Follow-up message on a `Record` call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordChunk {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default)]
    pub complete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordAck {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub cancel_requested: bool,
    /// Chunks recorded so far.
    #[serde(default)]
    pub position: u64,
}

impl RecordAck {
    pub fn ok(cancel_requested: bool, position: usize) -> Self {
        Self {
            success: true,
            error_message: None,
            cancel_requested,
            position: position as u64,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(message.into()),
            cancel_requested: false,
            position: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ResumerResponse {
    RecordAck(RecordAck),
    /// `position` counts chunks delivered including this one.
    Token { token: String, position: u64 },
    Cancel { accepted: bool },
    Check { conversation_ids: Vec<String> },
    InProgress { in_progress: bool },
    Enabled { enabled: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "frame", content = "body", rename_all = "snake_case")]
pub enum ResponseFrame {
    Message(ResumerResponse),
    Trailers(Trailers),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    Ok,
    InvalidArgument,
    Unauthenticated,
    PermissionDenied,
    NotFound,
    FailedPrecondition,
    AlreadyExists,
    Aborted,
    Redirect,
    Internal,
    Unavailable,
}

/// Terminal frame of every call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trailers {
    pub status: StatusCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_port: Option<u16>,
    /// Current owner, set alongside `AlreadyExists`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_address: Option<String>,
}

impl Trailers {
    pub fn ok() -> Self {
        Self::status(StatusCode::Ok, None)
    }

    pub fn status(status: StatusCode, message: Option<String>) -> Self {
        Self {
            status,
            message,
            redirect_host: None,
            redirect_port: None,
            owner_address: None,
        }
    }

    pub fn redirect(target: &RedirectTarget) -> Self {
        Self {
            redirect_host: Some(target.host.clone()),
            redirect_port: Some(target.port),
            ..Self::status(StatusCode::Redirect, None)
        }
    }

    pub fn from_error(err: &ResumerError) -> Self {
        let message = Some(err.to_string());
        match err {
            ResumerError::RedirectRequired(target) => Self::redirect(target),
            ResumerError::Unauthenticated => Self::status(StatusCode::Unauthenticated, message),
            ResumerError::AccessDenied(_) => Self::status(StatusCode::PermissionDenied, message),
            ResumerError::NotFound(_) => Self::status(StatusCode::NotFound, message),
            ResumerError::InvalidArgument(_) => Self::status(StatusCode::InvalidArgument, message),
            ResumerError::AlreadyOwnedElsewhere { owner_address, .. } => Self {
                owner_address: Some(owner_address.clone()),
                ..Self::status(StatusCode::AlreadyExists, message)
            },
            ResumerError::RedirectLoop { .. } => Self::status(StatusCode::Aborted, message),
            ResumerError::Disabled => Self::status(StatusCode::FailedPrecondition, message),
            ResumerError::Directory(_) | ResumerError::Transport(_) => {
                Self::status(StatusCode::Unavailable, message)
            }
            ResumerError::Protocol(_) | ResumerError::Internal(_) => {
                Self::status(StatusCode::Internal, message)
            }
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == StatusCode::Ok
    }

    /// The redirect target, when this is a well-formed redirect.
    pub fn redirect_target(&self) -> Option<RedirectTarget> {
        if self.status != StatusCode::Redirect {
            return None;
        }
        RedirectTarget::new(self.redirect_host.clone()?, self.redirect_port?)
    }

    /// Turn a non-ok trailer back into the error it encodes.
    pub fn into_error(self, conversation_id: Option<&str>) -> ResumerError {
        let message = self.message.clone().unwrap_or_default();
        match self.status {
            StatusCode::Ok => ResumerError::internal("ok status is not an error"),
            StatusCode::Redirect => match self.redirect_target() {
                Some(target) => ResumerError::RedirectRequired(target),
                None => ResumerError::Protocol("redirect without a valid target".to_string()),
            },
            StatusCode::Unauthenticated => ResumerError::Unauthenticated,
            StatusCode::PermissionDenied => ResumerError::AccessDenied(message),
            StatusCode::NotFound => {
                ResumerError::NotFound(conversation_id.map(str::to_string).unwrap_or(message))
            }
            StatusCode::InvalidArgument => ResumerError::InvalidArgument(message),
            StatusCode::AlreadyExists => ResumerError::AlreadyOwnedElsewhere {
                conversation_id: conversation_id.unwrap_or_default().to_string(),
                owner_address: self.owner_address.unwrap_or_default(),
            },
            StatusCode::Aborted => ResumerError::Protocol(message),
            StatusCode::FailedPrecondition => ResumerError::Disabled,
            StatusCode::Unavailable => ResumerError::Transport(message),
            StatusCode::Internal => ResumerError::Internal(message),
        }
    }
}
