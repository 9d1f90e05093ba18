use async_trait::async_trait;
use resumer_traits::{ClaimOutcome, OwnershipDirectory, OwnershipRecord, Result, ResumerError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

use crate::framing::{FrameError, read_frame, write_frame};

/// Requests understood by the directory server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum DirectoryRequest {
    Ping,
    Claim {
        conversation_id: String,
        owner_address: String,
        ttl_ms: u64,
    },
    Refresh {
        conversation_id: String,
        owner_address: String,
        ttl_ms: u64,
    },
    Lookup {
        conversation_id: String,
    },
    Release {
        conversation_id: String,
        owner_address: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum DirectoryResponse {
    Pong,
    Claim(ClaimOutcome),
    Refreshed { refreshed: bool },
    Lookup { record: Option<OwnershipRecord> },
    Released { released: bool },
    Error { message: String },
}

impl DirectoryResponse {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// Client for a shared directory server.
///
/// Keeps one connection open and reconnects once per request when the
/// previous connection went away.
pub struct RemoteDirectory {
    address: String,
    connect_timeout: Duration,
    connection: Mutex<Option<TcpStream>>,
}

impl RemoteDirectory {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            connect_timeout: Duration::from_secs(3),
            connection: Mutex::new(None),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub async fn ping(&self) -> bool {
        matches!(
            self.request(DirectoryRequest::Ping).await,
            Ok(DirectoryResponse::Pong)
        )
    }

    async fn connect(&self) -> std::result::Result<TcpStream, String> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| format!("timed out connecting to {}", self.address))?
            .map_err(|err| format!("failed to connect to {}: {err}", self.address))?;
        let _ = stream.set_nodelay(true);
        Ok(stream)
    }

    async fn request(&self, request: DirectoryRequest) -> Result<DirectoryResponse> {
        let mut connection = self.connection.lock().await;
        let mut last_error = String::new();

        for attempt in 0..2 {
            if connection.is_none() {
                match self.connect().await {
                    Ok(stream) => *connection = Some(stream),
                    Err(err) => {
                        last_error = err;
                        continue;
                    }
                }
            }
            let Some(stream) = connection.as_mut() else {
                continue;
            };
            match exchange(stream, &request).await {
                Ok(DirectoryResponse::Error { message }) => {
                    return Err(ResumerError::Directory(message));
                }
                Ok(response) => return Ok(response),
                Err(err) => {
                    debug!(attempt, address = %self.address, error = %err, "Directory connection lost");
                    *connection = None;
                    last_error = err.to_string();
                }
            }
        }

        Err(ResumerError::Directory(last_error))
    }
}

async fn exchange(
    stream: &mut TcpStream,
    request: &DirectoryRequest,
) -> std::result::Result<DirectoryResponse, FrameError> {
    write_frame(stream, request).await?;
    read_frame(stream).await
}

fn unexpected(response: DirectoryResponse) -> ResumerError {
    ResumerError::Directory(format!("unexpected directory response: {response:?}"))
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)
}

#[async_trait]
impl OwnershipDirectory for RemoteDirectory {
    async fn claim(
        &self,
        conversation_id: &str,
        owner_address: &str,
        ttl: Duration,
    ) -> Result<ClaimOutcome> {
        match self
            .request(DirectoryRequest::Claim {
                conversation_id: conversation_id.to_string(),
                owner_address: owner_address.to_string(),
                ttl_ms: ttl_millis(ttl),
            })
            .await?
        {
            DirectoryResponse::Claim(outcome) => Ok(outcome),
            other => Err(unexpected(other)),
        }
    }

    async fn refresh(
        &self,
        conversation_id: &str,
        owner_address: &str,
        ttl: Duration,
    ) -> Result<bool> {
        match self
            .request(DirectoryRequest::Refresh {
                conversation_id: conversation_id.to_string(),
                owner_address: owner_address.to_string(),
                ttl_ms: ttl_millis(ttl),
            })
            .await?
        {
            DirectoryResponse::Refreshed { refreshed } => Ok(refreshed),
            other => Err(unexpected(other)),
        }
    }

    async fn lookup(&self, conversation_id: &str) -> Result<Option<OwnershipRecord>> {
        match self
            .request(DirectoryRequest::Lookup {
                conversation_id: conversation_id.to_string(),
            })
            .await?
        {
            DirectoryResponse::Lookup { record } => Ok(record),
            other => Err(unexpected(other)),
        }
    }

    async fn release(&self, conversation_id: &str, owner_address: &str) -> Result<bool> {
        match self
            .request(DirectoryRequest::Release {
                conversation_id: conversation_id.to_string(),
                owner_address: owner_address.to_string(),
            })
            .await?
        {
            DirectoryResponse::Released { released } => Ok(released),
            other => Err(unexpected(other)),
        }
    }
}
