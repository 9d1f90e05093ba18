use resumer_traits::OwnershipDirectory;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use super::memory::InMemoryDirectory;
use super::remote::{DirectoryRequest, DirectoryResponse};
use crate::framing::{FrameError, read_frame, write_frame};

/// Shares one [`InMemoryDirectory`] with every replica that connects.
pub struct DirectoryServer {
    directory: Arc<InMemoryDirectory>,
    listener: TcpListener,
    purge_interval: Duration,
}

impl DirectoryServer {
    pub fn new(directory: Arc<InMemoryDirectory>, listener: TcpListener) -> Self {
        Self {
            directory,
            listener,
            purge_interval: Duration::from_secs(30),
        }
    }

    pub fn with_purge_interval(mut self, interval: Duration) -> Self {
        self.purge_interval = interval;
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> anyhow::Result<()> {
        info!(address = %self.listener.local_addr()?, "Directory server started");
        let mut purge = tokio::time::interval(self.purge_interval);

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let directory = self.directory.clone();
                            tokio::spawn(async move {
                                if let Err(err) = Self::handle_client(stream, directory).await {
                                    debug!(%peer, error = %err, "Directory client disconnected");
                                }
                            });
                        }
                        Err(err) => error!(error = %err, "Directory accept error"),
                    }
                }
                _ = purge.tick() => {
                    self.directory.purge_expired();
                }
                _ = shutdown.recv() => {
                    info!("Directory server shutting down");
                    break;
                }
            }
        }
        Ok(())
    }

    async fn handle_client(
        mut stream: TcpStream,
        directory: Arc<InMemoryDirectory>,
    ) -> Result<(), FrameError> {
        let _ = stream.set_nodelay(true);
        loop {
            let request: DirectoryRequest = match read_frame(&mut stream).await {
                Ok(request) => request,
                Err(FrameError::Closed) => return Ok(()),
                Err(FrameError::Json(err)) => {
                    write_frame(
                        &mut stream,
                        &DirectoryResponse::error(format!("Invalid request: {err}")),
                    )
                    .await?;
                    continue;
                }
                Err(err) => return Err(err),
            };
            let response = Self::process(&directory, request).await;
            write_frame(&mut stream, &response).await?;
        }
    }

    async fn process(directory: &InMemoryDirectory, request: DirectoryRequest) -> DirectoryResponse {
        let result = match request {
            DirectoryRequest::Ping => return DirectoryResponse::Pong,
            DirectoryRequest::Claim {
                conversation_id,
                owner_address,
                ttl_ms,
            } => directory
                .claim(&conversation_id, &owner_address, Duration::from_millis(ttl_ms))
                .await
                .map(DirectoryResponse::Claim),
            DirectoryRequest::Refresh {
                conversation_id,
                owner_address,
                ttl_ms,
            } => directory
                .refresh(&conversation_id, &owner_address, Duration::from_millis(ttl_ms))
                .await
                .map(|refreshed| DirectoryResponse::Refreshed { refreshed }),
            DirectoryRequest::Lookup { conversation_id } => directory
                .lookup(&conversation_id)
                .await
                .map(|record| DirectoryResponse::Lookup { record }),
            DirectoryRequest::Release {
                conversation_id,
                owner_address,
            } => directory
                .release(&conversation_id, &owner_address)
                .await
                .map(|released| DirectoryResponse::Released { released }),
        };
        result.unwrap_or_else(|err| DirectoryResponse::error(err.to_string()))
    }
}
