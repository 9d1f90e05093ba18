//! TCP front end for [`ResumerService`]. One call per connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use resumer_traits::Caller;

use crate::framing::{FrameError, read_frame, write_frame};
use crate::protocol::{
    RecordAck, RecordChunk, RequestEnvelope, ResponseFrame, ResumerRequest, ResumerResponse,
    StatusCode, Trailers,
};
use crate::service::{CancelOutcome, ReplayOutcome, ResumerService};

#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Silence on a `Record` stream after which it is treated as disconnected.
    pub record_idle_timeout: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            record_idle_timeout: Duration::from_secs(300),
        }
    }
}

pub struct ResumerServer {
    service: Arc<ResumerService>,
    listener: TcpListener,
    settings: ServerSettings,
}

impl ResumerServer {
    pub fn new(service: Arc<ResumerService>, listener: TcpListener, settings: ServerSettings) -> Self {
        Self {
            service,
            listener,
            settings,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> anyhow::Result<()> {
        info!(
            address = %self.listener.local_addr()?,
            advertised = %self.service.registry().advertised_address(),
            enabled = self.service.is_enabled(),
            "Resumer server started"
        );

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let service = self.service.clone();
                            let settings = self.settings.clone();
                            tokio::spawn(async move {
                                if let Err(err) = Self::handle_connection(stream, peer, service, settings).await {
                                    debug!(%peer, error = %err, "Client disconnected");
                                }
                            });
                        }
                        Err(err) => error!(error = %err, "Accept error"),
                    }
                }
                _ = shutdown.recv() => {
                    info!("Resumer server shutting down");
                    break;
                }
            }
        }
        Ok(())
    }

    async fn handle_connection(
        mut stream: TcpStream,
        peer: SocketAddr,
        service: Arc<ResumerService>,
        settings: ServerSettings,
    ) -> Result<(), FrameError> {
        let _ = stream.set_nodelay(true);
        let envelope: RequestEnvelope = match read_frame(&mut stream).await {
            Ok(envelope) => envelope,
            Err(FrameError::Closed) => return Ok(()),
            Err(err @ (FrameError::Json(_) | FrameError::TooLarge(_))) => {
                let trailers = Trailers::status(
                    StatusCode::InvalidArgument,
                    Some(format!("Invalid request: {err}")),
                );
                return send_trailers(&mut stream, trailers).await;
            }
            Err(err) => return Err(err),
        };

        let RequestEnvelope {
            credentials,
            hop,
            request,
        } = envelope;
        debug!(%peer, hop, request = request.name(), "Handling request");

        if let ResumerRequest::IsEnabled = request {
            send_message(
                &mut stream,
                ResumerResponse::Enabled {
                    enabled: service.is_enabled(),
                },
            )
            .await?;
            return send_trailers(&mut stream, Trailers::ok()).await;
        }

        let caller = match service.authenticate(&credentials).await {
            Ok(caller) => caller,
            Err(err) => {
                debug!(%peer, error = %err, "Authentication failed");
                if matches!(request, ResumerRequest::Record { .. }) {
                    send_message(
                        &mut stream,
                        ResumerResponse::RecordAck(RecordAck::failed(err.to_string())),
                    )
                    .await?;
                }
                return send_trailers(&mut stream, Trailers::from_error(&err)).await;
            }
        };

        match request {
            ResumerRequest::Record {
                conversation_id,
                token,
                complete,
            } => {
                let first = RecordChunk { token, complete };
                Self::handle_record(stream, &service, &caller, conversation_id, first, &settings)
                    .await
            }
            ResumerRequest::Replay {
                conversation_id,
                resume_position,
            } => {
                Self::handle_replay(stream, &service, &caller, conversation_id, resume_position, hop)
                    .await
            }
            ResumerRequest::Cancel { conversation_id } => {
                let trailers = match service.cancel(&caller, &conversation_id).await {
                    Ok(CancelOutcome::Accepted(accepted)) => {
                        send_message(&mut stream, ResumerResponse::Cancel { accepted }).await?;
                        Trailers::ok()
                    }
                    Ok(CancelOutcome::Redirect(target)) => {
                        info!(conversation_id = %conversation_id, target = %target, hop, "Cancel redirected");
                        Trailers::redirect(&target)
                    }
                    Err(err) => Trailers::from_error(&err),
                };
                send_trailers(&mut stream, trailers).await
            }
            ResumerRequest::Check { conversation_ids } => {
                let trailers = match service.check(&caller, &conversation_ids).await {
                    Ok(conversation_ids) => {
                        send_message(&mut stream, ResumerResponse::Check { conversation_ids })
                            .await?;
                        Trailers::ok()
                    }
                    Err(err) => Trailers::from_error(&err),
                };
                send_trailers(&mut stream, trailers).await
            }
            ResumerRequest::HasResponseInProgress { conversation_id } => {
                let trailers = match service
                    .has_response_in_progress(&caller, &conversation_id)
                    .await
                {
                    Ok(in_progress) => {
                        send_message(&mut stream, ResumerResponse::InProgress { in_progress })
                            .await?;
                        Trailers::ok()
                    }
                    Err(err) => Trailers::from_error(&err),
                };
                send_trailers(&mut stream, trailers).await
            }
            ResumerRequest::IsEnabled => send_trailers(&mut stream, Trailers::ok()).await,
        }
    }

    async fn handle_record(
        mut stream: TcpStream,
        service: &ResumerService,
        caller: &Caller,
        conversation_id: String,
        first: RecordChunk,
        settings: &ServerSettings,
    ) -> Result<(), FrameError> {
        let handle = match service.start_recording(caller, &conversation_id).await {
            Ok(handle) => handle,
            Err(err) => {
                send_message(
                    &mut stream,
                    ResumerResponse::RecordAck(RecordAck::failed(err.to_string())),
                )
                .await?;
                return send_trailers(&mut stream, Trailers::from_error(&err)).await;
            }
        };

        let mut chunk = first;
        loop {
            // A newer producer for the same conversation completes this recording.
            let superseded = match chunk.token.as_deref() {
                Some(token) if !token.is_empty() => !handle.append(token),
                _ => handle.recorder().is_complete(),
            };
            if superseded {
                warn!(conversation_id = %conversation_id, "Recording superseded, closing ingestion");
                let message = "recording superseded by a newer producer".to_string();
                send_message(
                    &mut stream,
                    ResumerResponse::RecordAck(RecordAck::failed(message.clone())),
                )
                .await?;
                let trailers = Trailers::status(StatusCode::Aborted, Some(message));
                return send_trailers(&mut stream, trailers).await;
            }

            let ack = RecordAck::ok(handle.cancel_requested(), handle.position());
            if chunk.complete {
                handle.complete().await;
                send_message(&mut stream, ResumerResponse::RecordAck(ack)).await?;
                return send_trailers(&mut stream, Trailers::ok()).await;
            }
            if let Err(err) = send_message(&mut stream, ResumerResponse::RecordAck(ack)).await {
                warn!(conversation_id = %conversation_id, error = %err, "Ingestion ended without completion");
                handle.complete().await;
                return Err(err);
            }

            chunk = match tokio::time::timeout(
                settings.record_idle_timeout,
                read_frame::<_, RecordChunk>(&mut stream),
            )
            .await
            {
                Ok(Ok(chunk)) => chunk,
                Ok(Err(err)) => {
                    warn!(conversation_id = %conversation_id, error = %err, "Ingestion ended without completion");
                    handle.complete().await;
                    return Ok(());
                }
                Err(_) => {
                    warn!(
                        conversation_id = %conversation_id,
                        timeout_secs = settings.record_idle_timeout.as_secs(),
                        "Ingestion idle, completing recording"
                    );
                    handle.complete().await;
                    let trailers = Trailers::status(
                        StatusCode::Aborted,
                        Some("record stream idle timeout".to_string()),
                    );
                    return send_trailers(&mut stream, trailers).await;
                }
            };
        }
    }

    async fn handle_replay(
        mut stream: TcpStream,
        service: &ResumerService,
        caller: &Caller,
        conversation_id: String,
        resume_position: u64,
        hop: u8,
    ) -> Result<(), FrameError> {
        let mut subscription = match service
            .replay(caller, &conversation_id, resume_position)
            .await
        {
            Ok(ReplayOutcome::Stream(subscription)) => subscription,
            Ok(ReplayOutcome::Redirect(target)) => {
                info!(conversation_id = %conversation_id, target = %target, hop, "Replay redirected");
                return send_trailers(&mut stream, Trailers::redirect(&target)).await;
            }
            Ok(ReplayOutcome::NotActive) => {
                return send_trailers(&mut stream, Trailers::ok()).await;
            }
            Err(err) => return send_trailers(&mut stream, Trailers::from_error(&err)).await,
        };

        let (mut reader, mut writer) = stream.split();
        let mut probe = [0u8; 64];
        loop {
            tokio::select! {
                chunk = subscription.next() => {
                    let Some(token) = chunk else {
                        break;
                    };
                    let position = subscription.position() as u64;
                    send_message(&mut writer, ResumerResponse::Token { token, position }).await?;
                }
                read = reader.read(&mut probe) => {
                    // Clients send nothing after the envelope; EOF means they left.
                    if matches!(read, Ok(0) | Err(_)) {
                        debug!(
                            conversation_id = %conversation_id,
                            position = subscription.position(),
                            "Replay client disconnected"
                        );
                        return Ok(());
                    }
                }
            }
        }
        send_trailers(&mut writer, Trailers::ok()).await
    }
}

async fn send_message<W>(writer: &mut W, response: ResumerResponse) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    write_frame(writer, &ResponseFrame::Message(response)).await
}

async fn send_trailers<W>(writer: &mut W, trailers: Trailers) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    write_frame(writer, &ResponseFrame::Trailers(trailers)).await
}
