//! Redirect-following client.
//!
//! Conversation-scoped calls go to the configured replica first. A redirect
//! trailer closes that connection and the same request, with the same
//! credentials, is retried against the owner. At most
//! [`MAX_REDIRECT_HOPS`] connections are made per call.

use resumer_traits::{Credentials, Result, ResumerError};
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::framing::{read_frame, write_frame};
use crate::protocol::{
    RecordAck, RecordChunk, RequestEnvelope, ResponseFrame, ResumerRequest, ResumerResponse,
    StatusCode,
};

/// Network calls allowed per request, counting the first one.
pub const MAX_REDIRECT_HOPS: usize = 3;

#[derive(Debug, Clone)]
pub struct ResumerClient {
    address: String,
    credentials: Credentials,
    connect_timeout: Duration,
}

impl ResumerClient {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            credentials: Credentials::default(),
            connect_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub async fn is_enabled(&self) -> Result<bool> {
        match self.unary(ResumerRequest::IsEnabled).await? {
            ResumerResponse::Enabled { enabled } => Ok(enabled),
            other => Err(unexpected(&other)),
        }
    }

    /// Ask the producer of `conversation_id` to stop. `false` when nothing
    /// is being recorded.
    pub async fn cancel(&self, conversation_id: &str) -> Result<bool> {
        let request = ResumerRequest::Cancel {
            conversation_id: conversation_id.to_string(),
        };
        match self.unary(request).await? {
            ResumerResponse::Cancel { accepted } => Ok(accepted),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn check(&self, conversation_ids: &[String]) -> Result<Vec<String>> {
        let request = ResumerRequest::Check {
            conversation_ids: conversation_ids.to_vec(),
        };
        match self.unary(request).await? {
            ResumerResponse::Check { conversation_ids } => Ok(conversation_ids),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn has_response_in_progress(&self, conversation_id: &str) -> Result<bool> {
        let request = ResumerRequest::HasResponseInProgress {
            conversation_id: conversation_id.to_string(),
        };
        match self.unary(request).await? {
            ResumerResponse::InProgress { in_progress } => Ok(in_progress),
            other => Err(unexpected(&other)),
        }
    }

    /// Replay tokens from `resume_position` onward.
    pub async fn replay(&self, conversation_id: &str, resume_position: u64) -> Result<ReplayStream> {
        let mut stream = ReplayStream {
            client: self.clone(),
            conversation_id: conversation_id.to_string(),
            position: resume_position,
            call: None,
            finished: false,
        };
        stream.resume().await?;
        Ok(stream)
    }

    /// Open a recording on the configured replica. Recording is never
    /// redirected.
    pub async fn record(&self, conversation_id: &str) -> Result<RecordSession> {
        let mut stream = self.connect(&self.address).await?;
        let envelope = RequestEnvelope {
            credentials: self.credentials.clone(),
            hop: 0,
            request: ResumerRequest::Record {
                conversation_id: conversation_id.to_string(),
                token: None,
                complete: false,
            },
        };
        write_frame(&mut stream, &envelope).await?;

        let mut session = RecordSession {
            stream,
            conversation_id: conversation_id.to_string(),
            cancel_requested: false,
            position: 0,
            finished: false,
        };
        session.read_ack().await?;
        Ok(session)
    }

    async fn connect(&self, address: &str) -> Result<TcpStream> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| ResumerError::Transport(format!("timed out connecting to {address}")))?
            .map_err(|err| ResumerError::Transport(format!("failed to connect to {address}: {err}")))?;
        let _ = stream.set_nodelay(true);
        Ok(stream)
    }

    /// Send `request`, following redirects, and return the open call with
    /// its first non-redirect frame.
    async fn dial(&self, request: &ResumerRequest) -> Result<Call> {
        let mut address = self.address.clone();
        for hop in 0..MAX_REDIRECT_HOPS {
            let mut stream = self.connect(&address).await?;
            let envelope = RequestEnvelope {
                credentials: self.credentials.clone(),
                hop: hop as u8,
                request: request.clone(),
            };
            write_frame(&mut stream, &envelope).await?;

            match read_frame::<_, ResponseFrame>(&mut stream).await? {
                ResponseFrame::Trailers(trailers) if trailers.status == StatusCode::Redirect => {
                    let target = trailers.redirect_target().ok_or_else(|| {
                        ResumerError::Protocol("redirect without a valid target".to_string())
                    })?;
                    debug!(
                        hop,
                        request = request.name(),
                        from = %address,
                        to = %target,
                        "Following redirect"
                    );
                    drop(stream);
                    address = target.authority();
                }
                first => {
                    return Ok(Call {
                        stream,
                        first: Some(first),
                    });
                }
            }
        }

        warn!(
            hops = MAX_REDIRECT_HOPS,
            request = request.name(),
            "Redirect limit reached"
        );
        Err(ResumerError::RedirectLoop {
            hops: MAX_REDIRECT_HOPS,
        })
    }

    async fn unary(&self, request: ResumerRequest) -> Result<ResumerResponse> {
        let mut call = self.dial(&request).await?;
        let mut response = None;
        loop {
            match call.next_frame().await? {
                ResponseFrame::Message(message) => response = Some(message),
                ResponseFrame::Trailers(trailers) if trailers.is_ok() => break,
                ResponseFrame::Trailers(trailers) => {
                    return Err(trailers.into_error(request.conversation_id()));
                }
            }
        }
        response.ok_or_else(|| {
            ResumerError::Protocol(format!("{} returned no response", request.name()))
        })
    }
}

fn unexpected(response: &ResumerResponse) -> ResumerError {
    ResumerError::Protocol(format!("unexpected response: {response:?}"))
}

struct Call {
    stream: TcpStream,
    first: Option<ResponseFrame>,
}

impl Call {
    async fn next_frame(&mut self) -> Result<ResponseFrame> {
        if let Some(frame) = self.first.take() {
            return Ok(frame);
        }
        Ok(read_frame(&mut self.stream).await?)
    }
}

/// Tokens of one replay call.
pub struct ReplayStream {
    client: ResumerClient,
    conversation_id: String,
    position: u64,
    call: Option<Call>,
    finished: bool,
}

impl ReplayStream {
    /// Next token, or `None` once the recording completed (or nothing was
    /// being recorded).
    pub async fn next(&mut self) -> Result<Option<String>> {
        if self.finished {
            return Ok(None);
        }
        let Some(call) = self.call.as_mut() else {
            return Err(ResumerError::Transport(
                "replay connection lost; call resume()".to_string(),
            ));
        };
        let frame = match call.next_frame().await {
            Ok(frame) => frame,
            Err(err) => {
                self.call = None;
                return Err(err);
            }
        };
        match frame {
            ResponseFrame::Message(ResumerResponse::Token { token, position }) => {
                self.position = position;
                Ok(Some(token))
            }
            ResponseFrame::Message(other) => Err(unexpected(&other)),
            ResponseFrame::Trailers(trailers) => {
                self.finished = true;
                self.call = None;
                if trailers.is_ok() {
                    Ok(None)
                } else {
                    Err(trailers.into_error(Some(&self.conversation_id)))
                }
            }
        }
    }

    /// Chunks received so far, counting the starting offset.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Reconnect from the last position seen.
    pub async fn resume(&mut self) -> Result<()> {
        let request = ResumerRequest::Replay {
            conversation_id: self.conversation_id.clone(),
            resume_position: self.position,
        };
        let call = self.client.dial(&request).await?;
        if let Some(ResponseFrame::Trailers(trailers)) = &call.first
            && !trailers.is_ok()
        {
            let trailers = trailers.clone();
            return Err(trailers.into_error(Some(&self.conversation_id)));
        }
        debug!(
            conversation_id = %self.conversation_id,
            position = self.position,
            "Replay connected"
        );
        self.call = Some(call);
        self.finished = false;
        Ok(())
    }

    /// Drain the remaining tokens.
    pub async fn collect(mut self) -> Result<Vec<String>> {
        let mut tokens = Vec::new();
        while let Some(token) = self.next().await? {
            tokens.push(token);
        }
        Ok(tokens)
    }
}

/// Producer side of a `Record` call.
pub struct RecordSession {
    stream: TcpStream,
    conversation_id: String,
    cancel_requested: bool,
    position: u64,
    finished: bool,
}

impl RecordSession {
    pub async fn send(&mut self, token: impl Into<String>) -> Result<RecordAck> {
        self.send_chunk(RecordChunk {
            token: Some(token.into()),
            complete: false,
        })
        .await
    }

    /// Finish the recording and wait for the server to close the call.
    pub async fn complete(mut self) -> Result<RecordAck> {
        let ack = self
            .send_chunk(RecordChunk {
                token: None,
                complete: true,
            })
            .await?;
        self.finished = true;
        match read_frame::<_, ResponseFrame>(&mut self.stream).await? {
            ResponseFrame::Trailers(trailers) if trailers.is_ok() => Ok(ack),
            ResponseFrame::Trailers(trailers) => {
                Err(trailers.into_error(Some(&self.conversation_id)))
            }
            ResponseFrame::Message(other) => Err(unexpected(&other)),
        }
    }

    /// Whether any acknowledgement so far asked the producer to stop.
    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    async fn send_chunk(&mut self, chunk: RecordChunk) -> Result<RecordAck> {
        if self.finished {
            return Err(ResumerError::invalid_argument("recording already completed"));
        }
        write_frame(&mut self.stream, &chunk).await?;
        self.read_ack().await
    }

    async fn read_ack(&mut self) -> Result<RecordAck> {
        match read_frame::<_, ResponseFrame>(&mut self.stream).await? {
            ResponseFrame::Message(ResumerResponse::RecordAck(ack)) if ack.success => {
                self.cancel_requested |= ack.cancel_requested;
                self.position = ack.position;
                Ok(ack)
            }
            ResponseFrame::Message(ResumerResponse::RecordAck(ack)) => {
                self.finished = true;
                // The failed ack is followed by trailers carrying the typed error.
                match read_frame::<_, ResponseFrame>(&mut self.stream).await {
                    Ok(ResponseFrame::Trailers(trailers)) if !trailers.is_ok() => {
                        Err(trailers.into_error(Some(&self.conversation_id)))
                    }
                    _ => Err(ResumerError::Internal(
                        ack.error_message
                            .unwrap_or_else(|| "record rejected".to_string()),
                    )),
                }
            }
            ResponseFrame::Message(other) => Err(unexpected(&other)),
            ResponseFrame::Trailers(trailers) => {
                self.finished = true;
                if trailers.is_ok() {
                    Err(ResumerError::Protocol("record call closed early".to_string()))
                } else {
                    Err(trailers.into_error(Some(&self.conversation_id)))
                }
            }
        }
    }
}
