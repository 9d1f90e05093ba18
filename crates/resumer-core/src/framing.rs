//! Length-prefixed JSON framing shared by the resumer and directory protocols.
//!
//! Frame: [4 bytes length LE][JSON payload]

use resumer_traits::ResumerError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("connection closed")]
    Closed,

    #[error("frame of {0} bytes exceeds the size limit")]
    TooLarge(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid frame: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<FrameError> for ResumerError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Closed | FrameError::Io(_) => ResumerError::Transport(err.to_string()),
            FrameError::TooLarge(_) | FrameError::Json(_) => {
                ResumerError::Protocol(err.to_string())
            }
        }
    }
}

pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let json = serde_json::to_vec(value)?;
    if json.len() > MAX_MESSAGE_SIZE {
        return Err(FrameError::TooLarge(json.len()));
    }
    writer.write_all(&(json.len() as u32).to_le_bytes()).await?;
    writer.write_all(&json).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. A peer that closes cleanly between frames yields
/// `FrameError::Closed`.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T, FrameError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    if let Err(err) = reader.read_exact(&mut len_buf).await {
        return Err(match err.kind() {
            std::io::ErrorKind::UnexpectedEof => FrameError::Closed,
            _ => FrameError::Io(err),
        });
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(FrameError::TooLarge(len));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(serde_json::from_slice(&buf)?)
}
