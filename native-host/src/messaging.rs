//! Native-messaging framing and message types.
//!
//! Each frame is a 4-byte length in native byte order followed by that many
//! bytes of UTF-8 JSON.

use log::error;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use scenecraft::config::Settings;
use scenecraft::{GameElement, RenderStats, StatusSignal, TabSnapshot};

use crate::error::HostError;

/// Largest frame accepted in either direction.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InboundMessage {
    #[serde(rename_all = "camelCase")]
    ElementsChanged {
        tab_id: i64,
        url: String,
        elements: Vec<GameElement>,
    },
    Regenerate {
        #[serde(default)]
        tabs: Vec<TabSnapshot>,
    },
    SettingsChanged {
        settings: Box<Settings>,
    },
    Ping,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OutboundMessage {
    #[serde(rename_all = "camelCase")]
    Render {
        tab_id: i64,
        image_url: String,
        prompt: String,
        stats: RenderStats,
    },
    Status {
        status: StatusSignal,
    },
    Pong,
    Error {
        message: String,
    },
}

/// Reads one frame. `Ok(None)` means the browser closed the pipe.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>, HostError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(HostError::Io(e)),
    }
    let len = u32::from_ne_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(HostError::FrameTooLarge(len));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<(), HostError> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(HostError::FrameTooLarge(payload.len()));
    }
    let len = payload.len() as u32;
    writer.write_all(&len.to_ne_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

pub fn decode(payload: &[u8]) -> Result<InboundMessage, HostError> {
    Ok(serde_json::from_slice(payload)?)
}

pub async fn send<W: AsyncWrite + Unpin>(writer: &mut W, message: &OutboundMessage) -> Result<(), HostError> {
    let payload = serde_json::to_vec(message)?;
    write_frame(writer, &payload).await
}

/// Drains the outbound queue into `writer` until every sender is gone.
///
/// A message that does not fit in one frame is replaced by an error status.
/// Only I/O failures end the loop.
pub async fn run_writer<W: AsyncWrite + Unpin>(
    writer: &mut W,
    outbound: &mut mpsc::UnboundedReceiver<OutboundMessage>,
) -> Result<(), HostError> {
    while let Some(message) = outbound.recv().await {
        match send(writer, &message).await {
            Ok(()) => {}
            Err(HostError::Io(e)) => return Err(HostError::Io(e)),
            Err(e) => {
                error!("Dropping outbound message: {}", e);
                send(
                    writer,
                    &OutboundMessage::Status {
                        status: StatusSignal::Error,
                    },
                )
                .await?;
            }
        }
    }
    Ok(())
}
