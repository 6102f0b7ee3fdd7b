//! Wire protocol utilities
//!
//! Async framing of handshakes and length-prefixed messages over any byte
//! stream.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use super::handshake::HANDSHAKE_LEN;
use super::{Handshake, Message};
use crate::error::{Result, TorrentError};

/// Upper bound on one frame; larger length prefixes are treated as garbage
pub const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

/// Read a complete message from the stream
///
/// A zero length prefix yields `Message::KeepAlive`. A stream that ends
/// mid-frame fails with `ConnectionClosed`.
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Message> {
    let length = reader.read_u32().await? as usize;
    if length == 0 {
        trace!("Received keep-alive");
        return Ok(Message::KeepAlive);
    }

    if length > MAX_FRAME_LEN {
        return Err(TorrentError::MalformedMessage(format!(
            "frame length {} exceeds {}",
            length, MAX_FRAME_LEN
        )));
    }

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;
    Message::from_body(&body)
}

/// Write a message to the stream
pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, message: &Message) -> Result<()> {
    writer.write_all(&message.serialize()).await?;
    writer.flush().await?;
    trace!("Sent {:?}", message.message_id());
    Ok(())
}

/// Read a handshake from the stream
pub async fn read_handshake<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Handshake> {
    let mut buf = [0u8; HANDSHAKE_LEN];
    reader.read_exact(&mut buf).await?;
    Handshake::deserialize(&buf)
}

/// Write a handshake to the stream
pub async fn write_handshake<W: AsyncWrite + Unpin>(writer: &mut W, handshake: &Handshake) -> Result<()> {
    writer.write_all(&handshake.serialize()).await?;
    writer.flush().await?;
    Ok(())
}
