//! Length-prefixed bincode framing for the reliable stream transport.
//!
//! Each frame is a big-endian `u32` payload length followed by the bincode
//! encoding of one [`Packet`].

use crate::Packet;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const MAX_FRAME_LEN: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed packet: {0}")]
    Malformed(#[from] bincode::Error),
    #[error("frame of {0} bytes exceeds the {MAX_FRAME_LEN} byte limit")]
    FrameTooLarge(usize),
}

pub fn encode(packet: &Packet) -> Result<Vec<u8>, CodecError> {
    let payload = bincode::serialize(packet)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge(payload.len()));
    }

    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

pub async fn write_packet<W>(writer: &mut W, packet: &Packet) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode(packet)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame. Returns `Ok(None)` when the peer closed the stream
/// cleanly between frames.
pub async fn read_packet<R>(reader: &mut R) -> Result<Option<Packet>, CodecError>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    if len > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge(len));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(bincode::deserialize(&payload)?))
}
