//! Length-prefixed framing over a byte stream.
//!
//! TCP delivers bytes, not messages: one read may return half a frame or
//! two frames at once. Each sealed envelope is therefore preceded by its
//! length as a big-endian `u32`.

use crate::error::{ProtocolError, ProtocolResult};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the length prefix in bytes.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Default upper bound on a frame body (1 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Writes one frame and flushes the writer.
///
/// A payload longer than `max_frame_size` is refused before any byte is
/// written, so the peer never sees a frame its own reader would reject.
pub async fn write_frame<W>(
    writer: &mut W,
    payload: &[u8],
    max_frame_size: usize,
) -> ProtocolResult<()>
where
    W: AsyncWrite + Unpin,
{
    if payload.is_empty() {
        return Err(ProtocolError::EmptyFrame);
    }
    let max = max_frame_size.min(u32::MAX as usize);
    if payload.len() > max {
        return Err(ProtocolError::FrameTooLarge {
            len: payload.len(),
            max,
        });
    }
    let len = payload.len() as u32;

    writer.write_u32(len).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame.
///
/// Returns `Ok(None)` when the stream ends before a frame header starts.
/// A stream that ends inside a frame is an [`io::ErrorKind::UnexpectedEof`]
/// error.
pub async fn read_frame<R>(reader: &mut R, max_frame_size: usize) -> ProtocolResult<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_SIZE];
    let first = reader.read(&mut header).await?;
    if first == 0 {
        return Ok(None);
    }
    if first < FRAME_HEADER_SIZE {
        reader.read_exact(&mut header[first..]).await?;
    }

    let len = u32::from_be_bytes(header) as usize;
    if len == 0 {
        return Err(ProtocolError::EmptyFrame);
    }
    if len > max_frame_size {
        return Err(ProtocolError::FrameTooLarge {
            len,
            max: max_frame_size,
        });
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            ProtocolError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("stream ended inside a {len}-byte frame"),
            ))
        } else {
            ProtocolError::Io(e)
        }
    })?;
    Ok(Some(body))
}
