use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::IpcError;

/// Maximum payload size accepted by framing helpers.
pub const MAX_FRAME_SIZE: u32 = 64 * 1024 * 1024;

/// Maximum number of frames in one multipart message.
pub const MAX_FRAMES: u32 = 1024;

/// Writes one length-prefixed frame to the async writer without flushing.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
) -> Result<(), IpcError> {
    let size = frame_size(payload)?;
    writer.write_all(&size.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    Ok(())
}

/// Reads one length-prefixed frame from the async reader.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, IpcError> {
    let mut header = [0_u8; 4];
    reader.read_exact(&mut header).await?;

    let size = u32::from_be_bytes(header);
    if size > MAX_FRAME_SIZE {
        return Err(IpcError::FrameTooLarge {
            size: u64::from(size),
            max: MAX_FRAME_SIZE,
        });
    }

    let mut payload = vec![0_u8; size as usize];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Writes a multipart message: a frame count followed by each frame.
///
/// An oversized frame aborts the write part way; the stream is unusable after
/// any error.
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frames: &[Vec<u8>],
) -> Result<(), IpcError> {
    if frames.is_empty() {
        return Err(IpcError::Encode("message needs at least one frame".to_string()));
    }
    if frames.len() > MAX_FRAMES as usize {
        return Err(IpcError::TooManyFrames {
            count: u32::try_from(frames.len()).unwrap_or(u32::MAX),
            max: MAX_FRAMES,
        });
    }
    let count = frames.len() as u32;
    writer.write_all(&count.to_be_bytes()).await?;
    for frame in frames {
        write_frame(writer, frame).await?;
    }
    writer.flush().await?;
    Ok(())
}

/// Reads one multipart message written by [`write_message`].
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<Vec<u8>>, IpcError> {
    let mut header = [0_u8; 4];
    reader.read_exact(&mut header).await?;

    let count = u32::from_be_bytes(header);
    if count > MAX_FRAMES {
        return Err(IpcError::TooManyFrames {
            count,
            max: MAX_FRAMES,
        });
    }
    if count == 0 {
        return Err(IpcError::Malformed("message has no frames".to_string()));
    }

    let mut frames = Vec::with_capacity(count as usize);
    for _ in 0..count {
        frames.push(read_frame(reader).await?);
    }
    Ok(frames)
}

fn frame_size(payload: &[u8]) -> Result<u32, IpcError> {
    let size = payload.len() as u64;
    match u32::try_from(size) {
        Ok(size) if size <= MAX_FRAME_SIZE => Ok(size),
        _ => Err(IpcError::FrameTooLarge {
            size,
            max: MAX_FRAME_SIZE,
        }),
    }
}
