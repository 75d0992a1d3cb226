//! Length-prefixed message framing over an async byte stream: a `u32`
//! big-endian length prefix followed by the opcode-tagged payload. Each
//! `write_frame` call puts exactly one message on the wire and each
//! `read_frame` call reads exactly one back out, so callers never need to
//! buffer more than one message at a time.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::CodecError;

/// Frames larger than this are rejected outright rather than accepted into
/// an unbounded allocation -- a corrupt or hostile length prefix must not be
/// able to exhaust memory.
const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    payload: &[u8],
) -> std::io::Result<()> {
    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}

pub async fn read_frame<R: AsyncReadExt + Unpin>(
    reader: &mut R,
) -> std::io::Result<Option<Vec<u8>>> {
    let len = match reader.read_u32().await {
        Ok(len) => len,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };
    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "frame length exceeds maximum",
        ));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    Ok(Some(buf))
}

/// Convenience combining `read_frame` with `decode_payload`, surfacing
/// protocol/decode failures as `CodecError` instead of closing the
/// connection -- the caller decides whether a decode error is fatal for
/// the connection or just that one frame.
pub async fn read_decoded<R: AsyncReadExt + Unpin>(
    reader: &mut R,
) -> std::io::Result<Option<Result<super::Frame, CodecError>>> {
    Ok(read_frame(reader).await?.map(|bytes| super::decode_payload(&bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_payload() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"hello").await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let frame = read_frame(&mut cursor).await.unwrap().unwrap();
        assert_eq!(frame, b"hello");
    }

    #[tokio::test]
    async fn empty_stream_yields_none() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        assert!(read_frame(&mut cursor).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_length_prefix_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_FRAME_LEN + 1).to_be_bytes());
        let mut cursor = std::io::Cursor::new(buf);
        assert!(read_frame(&mut cursor).await.is_err());
    }
}
