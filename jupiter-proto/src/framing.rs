use crate::{Message, ProtocolError, Result};
use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

/// Default cap on buffered bytes that have not yet formed a frame (1MB)
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Extracts the next complete JSON object from `buf`.
///
/// Frames are found by brace counting from the first `{`. Braces inside
/// string values are counted like any other brace. Returns the decoded
/// message (if any) and how many bytes the caller should drop from the
/// front of the buffer. `(None, 0)` means more bytes are needed.
pub fn decode_next(buf: &[u8]) -> (Option<Message>, usize) {
    let mut search_from = 0;
    let mut dropped_malformed = false;

    while let Some(start) = find_open_brace(buf, search_from) {
        let Some(end) = find_closing_brace(buf, start) else {
            // Incomplete: keep everything from this opening brace onwards
            let consumed = if dropped_malformed { start } else { 0 };
            return (None, consumed);
        };

        let candidate = &buf[start..=end];
        match serde_json::from_slice::<Message>(candidate) {
            Ok(message) => {
                debug!("Decoded frame of {} bytes, type: {}", candidate.len(), message.msg_type);
                return (Some(message), end + 1);
            }
            Err(e) => {
                warn!(
                    "Dropping malformed frame ({} bytes): {} - {}",
                    candidate.len(),
                    e,
                    String::from_utf8_lossy(candidate)
                );
                dropped_malformed = true;
                search_from = start + 1;
            }
        }
    }

    let consumed = if dropped_malformed { buf.len() } else { 0 };
    (None, consumed)
}

fn find_open_brace(buf: &[u8], from: usize) -> Option<usize> {
    buf.get(from..)?
        .iter()
        .position(|&b| b == b'{')
        .map(|offset| from + offset)
}

fn find_closing_brace(buf: &[u8], start: usize) -> Option<usize> {
    let mut depth = 1usize;

    for (i, &b) in buf.iter().enumerate().skip(start + 1) {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}

/// Reads the next brace-delimited frame from an async reader.
///
/// `buf` carries leftover bytes between calls. Returns `Ok(None)` on EOF.
pub async fn read_frame<R>(
    reader: &mut R,
    buf: &mut BytesMut,
    max_buffer_size: usize,
) -> Result<Option<Message>>
where
    R: AsyncRead + Unpin,
{
    let mut codec = BraceFrameCodec::new(max_buffer_size);

    loop {
        if let Some(message) = tokio_util::codec::Decoder::decode(&mut codec, buf)? {
            return Ok(Some(message));
        }

        if reader.read_buf(buf).await? == 0 {
            debug!("Reader reached EOF with {} buffered bytes", buf.len());
            return Ok(None);
        }
    }
}

/// Writes a message as compact JSON followed by a newline, then flushes
pub async fn write_frame<W>(writer: &mut W, message: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut payload = serde_json::to_vec(message)?;
    payload.push(b'\n');

    debug!("Writing frame of {} bytes, type: {}", payload.len(), message.msg_type);

    writer.write_all(&payload).await?;
    writer.flush().await?;

    Ok(())
}

/// Codec for use with tokio_util::codec::Framed
pub struct BraceFrameCodec {
    max_buffer_size: usize,
}

impl BraceFrameCodec {
    pub fn new(max_buffer_size: usize) -> Self {
        Self { max_buffer_size }
    }
}

impl Default for BraceFrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BUFFER_SIZE)
    }
}

impl tokio_util::codec::Decoder for BraceFrameCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let (message, consumed) = decode_next(src);
        src.advance(consumed);

        if message.is_none() && src.len() > self.max_buffer_size {
            let buffered = src.len();
            warn!(
                "Discarding {} buffered bytes with no complete frame (max: {})",
                buffered, self.max_buffer_size
            );
            src.clear();
            return Err(ProtocolError::BufferOverflow(buffered, self.max_buffer_size));
        }

        Ok(message)
    }
}

impl tokio_util::codec::Encoder<Message> for BraceFrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<()> {
        let payload = serde_json::to_vec(&item)?;

        debug!("Encoding frame of {} bytes, type: {}", payload.len(), item.msg_type);

        dst.reserve(payload.len() + 1);
        dst.put_slice(&payload);
        dst.put_u8(b'\n');

        Ok(())
    }
}
