//! Message codec: framing and serialization for messaging connections.

use std::fmt;
use std::io::ErrorKind;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use lanmesh_messages::Envelope;

use crate::text::{TextSerializer, END_MARKER};
use crate::ProtocolError;

/// Maximum frame body size in bytes.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024; // 16 MiB

/// Which framing a process speaks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Encoding {
    Native,
    Text,
}

/// Encoder/decoder for one process's chosen [`Encoding`].
///
/// Cloning is cheap; the text serializer is shared.
#[derive(Clone)]
pub enum WireCodec {
    Native,
    Text(Arc<dyn TextSerializer>),
}

impl WireCodec {
    pub fn text(serializer: Arc<dyn TextSerializer>) -> Self {
        Self::Text(serializer)
    }

    pub fn encoding(&self) -> Encoding {
        match self {
            Self::Native => Encoding::Native,
            Self::Text(_) => Encoding::Text,
        }
    }

    /// Encode an envelope into a complete frame, ready to be written.
    pub fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>, ProtocolError> {
        match self {
            Self::Native => {
                let body = bincode::serialize(envelope)
                    .map_err(|e| ProtocolError::Malformed(e.to_string()))?;
                if body.len() > MAX_FRAME_SIZE {
                    return Err(ProtocolError::FrameTooLarge {
                        size: body.len(),
                        max: MAX_FRAME_SIZE,
                    });
                }
                let mut frame = Vec::with_capacity(4 + body.len());
                frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
                frame.extend_from_slice(&body);
                Ok(frame)
            }
            Self::Text(serializer) => {
                let text = serializer.serialize(envelope)?;
                if text.as_bytes().contains(&END_MARKER) {
                    return Err(ProtocolError::MarkerInPayload);
                }
                if text.len() > MAX_FRAME_SIZE {
                    return Err(ProtocolError::FrameTooLarge {
                        size: text.len(),
                        max: MAX_FRAME_SIZE,
                    });
                }
                let mut frame = text.into_bytes();
                frame.push(END_MARKER);
                Ok(frame)
            }
        }
    }

    /// Size of the encoded frame in bytes.
    pub fn encoded_len(&self, envelope: &Envelope) -> Result<usize, ProtocolError> {
        match self {
            Self::Native => bincode::serialized_size(envelope)
                .map(|n| n as usize + 4)
                .map_err(|e| ProtocolError::Malformed(e.to_string())),
            Self::Text(_) => self.encode(envelope).map(|frame| frame.len()),
        }
    }

    /// Wrap a byte stream for frame-by-frame decoding.
    pub fn reader<R: AsyncRead + Unpin>(&self, stream: R) -> FrameReader<R> {
        FrameReader {
            inner: BufReader::new(stream),
            codec: self.clone(),
            buf: Vec::new(),
        }
    }
}

impl fmt::Debug for WireCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native => f.write_str("WireCodec::Native"),
            Self::Text(_) => f.write_str("WireCodec::Text"),
        }
    }
}

/// Pulls one envelope at a time off a stream.
///
/// Holds at most one frame's worth of state between calls.
pub struct FrameReader<R> {
    inner: BufReader<R>,
    codec: WireCodec,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Read the next envelope. `Ok(None)` means the stream ended cleanly.
    pub async fn read_frame(&mut self) -> Result<Option<Envelope>, ProtocolError> {
        self.buf.clear();
        let serializer = match &self.codec {
            WireCodec::Native => None,
            WireCodec::Text(serializer) => Some(Arc::clone(serializer)),
        };
        match serializer {
            None => self.read_native().await,
            Some(serializer) => self.read_text(serializer.as_ref()).await,
        }
    }

    async fn read_native(&mut self) -> Result<Option<Envelope>, ProtocolError> {
        if self.inner.fill_buf().await?.is_empty() {
            return Ok(None);
        }

        let mut len_buf = [0u8; 4];
        self.inner.read_exact(&mut len_buf).await.map_err(truncated)?;
        let body_len = u32::from_be_bytes(len_buf) as usize;
        if body_len > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: body_len,
                max: MAX_FRAME_SIZE,
            });
        }

        self.buf.resize(body_len, 0);
        self.inner.read_exact(&mut self.buf).await.map_err(truncated)?;
        bincode::deserialize(&self.buf)
            .map(Some)
            .map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    async fn read_text(
        &mut self,
        serializer: &dyn TextSerializer,
    ) -> Result<Option<Envelope>, ProtocolError> {
        let limit = MAX_FRAME_SIZE as u64 + 1;
        let n = (&mut self.inner)
            .take(limit)
            .read_until(END_MARKER, &mut self.buf)
            .await?;
        if n == 0 {
            return Ok(None);
        }

        if self.buf.last() == Some(&END_MARKER) {
            self.buf.pop();
        } else if self.buf.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: self.buf.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        // Otherwise the stream ended without a marker; what arrived is the message.

        let text = std::str::from_utf8(&self.buf)
            .map_err(|e| ProtocolError::Malformed(format!("text frame is not UTF-8: {e}")))?;
        serializer.deserialize(text).map(Some)
    }
}

fn truncated(e: std::io::Error) -> ProtocolError {
    if e.kind() == ErrorKind::UnexpectedEof {
        ProtocolError::Truncated
    } else {
        ProtocolError::Io(e)
    }
}

/// Write one already-encoded frame and flush.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8]) -> std::io::Result<()> {
    writer.write_all(frame).await?;
    writer.flush().await
}
