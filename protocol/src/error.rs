use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame too large: {size} > {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("stream ended inside a frame")]
    Truncated,

    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("rendered text contains the end marker")]
    MarkerInPayload,

    #[error("serializer error: {0}")]
    Serializer(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
