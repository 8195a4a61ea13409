use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("no pooled connection to {0}")]
    NotConnected(String),

    #[error("{0} already started")]
    AlreadyStarted(&'static str),

    #[error("invalid address: {0}")]
    Address(#[from] lanmesh_types::TypesError),

    #[error("codec error: {0}")]
    Codec(#[from] lanmesh_protocol::ProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a throughput estimate could not be produced.
#[derive(Debug, Error)]
pub enum EstimatorError {
    #[error("no peers known")]
    NoPeers,

    #[error("another scan is already in flight")]
    ScanInFlight,

    #[error("probe to {peer} timed out")]
    ProbeTimeout { peer: String },

    #[error("link speed unavailable")]
    LinkUnavailable,

    #[error("sample message encodes to zero bytes")]
    EmptySample,

    #[error("probe transport error: {0}")]
    Transport(#[from] NetworkError),

    #[error("codec error: {0}")]
    Codec(#[from] lanmesh_protocol::ProtocolError),
}
