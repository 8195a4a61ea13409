use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("config error: {0}")]
    Config(String),

    #[error("no usable network interface")]
    NoNetwork,

    #[error("network error: {0}")]
    Network(#[from] lanmesh_network::NetworkError),

    #[error("estimator error: {0}")]
    Estimator(#[from] lanmesh_network::EstimatorError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
