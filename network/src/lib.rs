//! LAN networking layer for lanmesh.
//!
//! Handles multicast peer discovery and liveness, the shared peer registry,
//! pooled TCP messaging with per-connection receive loops, periodic
//! broadcasting, and round-trip throughput estimation.

pub mod broadcast;
pub mod connection;
pub mod discovery;
pub mod error;
pub mod metrics;
pub mod probe;
pub mod registry;
pub mod shutdown;
pub mod throughput;
pub mod transport;

pub use broadcast::BroadcastResult;
pub use connection::{ConnectionPool, PooledConnection};
pub use discovery::{DiscoveryConfig, DiscoveryService, DiscoveryState};
pub use error::{EstimatorError, NetworkError};
pub use metrics::NetworkMetrics;
pub use probe::ProbeRendezvous;
pub use registry::{PeerRegistry, Upserted};
pub use shutdown::ShutdownController;
pub use throughput::{EstimatorConfig, ScanResult, ThroughputEstimator};
pub use transport::{Transport, TransportConfig, CONNECT_TIMEOUT, DEFAULT_MESSAGE_PORT};
