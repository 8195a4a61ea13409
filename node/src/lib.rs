//! lanmesh node: configuration and lifecycle.
//!
//! The node is the single entry point an application uses:
//! - Loads and validates [`NodeConfig`]
//! - Resolves the address it advertises to peers
//! - Wires discovery, transport and the throughput estimator around one
//!   shared peer registry
//! - Starts and stops the background roles on request

pub mod config;
pub mod error;
pub mod local_address;
pub mod logging;
pub mod node;
pub mod tracing_spans;

pub use config::NodeConfig;
pub use error::NodeError;
pub use local_address::{resolve_local_address, resolve_local_ip};
pub use logging::{init_logging, LogFormat};
pub use node::{LanNode, NodeStats, StartOptions};
