//! Fundamental types for lanmesh.
//!
//! This crate defines the pieces shared by every other crate in the
//! workspace: the peer record, timestamps, address parsing, and the traits
//! through which applications and platform sensors plug into the core.

pub mod address;
pub mod error;
pub mod events;
pub mod link;
pub mod peer;
pub mod time;

pub use address::{peer_address_for, socket_addr_for};
pub use error::TypesError;
pub use events::{NoopEvents, PeerEvents, Producer};
pub use link::{LinkSensor, StaticLink, SIGNAL_LEVELS};
pub use peer::Peer;
pub use time::Timestamp;
