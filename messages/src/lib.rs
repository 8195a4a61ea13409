//! Message types for lanmesh host-to-host communication.
//!
//! Two wire formats live here: the [`Envelope`] carried over messaging
//! connections, and the [`Heartbeat`] datagram multicast by discovery.

pub mod envelope;
pub mod heartbeat;

pub use envelope::{Envelope, MessageBody, MessageKind, Probe};
pub use heartbeat::{Heartbeat, HeartbeatError, HEARTBEAT_FIELD_SEPARATOR};
