//! Nullable collaborators for deterministic testing.
//!
//! The core talks to applications and platform sensors only through the
//! traits in `lanmesh-types`. This crate provides implementations that:
//! - Record every callback for later assertions
//! - Return values the test controls programmatically
//! - Never touch the network or the radio
//!
//! Usage: hand these to the services under test instead of real collaborators.

pub mod events;
pub mod link;
pub mod producer;

pub use events::{PeerEvent, RecordingEvents};
pub use link::NullLink;
pub use producer::NullProducer;
