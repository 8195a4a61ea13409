//! Application-facing collaborator traits.
//!
//! The core never interprets payloads. It asks a [`Producer`] what to
//! broadcast and reports peer and data events to a [`PeerEvents`] consumer.
//! Callbacks run on whichever task detected the event, so implementations
//! must return quickly.

use crate::Peer;

/// Receives peer lifecycle and data notifications.
pub trait PeerEvents: Send + Sync {
    /// A peer was seen for the first time.
    fn on_new_peer(&self, peer: &Peer);

    /// A peer timed out or its connection failed.
    fn on_peer_lost(&self, peer: &Peer);

    /// An application payload arrived from `source`.
    fn on_data(&self, source: &str, payload: Vec<u8>);
}

/// Supplies the local payload for each broadcast tick.
pub trait Producer: Send + Sync {
    /// `None` skips this tick.
    fn produce(&self) -> Option<Vec<u8>>;
}

/// Consumer used when the application registered none (discovery-only nodes).
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopEvents;

impl PeerEvents for NoopEvents {
    fn on_new_peer(&self, _peer: &Peer) {}
    fn on_peer_lost(&self, _peer: &Peer) {}
    fn on_data(&self, _source: &str, _payload: Vec<u8>) {}
}

impl<F> Producer for F
where
    F: Fn() -> Option<Vec<u8>> + Send + Sync,
{
    fn produce(&self) -> Option<Vec<u8>> {
        self()
    }
}
