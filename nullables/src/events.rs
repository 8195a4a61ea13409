//! Recording consumer: captures callbacks instead of acting on them.

use std::sync::{Mutex, PoisonError};

use lanmesh_types::{Peer, PeerEvents};

/// One captured callback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PeerEvent {
    NewPeer(String),
    PeerLost(String),
    Data { source: String, payload: Vec<u8> },
}

/// A consumer that records every event in arrival order.
#[derive(Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<PeerEvent>>,
}

impl RecordingEvents {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: PeerEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    /// All events so far.
    pub fn events(&self) -> Vec<PeerEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn new_peers(&self) -> Vec<String> {
        self.filter(|e| match e {
            PeerEvent::NewPeer(a) => Some(a.clone()),
            _ => None,
        })
    }

    pub fn lost_peers(&self) -> Vec<String> {
        self.filter(|e| match e {
            PeerEvent::PeerLost(a) => Some(a.clone()),
            _ => None,
        })
    }

    pub fn payloads(&self) -> Vec<(String, Vec<u8>)> {
        self.filter(|e| match e {
            PeerEvent::Data { source, payload } => Some((source.clone(), payload.clone())),
            _ => None,
        })
    }

    fn filter<T>(&self, f: impl Fn(&PeerEvent) -> Option<T>) -> Vec<T> {
        self.events().iter().filter_map(f).collect()
    }

    /// Forget everything recorded so far.
    pub fn reset(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl PeerEvents for RecordingEvents {
    fn on_new_peer(&self, peer: &Peer) {
        self.push(PeerEvent::NewPeer(peer.address.clone()));
    }

    fn on_peer_lost(&self, peer: &Peer) {
        self.push(PeerEvent::PeerLost(peer.address.clone()));
    }

    fn on_data(&self, source: &str, payload: Vec<u8>) {
        self.push(PeerEvent::Data {
            source: source.to_string(),
            payload,
        });
    }
}
