//! Known-peer registry with liveness timestamps.
//!
//! Shared between the heartbeat listener, the reaper, receive loops, the
//! broadcaster and the throughput estimator. Every operation takes the
//! internal lock for a short, non-blocking critical section, so concurrent
//! enumerators see whole entries or nothing.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use lanmesh_types::{Peer, Timestamp};

/// Result of [`PeerRegistry::upsert`].
#[derive(Clone, Debug)]
pub struct Upserted {
    /// The entry after the update.
    pub peer: Peer,
    /// `true` only when the address was not known before this call.
    pub created: bool,
}

struct Entry {
    peer: Peer,
    /// Position in `order`; bumped on every upsert.
    seq: u64,
}

#[derive(Default)]
struct Inner {
    peers: HashMap<String, Entry>,
    /// seq → address, oldest first.
    order: BTreeMap<u64, String>,
    next_seq: u64,
}

impl Inner {
    fn bump(&mut self, address: &str) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, address.to_string());
        seq
    }
}

/// Thread-safe store of known peers.
///
/// Point lookups go through a hash map. Enumeration follows
/// most-recent-insertion-or-update order and never copies the map:
/// [`PeerRegistry::for_each`] visits entries in place under the read lock.
#[derive(Default)]
pub struct PeerRegistry {
    inner: RwLock<Inner>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a peer, or refresh its online flag and `last_seen`.
    pub fn upsert(&self, address: &str, online: bool) -> Upserted {
        self.upsert_at(address, online, Timestamp::now())
    }

    /// [`PeerRegistry::upsert`] with an explicit clock reading.
    pub fn upsert_at(&self, address: &str, online: bool, now: Timestamp) -> Upserted {
        let mut guard = self.write();
        let inner = &mut *guard;

        let previous_seq = inner.peers.get(address).map(|e| e.seq);
        if let Some(seq) = previous_seq {
            inner.order.remove(&seq);
        }
        let seq = inner.bump(address);

        match inner.peers.get_mut(address) {
            Some(entry) => {
                entry.seq = seq;
                entry.peer.online = online;
                entry.peer.last_seen = now;
                Upserted {
                    peer: entry.peer.clone(),
                    created: false,
                }
            }
            None => {
                let peer = Peer::new(address, online, now);
                inner.peers.insert(
                    address.to_string(),
                    Entry {
                        peer: peer.clone(),
                        seq,
                    },
                );
                Upserted {
                    peer,
                    created: true,
                }
            }
        }
    }

    /// Refresh `last_seen` for a known peer. Returns `false` if unknown.
    pub fn touch(&self, address: &str) -> bool {
        self.touch_at(address, Timestamp::now())
    }

    pub fn touch_at(&self, address: &str, now: Timestamp) -> bool {
        match self.write().peers.get_mut(address) {
            Some(entry) => {
                entry.peer.last_seen = now;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, address: &str) -> Option<Peer> {
        let mut inner = self.write();
        let entry = inner.peers.remove(address)?;
        inner.order.remove(&entry.seq);
        Some(entry.peer)
    }

    /// Remove a peer only if it is still older than `limit` under the lock,
    /// so a heartbeat that raced the reaper's scan keeps the peer alive.
    pub fn remove_if_expired(&self, address: &str, now: Timestamp, limit: Duration) -> Option<Peer> {
        let mut inner = self.write();
        let expired = inner
            .peers
            .get(address)
            .is_some_and(|e| e.peer.last_seen.is_older_than(limit, now));
        if !expired {
            return None;
        }
        let entry = inner.peers.remove(address)?;
        inner.order.remove(&entry.seq);
        Some(entry.peer)
    }

    pub fn get(&self, address: &str) -> Option<Peer> {
        self.read().peers.get(address).map(|e| e.peer.clone())
    }

    pub fn contains(&self, address: &str) -> bool {
        self.read().peers.contains_key(address)
    }

    /// Visit every current peer exactly once without copying the registry.
    ///
    /// The read lock is held for the whole walk; `f` must not call back
    /// into the registry's mutating operations.
    pub fn for_each<F: FnMut(&Peer)>(&self, mut f: F) {
        let inner = self.read();
        for address in inner.order.values() {
            if let Some(entry) = inner.peers.get(address) {
                f(&entry.peer);
            }
        }
    }

    /// Snapshot of every current peer, in enumeration order.
    pub fn all(&self) -> Vec<Peer> {
        let mut out = Vec::with_capacity(self.count());
        self.for_each(|p| out.push(p.clone()));
        out
    }

    /// Addresses of the peers currently advertising themselves online.
    pub fn online_addresses(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.for_each(|p| {
            if p.online {
                out.push(p.address.clone());
            }
        });
        out
    }

    /// Peers whose `last_seen` is strictly older than `limit`.
    pub fn expired(&self, now: Timestamp, limit: Duration) -> Vec<Peer> {
        let mut out = Vec::new();
        self.for_each(|p| {
            if p.last_seen.is_older_than(limit, now) {
                out.push(p.clone());
            }
        });
        out
    }

    pub fn count(&self) -> usize {
        self.read().peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }
}
