//! Rendezvous between a waiting throughput scan and the receive loop that
//! sees its echoed probe.
//!
//! Only one probe is outstanding at a time (scans are single-flight), so a
//! single slot is enough. Completing an id nobody waits for is a no-op,
//! which is how late echoes from a timed-out probe are dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tokio::sync::oneshot;

type Waiter = (u64, oneshot::Sender<Instant>);

#[derive(Default)]
pub struct ProbeRendezvous {
    next_id: AtomicU64,
    waiting: Mutex<Option<Waiter>>,
}

impl ProbeRendezvous {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<Waiter>> {
        self.waiting.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fresh probe id, unique for this process.
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Register interest in probe `id`. Resolves with the arrival instant.
    pub fn expect(&self, id: u64) -> oneshot::Receiver<Instant> {
        let (tx, rx) = oneshot::channel();
        *self.slot() = Some((id, tx));
        rx
    }

    /// Called by a receive loop when a `ProbeReturn` arrives.
    pub fn complete(&self, id: u64) -> bool {
        let arrived = Instant::now();
        let mut slot = self.slot();
        match slot.take() {
            Some((waiting, tx)) if waiting == id => tx.send(arrived).is_ok(),
            other => {
                *slot = other;
                false
            }
        }
    }

    /// Drop the waiter for `id` if it is still registered.
    pub fn cancel(&self, id: u64) {
        let mut slot = self.slot();
        if matches!(slot.as_ref(), Some((waiting, _)) if *waiting == id) {
            *slot = None;
        }
    }

    pub fn is_waiting(&self) -> bool {
        self.slot().is_some()
    }
}
