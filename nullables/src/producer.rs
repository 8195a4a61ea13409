//! Nullable producer: hands out scripted payloads and counts calls.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use lanmesh_types::Producer;

/// A producer that returns queued payloads first, then a fixed fallback.
#[derive(Default)]
pub struct NullProducer {
    queued: Mutex<VecDeque<Option<Vec<u8>>>>,
    fallback: Mutex<Option<Vec<u8>>>,
    calls: AtomicUsize,
}

impl NullProducer {
    /// Always produces `payload`.
    pub fn repeating(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            fallback: Mutex::new(Some(payload.into())),
            ..Self::default()
        }
    }

    /// Never produces anything.
    pub fn silent() -> Self {
        Self::default()
    }

    /// Queue a one-off answer for the next tick. `None` skips that tick.
    pub fn push(&self, payload: Option<Vec<u8>>) {
        self.queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(payload);
    }

    pub fn set_fallback(&self, payload: Option<Vec<u8>>) {
        *self.fallback.lock().unwrap_or_else(PoisonError::into_inner) = payload;
    }

    /// How many times `produce` has been called.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Producer for NullProducer {
    fn produce(&self) -> Option<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(next) = self
            .queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
        {
            return next;
        }
        self.fallback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queued_answers_come_before_fallback() {
        let producer = NullProducer::repeating(b"tick".to_vec());
        producer.push(None);
        producer.push(Some(b"once".to_vec()));

        assert_eq!(producer.produce(), None);
        assert_eq!(producer.produce(), Some(b"once".to_vec()));
        assert_eq!(producer.produce(), Some(b"tick".to_vec()));
        assert_eq!(producer.calls(), 3);
    }

    #[test]
    fn silent_producer_skips_every_tick() {
        let producer = NullProducer::silent();
        assert_eq!(producer.produce(), None);
        assert_eq!(producer.produce(), None);
    }
}
