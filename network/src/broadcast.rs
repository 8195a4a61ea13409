//! Periodic fan-out of the application's payload.
//!
//! The broadcaster asks the [`Producer`] for a payload every tick and sends
//! it to every online peer that has a pooled connection. The interval is a
//! pause after each fan-out, not a fixed rate.

use std::sync::{Arc, PoisonError};

use tokio::sync::broadcast;

use lanmesh_messages::MessageBody;
use lanmesh_types::Producer;

use crate::{NetworkError, ShutdownController, Transport};

/// Outcome of one fan-out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastResult {
    /// Peers the frame was written to.
    pub sent: usize,
    /// Peers whose write failed; they were dropped.
    pub failed: usize,
}

impl Transport {
    /// Spawn the broadcast loop. One per transport.
    pub fn start_broadcaster(self: &Arc<Self>, producer: Arc<dyn Producer>) -> Result<(), NetworkError> {
        let stop = Arc::new(ShutdownController::new());
        {
            let mut slot = self
                .broadcaster
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if slot.is_some() {
                return Err(NetworkError::AlreadyStarted("broadcaster"));
            }
            *slot = Some(Arc::clone(&stop));
        }

        let stop_rx = stop.subscribe();
        let transport = Arc::clone(self);
        tokio::spawn(async move { transport.broadcast_loop(producer, stop, stop_rx).await });
        tracing::info!(
            interval_ms = self.config.broadcast_interval.as_millis() as u64,
            "broadcaster started"
        );
        Ok(())
    }

    pub fn stop_broadcaster(&self) {
        let stop = self
            .broadcaster
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(stop) = stop {
            stop.shutdown();
            tracing::info!("broadcaster stopped");
        }
    }

    pub fn broadcaster_running(&self) -> bool {
        self.broadcaster
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    async fn broadcast_loop(
        self: Arc<Self>,
        producer: Arc<dyn Producer>,
        stop: Arc<ShutdownController>,
        mut stop_rx: broadcast::Receiver<()>,
    ) {
        loop {
            if stop.is_shutdown() {
                break;
            }
            self.broadcast_once(producer.as_ref()).await;

            tokio::select! {
                biased;
                _ = stop_rx.recv() => break,
                _ = tokio::time::sleep(self.config.broadcast_interval) => {}
            }
        }
        tracing::debug!("broadcast loop exited");
    }

    /// One tick: skip when nothing is pooled or the producer has nothing.
    pub async fn broadcast_once(&self, producer: &dyn Producer) -> BroadcastResult {
        if self.pool().addresses().is_empty() {
            return BroadcastResult::default();
        }
        let Some(payload) = producer.produce() else {
            return BroadcastResult::default();
        };

        match self.send_to_all(&MessageBody::Application(payload)).await {
            Ok(result) => {
                if result.failed > 0 {
                    tracing::debug!(sent = result.sent, failed = result.failed, "broadcast had failures");
                }
                result
            }
            Err(e) => {
                tracing::warn!(error = %e, "broadcast payload could not be encoded");
                BroadcastResult::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NetworkMetrics, PeerRegistry, ProbeRendezvous, TransportConfig};
    use lanmesh_nullables::{NullProducer, RecordingEvents};
    use lanmesh_protocol::WireCodec;
    use std::time::Duration;

    fn transport(local: &str, registry: Arc<PeerRegistry>, events: Arc<RecordingEvents>) -> Arc<Transport> {
        let mut config = TransportConfig::new(local, 0);
        config.listen_addr = "127.0.0.1:0".parse().unwrap();
        config.broadcast_interval = Duration::from_millis(10);
        Arc::new(Transport::new(
            config,
            WireCodec::Native,
            registry,
            events,
            Arc::new(ProbeRendezvous::new()),
            Arc::new(NetworkMetrics::new()),
        ))
    }

    #[tokio::test]
    async fn empty_pool_skips_producer() {
        let t = transport(
            "127.0.0.1:1",
            Arc::new(PeerRegistry::new()),
            Arc::new(RecordingEvents::new()),
        );
        let producer = NullProducer::repeating(b"x".to_vec());
        assert_eq!(t.broadcast_once(&producer).await, BroadcastResult::default());
        assert_eq!(producer.calls(), 0);
    }

    #[tokio::test]
    async fn broadcaster_delivers_until_stopped() {
        let rx_events = Arc::new(RecordingEvents::new());
        let rx = transport("127.0.0.1:7101", Arc::new(PeerRegistry::new()), rx_events.clone());
        let target = rx.start_listener().await.unwrap().to_string();

        let registry = Arc::new(PeerRegistry::new());
        registry.upsert(&target, true);
        let tx = transport("127.0.0.1:7102", registry, Arc::new(RecordingEvents::new()));
        assert!(tx.connect(&target).await);

        let producer = Arc::new(NullProducer::repeating(b"status".to_vec()));
        tx.start_broadcaster(producer.clone()).unwrap();
        assert!(matches!(
            tx.start_broadcaster(producer.clone()),
            Err(NetworkError::AlreadyStarted("broadcaster"))
        ));

        let mut delivered = false;
        for _ in 0..200 {
            if rx_events.payloads().len() >= 3 {
                delivered = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(delivered);
        assert!(rx_events
            .payloads()
            .iter()
            .all(|(source, payload)| source == "127.0.0.1:7102" && payload == b"status"));

        tx.stop_broadcaster();
        assert!(!tx.broadcaster_running());
        tokio::time::sleep(Duration::from_millis(50)).await;
        let calls = producer.calls();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(producer.calls(), calls);

        tx.shutdown().await;
        rx.shutdown().await;
    }

    #[tokio::test]
    async fn skipped_tick_sends_nothing() {
        let rx = transport(
            "127.0.0.1:7111",
            Arc::new(PeerRegistry::new()),
            Arc::new(RecordingEvents::new()),
        );
        let target = rx.start_listener().await.unwrap().to_string();
        let registry = Arc::new(PeerRegistry::new());
        registry.upsert(&target, true);
        let tx = transport("127.0.0.1:7112", registry, Arc::new(RecordingEvents::new()));
        assert!(tx.connect(&target).await);

        let producer = NullProducer::silent();
        assert_eq!(tx.broadcast_once(&producer).await, BroadcastResult::default());
        assert_eq!(producer.calls(), 1);

        producer.push(Some(b"once".to_vec()));
        assert_eq!(tx.broadcast_once(&producer).await.sent, 1);

        tx.shutdown().await;
        rx.shutdown().await;
    }
}
