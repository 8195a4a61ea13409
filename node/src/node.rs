//! LanNode: one process's discovery, transport and throughput estimator.
//!
//! Construction wires the shared pieces together once:
//!
//! ```text
//!            ┌──────────────┐  upsert / evict   ┌──────────────┐
//!            │  Discovery   │──────────────────▶│ PeerRegistry │
//!            └──────┬───────┘                   └──────▲───────┘
//!     new / lost    │                                  │ online peers
//!  (auto-connect,   ▼                                  │
//!   disconnect) ┌──────────────┐  probes  ┌────────────┴─┐
//!               │  Transport   │◀─────────│  Estimator   │
//!               └──────────────┘          └──────────────┘
//! ```
//!
//! Nothing runs until [`LanNode::start`]; [`LanNode::stop`] ends every task.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use prometheus::Encoder;
use tracing::Instrument;

use lanmesh_messages::MessageBody;
use lanmesh_network::{
    BroadcastResult, DiscoveryService, DiscoveryState, NetworkMetrics, PeerRegistry,
    ProbeRendezvous, ScanResult, ThroughputEstimator, Transport,
};
use lanmesh_protocol::{Encoding, TextSerializer, WireCodec};
use lanmesh_types::{LinkSensor, NoopEvents, Peer, PeerEvents, Producer, StaticLink};

use crate::local_address::resolve_local_address;
use crate::tracing_spans::{broadcast_span, peer_event_span, probe_span, receive_span};
use crate::{NodeConfig, NodeError};

/// Which roles [`LanNode::start`] brings up.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StartOptions {
    pub discovery: bool,
    pub listener: bool,
    pub broadcaster: bool,
}

impl StartOptions {
    pub fn all() -> Self {
        Self {
            discovery: true,
            listener: true,
            broadcaster: true,
        }
    }

    /// Announce ourselves and track peers, but exchange no messages.
    pub fn discovery_only() -> Self {
        Self {
            discovery: true,
            ..Self::default()
        }
    }
}

/// Point-in-time view of a node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeStats {
    pub local_address: String,
    pub peers: usize,
    pub online_peers: usize,
    pub pooled_connections: usize,
    pub scans: usize,
    pub last_estimate_mps: Option<u64>,
    pub discovery: DiscoveryState,
    pub listening: bool,
    pub broadcasting: bool,
}

/// Consumer wrapper for transport events.
struct ConsumerEvents {
    consumer: Arc<dyn PeerEvents>,
}

impl PeerEvents for ConsumerEvents {
    fn on_new_peer(&self, peer: &Peer) {
        let _span = peer_event_span("new", &peer.address).entered();
        self.consumer.on_new_peer(peer);
    }

    fn on_peer_lost(&self, peer: &Peer) {
        let _span = peer_event_span("lost", &peer.address).entered();
        self.consumer.on_peer_lost(peer);
    }

    fn on_data(&self, source: &str, payload: Vec<u8>) {
        let _span = receive_span(source, payload.len()).entered();
        self.consumer.on_data(source, payload);
    }
}

/// Consumer wrapper for discovery events: keeps the pool in step with the
/// registry before telling the application.
struct DiscoveryEvents {
    transport: Arc<Transport>,
    consumer: Arc<dyn PeerEvents>,
    auto_connect: bool,
}

impl PeerEvents for DiscoveryEvents {
    fn on_new_peer(&self, peer: &Peer) {
        let _span = peer_event_span("new", &peer.address).entered();
        if self.auto_connect {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                let transport = Arc::clone(&self.transport);
                let address = peer.address.clone();
                runtime.spawn(async move {
                    if !transport.connect(&address).await {
                        tracing::debug!(peer = %address, "auto-connect failed");
                    }
                });
            }
        }
        self.consumer.on_new_peer(peer);
    }

    fn on_peer_lost(&self, peer: &Peer) {
        let _span = peer_event_span("lost", &peer.address).entered();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let transport = Arc::clone(&self.transport);
            let address = peer.address.clone();
            runtime.spawn(async move { transport.disconnect(&address).await });
        }
        self.consumer.on_peer_lost(peer);
    }

    fn on_data(&self, source: &str, payload: Vec<u8>) {
        self.consumer.on_data(source, payload);
    }
}

/// Producer wrapper that traces each broadcast tick.
struct TracedProducer {
    producer: Arc<dyn Producer>,
    transport: Arc<Transport>,
}

impl Producer for TracedProducer {
    fn produce(&self) -> Option<Vec<u8>> {
        let _span = broadcast_span(self.transport.pool().addresses().len()).entered();
        self.producer.produce()
    }
}

pub struct LanNode {
    config: NodeConfig,
    local_address: String,
    registry: Arc<PeerRegistry>,
    metrics: Arc<NetworkMetrics>,
    transport: Arc<Transport>,
    discovery: Arc<DiscoveryService>,
    estimator: Arc<ThroughputEstimator>,
    producer: Option<Arc<dyn Producer>>,
    has_consumer: bool,
    listener_addr: Mutex<Option<SocketAddr>>,
    stopped: AtomicBool,
}

impl LanNode {
    /// Build a node with a static link sensor taken from `config`.
    pub fn configure(
        config: NodeConfig,
        consumer: Option<Arc<dyn PeerEvents>>,
        producer: Option<Arc<dyn Producer>>,
        text_serializer: Option<Arc<dyn TextSerializer>>,
    ) -> Result<Self, NodeError> {
        let link = Arc::new(StaticLink::new(config.link_speed_mbps, config.signal_strength));
        Self::configure_with_link(config, consumer, producer, text_serializer, link)
    }

    /// Build a node that reads link quality from `link`.
    pub fn configure_with_link(
        config: NodeConfig,
        consumer: Option<Arc<dyn PeerEvents>>,
        producer: Option<Arc<dyn Producer>>,
        text_serializer: Option<Arc<dyn TextSerializer>>,
        link: Arc<dyn LinkSensor>,
    ) -> Result<Self, NodeError> {
        config.validate()?;
        let codec = match config.encoding()? {
            Encoding::Native => WireCodec::Native,
            Encoding::Text => WireCodec::text(text_serializer.ok_or_else(|| {
                NodeError::Config("text encoding needs a text serializer".into())
            })?),
        };
        let local_address = resolve_local_address(&config)?;

        let registry = Arc::new(PeerRegistry::new());
        let metrics = Arc::new(NetworkMetrics::new());
        let rendezvous = Arc::new(ProbeRendezvous::new());
        let has_consumer = consumer.is_some();
        let consumer: Arc<dyn PeerEvents> = consumer.unwrap_or_else(|| Arc::new(NoopEvents));

        let transport = Arc::new(Transport::new(
            config.transport_config(&local_address),
            codec,
            Arc::clone(&registry),
            Arc::new(ConsumerEvents {
                consumer: Arc::clone(&consumer),
            }),
            Arc::clone(&rendezvous),
            Arc::clone(&metrics),
        ));

        let discovery = Arc::new(DiscoveryService::new(
            config.discovery_config(&local_address)?,
            Arc::clone(&registry),
            Arc::new(DiscoveryEvents {
                transport: Arc::clone(&transport),
                consumer,
                auto_connect: config.auto_connect,
            }),
            Arc::clone(&metrics),
        ));

        let estimator = Arc::new(ThroughputEstimator::new(
            config.estimator_config(),
            Arc::clone(&transport),
            Arc::clone(&registry),
            link,
            rendezvous,
            Arc::clone(&metrics),
        ));

        tracing::info!(
            address = %local_address,
            encoding = ?transport.codec().encoding(),
            "node configured"
        );

        Ok(Self {
            config,
            local_address,
            registry,
            metrics,
            transport,
            discovery,
            estimator,
            producer,
            has_consumer,
            listener_addr: Mutex::new(None),
            stopped: AtomicBool::new(false),
        })
    }

    /// Bring up the requested roles.
    ///
    /// Preconditions are checked before anything starts: the broadcaster
    /// needs a producer and the listener needs a consumer.
    pub async fn start(&self, options: StartOptions) -> Result<(), NodeError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(NodeError::Config("node was stopped".into()));
        }
        if options.broadcaster && self.producer.is_none() {
            return Err(NodeError::Config("broadcaster needs a producer".into()));
        }
        if options.listener && !self.has_consumer {
            return Err(NodeError::Config("listener needs a consumer".into()));
        }

        if options.discovery {
            self.discovery.start().await?;
        }
        if options.listener {
            let bound = self.transport.start_listener().await?;
            *self
                .listener_addr
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(bound);
        }
        if let (true, Some(producer)) = (options.broadcaster, &self.producer) {
            self.transport.start_broadcaster(Arc::new(TracedProducer {
                producer: Arc::clone(producer),
                transport: Arc::clone(&self.transport),
            }))?;
        }

        tracing::info!(
            address = %self.local_address,
            discovery = options.discovery,
            listener = options.listener,
            broadcaster = options.broadcaster,
            "node started"
        );
        Ok(())
    }

    /// Stop every role and close every connection. Idempotent.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.discovery.stop();
        self.transport.shutdown().await;
        self.discovery.join().await;
        tracing::info!(address = %self.local_address, "node stopped");
    }

    /// Advertise ourselves as online or offline in subsequent heartbeats.
    pub fn set_online(&self, online: bool) {
        self.discovery.set_online(online);
    }

    pub async fn connect(&self, address: &str) -> bool {
        self.transport.connect(address).await
    }

    pub async fn disconnect(&self, address: &str) {
        self.transport.disconnect(address).await;
    }

    pub async fn send(&self, address: &str, payload: Vec<u8>) -> Result<(), NodeError> {
        Ok(self
            .transport
            .send(address, &MessageBody::Application(payload))
            .await?)
    }

    pub async fn send_to_all(&self, payload: Vec<u8>) -> Result<BroadcastResult, NodeError> {
        Ok(self
            .transport
            .send_to_all(&MessageBody::Application(payload))
            .await?)
    }

    /// Messages per second the link speed allows for `sample`.
    pub fn ideal_rate(&self, sample: &[u8]) -> Result<u64, NodeError> {
        Ok(self.estimator.ideal_rate(sample)?)
    }

    /// Messages per second for `sample`, measured by probing peers.
    pub async fn probe_rate(
        &self,
        sample: &[u8],
        target: Option<&str>,
        reuse_cache: bool,
    ) -> Result<u64, NodeError> {
        Ok(self
            .estimator
            .probe_rate(sample, target, reuse_cache)
            .instrument(probe_span(target, reuse_cache))
            .await?)
    }

    pub fn scan_history(&self) -> Vec<ScanResult> {
        self.estimator.history()
    }

    pub fn peers(&self) -> Vec<Peer> {
        self.registry.all()
    }

    pub fn stats(&self) -> NodeStats {
        NodeStats {
            local_address: self.local_address.clone(),
            peers: self.registry.count(),
            online_peers: self.registry.online_addresses().len(),
            pooled_connections: self.transport.pool().addresses().len(),
            scans: self.estimator.history().len(),
            last_estimate_mps: self.estimator.last_scan().map(|s| s.estimated_mps),
            discovery: self.discovery.state(),
            listening: self.transport.listener_running(),
            broadcasting: self.transport.broadcaster_running(),
        }
    }

    /// Metrics in the Prometheus text exposition format.
    pub fn metrics_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = prometheus::TextEncoder::new();
        if let Err(e) = encoder.encode(&self.metrics.registry.gather(), &mut buf) {
            tracing::warn!(error = %e, "failed to encode metrics");
        }
        String::from_utf8(buf).unwrap_or_default()
    }

    pub fn local_address(&self) -> &str {
        &self.local_address
    }

    /// Where the message listener is bound, once started.
    pub fn listener_addr(&self) -> Option<SocketAddr> {
        *self
            .listener_addr
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    pub fn discovery(&self) -> &Arc<DiscoveryService> {
        &self.discovery
    }

    pub fn estimator(&self) -> &Arc<ThroughputEstimator> {
        &self.estimator
    }

    pub fn metrics(&self) -> &Arc<NetworkMetrics> {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanmesh_nullables::{NullProducer, RecordingEvents};
    use lanmesh_protocol::FieldTextSerializer;

    fn config() -> NodeConfig {
        NodeConfig {
            local_address: Some("127.0.0.1:17999".into()),
            message_port: 0,
            ..NodeConfig::default()
        }
    }

    #[test]
    fn text_encoding_needs_a_serializer() {
        let config = NodeConfig {
            encoding: "text".into(),
            ..config()
        };
        assert!(matches!(
            LanNode::configure(config.clone(), None, None, None),
            Err(NodeError::Config(_))
        ));
        let node = LanNode::configure(config, None, None, Some(Arc::new(FieldTextSerializer))).unwrap();
        assert_eq!(node.transport().codec().encoding(), Encoding::Text);
    }

    #[tokio::test]
    async fn broadcaster_needs_a_producer() {
        let node = LanNode::configure(config(), Some(Arc::new(RecordingEvents::new())), None, None).unwrap();
        let err = node
            .start(StartOptions {
                broadcaster: true,
                ..StartOptions::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Config(_)));
        assert!(!node.stats().broadcasting);
    }

    #[tokio::test]
    async fn listener_needs_a_consumer() {
        let node = LanNode::configure(
            config(),
            None,
            Some(Arc::new(NullProducer::silent())),
            None,
        )
        .unwrap();
        let err = node
            .start(StartOptions {
                listener: true,
                ..StartOptions::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Config(_)));
        assert!(!node.stats().listening);
    }

    #[tokio::test]
    async fn stats_reflect_roles_and_stop_is_final() {
        let node = LanNode::configure(
            config(),
            Some(Arc::new(RecordingEvents::new())),
            Some(Arc::new(NullProducer::silent())),
            None,
        )
        .unwrap();
        node.start(StartOptions {
            listener: true,
            broadcaster: true,
            ..StartOptions::default()
        })
        .await
        .unwrap();

        let stats = node.stats();
        assert_eq!(stats.local_address, "127.0.0.1:17999");
        assert!(stats.listening && stats.broadcasting);
        assert_eq!(stats.discovery, DiscoveryState::Idle);
        assert!(node.listener_addr().is_some());

        node.stop().await;
        node.stop().await;
        let stats = node.stats();
        assert!(!stats.listening && !stats.broadcasting);
        assert!(node.start(StartOptions::default()).await.is_err());
    }

    #[test]
    fn metrics_are_exposed_as_text() {
        let node = LanNode::configure(config(), None, None, None).unwrap();
        node.metrics().messages_sent.inc();
        assert!(node.metrics_text().contains("lanmesh_messages_sent_total 1"));
    }
}
