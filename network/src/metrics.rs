//! Prometheus metrics for discovery, transport and throughput probing.
//!
//! [`NetworkMetrics`] owns a dedicated [`Registry`] so an embedding
//! application can encode it into the Prometheus text format alongside its
//! own metrics.

use prometheus::{
    register_histogram_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, Histogram, HistogramOpts, IntCounter, IntGauge, Opts,
    Registry,
};

/// Central collection of all networking metrics.
pub struct NetworkMetrics {
    /// The Prometheus registry that owns every metric below.
    pub registry: Registry,

    // ── Counters ────────────────────────────────────────────────────────
    /// Frames written to peers.
    pub messages_sent: IntCounter,
    /// Frames decoded from peers.
    pub messages_received: IntCounter,
    /// Sends that failed and dropped the peer.
    pub send_failures: IntCounter,
    /// Peers removed by the timeout reaper or a failed connection.
    pub peers_evicted: IntCounter,

    // ── Gauges ──────────────────────────────────────────────────────────
    /// Peers currently in the registry.
    pub peer_count: IntGauge,
    /// Outbound connections currently pooled.
    pub pooled_connections: IntGauge,

    // ── Histograms ──────────────────────────────────────────────────────
    /// Probe round-trip time, in milliseconds.
    pub probe_rtt_ms: Histogram,
}

impl NetworkMetrics {
    /// Create a fresh set of metrics, all registered under a new [`Registry`].
    pub fn new() -> Self {
        let registry = Registry::new();

        let messages_sent = register_int_counter_with_registry!(
            Opts::new("lanmesh_messages_sent_total", "Total frames sent to peers"),
            registry
        )
        .expect("failed to register messages_sent counter");

        let messages_received = register_int_counter_with_registry!(
            Opts::new(
                "lanmesh_messages_received_total",
                "Total frames received from peers"
            ),
            registry
        )
        .expect("failed to register messages_received counter");

        let send_failures = register_int_counter_with_registry!(
            Opts::new(
                "lanmesh_send_failures_total",
                "Total sends that failed and dropped the peer"
            ),
            registry
        )
        .expect("failed to register send_failures counter");

        let peers_evicted = register_int_counter_with_registry!(
            Opts::new("lanmesh_peers_evicted_total", "Total peers evicted"),
            registry
        )
        .expect("failed to register peers_evicted counter");

        let peer_count = register_int_gauge_with_registry!(
            Opts::new("lanmesh_peer_count", "Current number of known peers"),
            registry
        )
        .expect("failed to register peer_count gauge");

        let pooled_connections = register_int_gauge_with_registry!(
            Opts::new(
                "lanmesh_pooled_connections",
                "Current number of pooled outbound connections"
            ),
            registry
        )
        .expect("failed to register pooled_connections gauge");

        // 0.1 ms → ~1.6 s covers LAN round trips up to the default probe timeout.
        let probe_rtt_ms = register_histogram_with_registry!(
            HistogramOpts::new("lanmesh_probe_rtt_ms", "Probe round-trip time in milliseconds")
                .buckets(prometheus::exponential_buckets(0.1, 2.0, 15).unwrap()),
            registry
        )
        .expect("failed to register probe_rtt_ms histogram");

        Self {
            registry,
            messages_sent,
            messages_received,
            send_failures,
            peers_evicted,
            peer_count,
            pooled_connections,
            probe_rtt_ms,
        }
    }
}

impl Default for NetworkMetrics {
    fn default() -> Self {
        Self::new()
    }
}
