//! Pre-built [`tracing::Span`] constructors for node operations.
//!
//! Consistent span names and field sets make it easy to filter and
//! correlate a peer's traffic across the log.

use tracing::{debug_span, info_span, Span};

/// Span covering delivery of one received payload to the consumer.
pub fn receive_span(peer: &str, bytes: usize) -> Span {
    debug_span!("receive", peer = %peer, bytes = bytes)
}

/// Span covering one broadcast tick.
pub fn broadcast_span(pooled: usize) -> Span {
    debug_span!("broadcast", pooled = pooled)
}

/// Span covering a whole throughput scan.
pub fn probe_span(target: Option<&str>, reuse_cache: bool) -> Span {
    info_span!("probe_scan", target = target.unwrap_or("*"), reuse_cache = reuse_cache)
}

/// Span covering a peer lifecycle notification.
pub fn peer_event_span(event: &'static str, peer: &str) -> Span {
    debug_span!("peer_event", event = event, peer = %peer)
}
