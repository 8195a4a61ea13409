//! Message-rate estimation.
//!
//! Two estimates of how many copies of a sample message per second the link
//! can carry:
//! - [`ThroughputEstimator::ideal_rate`]: link speed divided by the
//!   sample's encoded size, no traffic involved
//! - [`ThroughputEstimator::probe_rate`]: measured by echoing probes off
//!   peers and timing the round trips
//!
//! Probe scans are single-flight and their results are kept in a bounded
//! history, so a later call in a similar situation can reuse one instead of
//! probing again.

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use lanmesh_messages::{Envelope, MessageBody, Probe};
use lanmesh_types::{LinkSensor, Timestamp};

use crate::{EstimatorError, NetworkError, NetworkMetrics, PeerRegistry, ProbeRendezvous, Transport};

/// Bits per megabit, as the link sensors count them.
pub const MEBI: f64 = (1u64 << 20) as f64;

/// Recorded link speed may differ from the current one by this fraction.
const CACHE_SPEED_TOLERANCE: f64 = 0.1;

#[derive(Clone, Debug)]
pub struct EstimatorConfig {
    /// How long to wait for each probe's echo.
    pub probe_timeout: Duration,
    /// Oldest scan that may be reused.
    pub scan_cache_window: Duration,
    /// Scans kept in history; the oldest is dropped first.
    pub scan_history_limit: usize,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(1),
            scan_cache_window: Duration::from_secs(30 * 60),
            scan_history_limit: 256,
        }
    }
}

/// One completed probe scan.
#[derive(Clone, Debug, PartialEq)]
pub struct ScanResult {
    pub start_time: Timestamp,
    pub signal_strength: Option<u8>,
    /// Sensor link speed when the scan ran.
    pub link_speed_mbps: u32,
    pub measured_speed_mbps: f64,
    pub target_addresses: BTreeSet<String>,
    pub estimated_mps: u64,
}

/// Clears the in-flight flag however the scan ends.
struct ScanGuard<'a>(&'a AtomicBool);

impl<'a> ScanGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ThroughputEstimator {
    config: EstimatorConfig,
    transport: Arc<Transport>,
    registry: Arc<PeerRegistry>,
    link: Arc<dyn LinkSensor>,
    rendezvous: Arc<ProbeRendezvous>,
    metrics: Arc<NetworkMetrics>,
    history: Mutex<VecDeque<ScanResult>>,
    in_flight: AtomicBool,
}

impl ThroughputEstimator {
    pub fn new(
        config: EstimatorConfig,
        transport: Arc<Transport>,
        registry: Arc<PeerRegistry>,
        link: Arc<dyn LinkSensor>,
        rendezvous: Arc<ProbeRendezvous>,
        metrics: Arc<NetworkMetrics>,
    ) -> Self {
        Self {
            config,
            transport,
            registry,
            link,
            rendezvous,
            metrics,
            history: Mutex::new(VecDeque::new()),
            in_flight: AtomicBool::new(false),
        }
    }

    fn history_lock(&self) -> MutexGuard<'_, VecDeque<ScanResult>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Messages per second the sensor's link speed allows for `sample`.
    pub fn ideal_rate(&self, sample: &[u8]) -> Result<u64, EstimatorError> {
        let speed = self.link.link_speed_mbps().ok_or(EstimatorError::LinkUnavailable)?;
        let bits = self.sample_bits(sample)?;
        Ok(rate_for(f64::from(speed), bits))
    }

    /// Encoded size of `sample` as an application message, in bits.
    fn sample_bits(&self, sample: &[u8]) -> Result<u64, EstimatorError> {
        let envelope = Envelope::new(
            self.transport.local_address(),
            MessageBody::Application(sample.to_vec()),
        );
        let bytes = self.transport.codec().encoded_len(&envelope)?;
        if bytes == 0 {
            return Err(EstimatorError::EmptySample);
        }
        Ok(bytes as u64 * 8)
    }

    /// Messages per second for `sample`, measured by probing `target` or
    /// every known peer. With `reuse_cache`, a comparable recent scan is
    /// returned instead of probing.
    pub async fn probe_rate(
        &self,
        sample: &[u8],
        target: Option<&str>,
        reuse_cache: bool,
    ) -> Result<u64, EstimatorError> {
        let _guard = ScanGuard::acquire(&self.in_flight).ok_or(EstimatorError::ScanInFlight)?;

        let peers = self.registry.all();
        if peers.is_empty() {
            return Err(EstimatorError::NoPeers);
        }
        let peer_count = peers.len();
        let link_speed = self.link.link_speed_mbps().ok_or(EstimatorError::LinkUnavailable)?;
        let sample_bits = self.sample_bits(sample)?;

        if reuse_cache {
            let cached = find_reusable(
                &self.history_lock(),
                peer_count,
                link_speed,
                Timestamp::now(),
                self.config.scan_cache_window,
            )
            .map(|scan| scan.estimated_mps);
            if let Some(mps) = cached {
                tracing::debug!(mps, "reusing previous scan");
                return Ok(mps);
            }
        }

        let targets: Vec<String> = match target {
            Some(address) => vec![address.to_string()],
            None => peers.into_iter().map(|p| p.address).collect(),
        };
        let start_time = Timestamp::now();

        let mut total = Duration::ZERO;
        let mut probe_bits = 0;
        for address in &targets {
            let (rtt, bits) = self.probe_once(address, sample.len()).await?;
            total += rtt;
            probe_bits = bits;
        }

        let (avg_us, measured_mbps) =
            measured_speed(total, targets.len(), probe_bits).ok_or(EstimatorError::NoPeers)?;
        let estimated_mps = rate_for(measured_mbps, sample_bits);

        tracing::info!(
            targets = targets.len(),
            avg_rtt_us = avg_us as u64,
            measured_mbps,
            estimated_mps,
            "probe scan complete"
        );

        let scan = ScanResult {
            start_time,
            signal_strength: self.link.signal_strength(),
            link_speed_mbps: link_speed,
            measured_speed_mbps: measured_mbps,
            target_addresses: targets.into_iter().collect(),
            estimated_mps,
        };
        let mut history = self.history_lock();
        history.push_back(scan);
        while history.len() > self.config.scan_history_limit {
            history.pop_front();
        }
        Ok(estimated_mps)
    }

    /// Echo one probe off `address`. Returns the round trip and the probe's size in bits.
    async fn probe_once(&self, address: &str, padding: usize) -> Result<(Duration, u64), EstimatorError> {
        if !self.transport.connect(address).await {
            return Err(NetworkError::ConnectionFailed(address.to_string()).into());
        }

        let id = self.rendezvous.next_id();
        let body = MessageBody::ProbeOutbound(Probe::new(id, self.transport.local_address(), padding));
        let envelope = Envelope::new(self.transport.local_address(), body.clone());
        let bits = self.transport.codec().encoded_len(&envelope)? as u64 * 8;

        let arrival = self.rendezvous.expect(id);
        let sent_at = Instant::now();
        if let Err(e) = self.transport.send(address, &body).await {
            self.rendezvous.cancel(id);
            return Err(e.into());
        }

        match tokio::time::timeout(self.config.probe_timeout, arrival).await {
            Ok(Ok(arrived_at)) => {
                let rtt = arrived_at.saturating_duration_since(sent_at);
                self.metrics.probe_rtt_ms.observe(rtt.as_secs_f64() * 1_000.0);
                tracing::debug!(peer = %address, probe = id, rtt_us = rtt.as_micros() as u64, "probe returned");
                Ok((rtt, bits))
            }
            _ => {
                self.rendezvous.cancel(id);
                tracing::warn!(peer = %address, probe = id, "probe timed out");
                Err(EstimatorError::ProbeTimeout {
                    peer: address.to_string(),
                })
            }
        }
    }

    /// Every stored scan, oldest first.
    pub fn history(&self) -> Vec<ScanResult> {
        self.history_lock().iter().cloned().collect()
    }

    pub fn last_scan(&self) -> Option<ScanResult> {
        self.history_lock().back().cloned()
    }

    pub fn scan_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }
}

/// Mean round trip in microseconds (at least 1) and the speed in Mbps it
/// implies for `probe_bits`. `None` without samples.
pub fn measured_speed(total: Duration, samples: usize, probe_bits: u64) -> Option<(u128, f64)> {
    if samples == 0 {
        return None;
    }
    let avg_us = (total.as_micros() / samples as u128).max(1);
    let bits_per_sec = probe_bits as f64 * 1_000_000.0 / avg_us as f64;
    Some((avg_us, bits_per_sec / MEBI))
}

/// `speed_mbps * 2^20 / size_bits`, truncated.
pub fn rate_for(speed_mbps: f64, size_bits: u64) -> u64 {
    if size_bits == 0 {
        return 0;
    }
    (speed_mbps * MEBI / size_bits as f64) as u64
}

/// Newest scan comparable to the current situation.
///
/// Comparable means the same number of targets as there are peers now and a
/// recorded link speed within 10% of `link_speed`. The search walks newest
/// first and stops at the first comparable scan older than `window`; among
/// the rest the smallest speed difference wins.
pub fn find_reusable<'a>(
    history: &'a VecDeque<ScanResult>,
    peer_count: usize,
    link_speed: u32,
    now: Timestamp,
    window: Duration,
) -> Option<&'a ScanResult> {
    let threshold = f64::from(link_speed) * CACHE_SPEED_TOLERANCE;
    let mut best: Option<(&ScanResult, f64)> = None;

    for scan in history.iter().rev() {
        if scan.target_addresses.len() != peer_count {
            continue;
        }
        let delta = (f64::from(link_speed) - f64::from(scan.link_speed_mbps)).abs();
        if delta > threshold {
            continue;
        }
        if scan.start_time.is_older_than(window, now) {
            break;
        }
        if best.map_or(true, |(_, best_delta)| delta < best_delta) {
            best = Some((scan, delta));
        }
    }
    best.map(|(scan, _)| scan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TransportConfig;
    use lanmesh_nullables::{NullLink, RecordingEvents};
    use lanmesh_protocol::WireCodec;

    fn scan(start_ms: u64, speed: u32, targets: &[&str], mps: u64) -> ScanResult {
        ScanResult {
            start_time: Timestamp::from_millis(start_ms),
            signal_strength: Some(10),
            link_speed_mbps: speed,
            measured_speed_mbps: 1.0,
            target_addresses: targets.iter().map(|t| t.to_string()).collect(),
            estimated_mps: mps,
        }
    }

    const WINDOW: Duration = Duration::from_secs(1800);

    #[test]
    fn measured_speed_needs_samples() {
        assert_eq!(measured_speed(Duration::from_millis(5), 0, 8_000), None);

        let (avg_us, mbps) = measured_speed(Duration::from_micros(2_000), 2, 1_048_576).unwrap();
        assert_eq!(avg_us, 1_000);
        assert!((mbps - 1_000.0).abs() < 1e-9);

        let (avg_us, _) = measured_speed(Duration::ZERO, 3, 8).unwrap();
        assert_eq!(avg_us, 1);
    }

    #[test]
    fn cache_requires_matching_peer_count_and_speed() {
        let history: VecDeque<_> = [
            scan(1_000, 54, &["a"], 1),
            scan(2_000, 54, &["a", "b"], 2),
            scan(3_000, 70, &["a", "b"], 3),
        ]
        .into();
        let now = Timestamp::from_millis(4_000);

        assert_eq!(find_reusable(&history, 2, 54, now, WINDOW).unwrap().estimated_mps, 2);
        assert_eq!(find_reusable(&history, 1, 54, now, WINDOW).unwrap().estimated_mps, 1);
        assert!(find_reusable(&history, 3, 54, now, WINDOW).is_none());
        assert!(find_reusable(&history, 2, 100, now, WINDOW).is_none());
    }

    #[test]
    fn cache_prefers_smallest_speed_delta() {
        let history: VecDeque<_> = [
            scan(1_000, 50, &["a"], 1),
            scan(2_000, 54, &["a"], 2),
            scan(3_000, 57, &["a"], 3),
        ]
        .into();
        let now = Timestamp::from_millis(4_000);
        assert_eq!(find_reusable(&history, 1, 54, now, WINDOW).unwrap().estimated_mps, 2);
    }

    #[test]
    fn cache_stops_at_first_stale_match() {
        let history: VecDeque<_> = [
            scan(0, 54, &["a"], 1),
            scan(10_000, 54, &["a"], 2),
        ]
        .into();
        let window = Duration::from_secs(5);

        assert!(find_reusable(&history, 1, 54, Timestamp::from_millis(20_000), window).is_none());
        assert_eq!(
            find_reusable(&history, 1, 54, Timestamp::from_millis(12_000), window)
                .unwrap()
                .estimated_mps,
            2
        );
    }

    #[test]
    fn rate_scales_with_speed_and_size() {
        assert_eq!(rate_for(1.0, 8 * 1024), 128);
        assert_eq!(rate_for(2.0, 8 * 1024), 256);
        assert_eq!(rate_for(1.0, 16 * 1024), 64);
        assert_eq!(rate_for(1.0, 0), 0);
    }

    fn estimator(link: Arc<NullLink>) -> (ThroughputEstimator, Arc<PeerRegistry>) {
        let registry = Arc::new(PeerRegistry::new());
        let rendezvous = Arc::new(ProbeRendezvous::new());
        let metrics = Arc::new(NetworkMetrics::new());
        let transport = Arc::new(Transport::new(
            TransportConfig::new("127.0.0.1:1", 0),
            WireCodec::Native,
            Arc::clone(&registry),
            Arc::new(RecordingEvents::new()),
            Arc::clone(&rendezvous),
            Arc::clone(&metrics),
        ));
        let estimator = ThroughputEstimator::new(
            EstimatorConfig {
                probe_timeout: Duration::from_millis(100),
                ..EstimatorConfig::default()
            },
            transport,
            Arc::clone(&registry),
            link,
            rendezvous,
            metrics,
        );
        (estimator, registry)
    }

    #[test]
    fn ideal_rate_follows_link_speed() {
        let link = Arc::new(NullLink::new(54, 10));
        let (estimator, _) = estimator(Arc::clone(&link));

        let base = estimator.ideal_rate(&[0u8; 200]).unwrap();
        link.set_speed(108);
        let doubled = estimator.ideal_rate(&[0u8; 200]).unwrap();
        assert!(base > 0);
        assert!(doubled.abs_diff(base * 2) <= 1);

        link.disconnect();
        assert!(matches!(
            estimator.ideal_rate(&[0u8; 200]),
            Err(EstimatorError::LinkUnavailable)
        ));
    }

    #[tokio::test]
    async fn no_peers_is_an_error() {
        let (estimator, _) = estimator(Arc::new(NullLink::default()));
        assert!(matches!(
            estimator.probe_rate(b"sample", None, false).await,
            Err(EstimatorError::NoPeers)
        ));
        assert!(!estimator.scan_in_flight());
    }

    #[tokio::test]
    async fn unreachable_target_fails_and_clears_flag() {
        let (estimator, registry) = estimator(Arc::new(NullLink::default()));
        let unused = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = unused.local_addr().unwrap().to_string();
        drop(unused);
        registry.upsert(&addr, true);

        let err = estimator.probe_rate(b"sample", None, false).await.unwrap_err();
        assert!(matches!(err, EstimatorError::Transport(_)));
        assert!(!estimator.scan_in_flight());
        assert!(estimator.history().is_empty());
    }

    #[tokio::test]
    async fn silent_peer_times_out() {
        let (estimator, registry) = estimator(Arc::new(NullLink::default()));
        // Accepts connections but never answers.
        let silent = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = silent.local_addr().unwrap().to_string();
        let _accepting = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = silent.accept().await {
                held.push(stream);
            }
        });
        registry.upsert(&addr, true);

        let err = estimator.probe_rate(b"sample", None, false).await.unwrap_err();
        assert!(matches!(err, EstimatorError::ProbeTimeout { ref peer } if *peer == addr));
        assert!(!estimator.scan_in_flight());
    }

    #[tokio::test]
    async fn cached_scan_is_reused() {
        let (estimator, registry) = estimator(Arc::new(NullLink::new(54, 10)));
        registry.upsert("10.0.0.9", true);
        estimator
            .history_lock()
            .push_back(scan(Timestamp::now().as_millis(), 54, &["10.0.0.9"], 777));

        assert_eq!(estimator.probe_rate(b"sample", None, true).await.unwrap(), 777);
        assert_eq!(estimator.history().len(), 1);
    }
}
