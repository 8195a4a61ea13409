//! Multicast host discovery.
//!
//! Three tasks per running service:
//! - heartbeat sender: announces `<address>:..:<Y|N>:..:` to the group
//! - heartbeat listener: registers every other host it hears
//! - timeout reaper: evicts hosts that went silent
//!
//! The service owns no connection state. Eviction is reported through
//! [`PeerEvents::on_peer_lost`], which the node uses to tear down pooled
//! connections as well.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use lanmesh_messages::Heartbeat;
use lanmesh_types::{PeerEvents, Timestamp};

use crate::{NetworkError, NetworkMetrics, PeerRegistry, ShutdownController};

/// Largest heartbeat we accept. Real ones are an address plus a few bytes.
const MAX_DATAGRAM: usize = 1024;

#[derive(Clone, Debug)]
pub struct DiscoveryConfig {
    /// Address advertised in our heartbeats; heartbeats carrying it are ignored.
    pub local_address: String,
    pub group: Ipv4Addr,
    pub port: u16,
    /// Heartbeat period.
    pub interval: Duration,
    /// Reaper period.
    pub timeout_check_interval: Duration,
    /// Silence after which a peer is evicted.
    pub peer_timeout: Duration,
}

impl DiscoveryConfig {
    pub fn new(local_address: impl Into<String>) -> Self {
        Self {
            local_address: local_address.into(),
            group: Ipv4Addr::new(230, 0, 0, 1),
            port: 9998,
            interval: Duration::from_millis(50),
            timeout_check_interval: Duration::from_millis(500),
            peer_timeout: Duration::from_millis(3_000),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiscoveryState {
    Idle,
    Running,
    /// Terminal.
    Stopped,
}

pub struct DiscoveryService {
    config: DiscoveryConfig,
    registry: Arc<PeerRegistry>,
    events: Arc<dyn PeerEvents>,
    metrics: Arc<NetworkMetrics>,
    online: AtomicBool,
    state: Mutex<DiscoveryState>,
    shutdown: ShutdownController,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DiscoveryService {
    pub fn new(
        config: DiscoveryConfig,
        registry: Arc<PeerRegistry>,
        events: Arc<dyn PeerEvents>,
        metrics: Arc<NetworkMetrics>,
    ) -> Self {
        Self {
            config,
            registry,
            events,
            metrics,
            online: AtomicBool::new(true),
            state: Mutex::new(DiscoveryState::Idle),
            shutdown: ShutdownController::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    pub fn state(&self) -> DiscoveryState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Online flag advertised by subsequent heartbeats.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Bind the sockets and spawn the sender, listener and reaper tasks.
    pub async fn start(self: &Arc<Self>) -> Result<(), NetworkError> {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state != DiscoveryState::Idle {
                return Err(NetworkError::AlreadyStarted("discovery"));
            }
            *state = DiscoveryState::Running;
        }

        let sockets = self.bind().await;
        let (listen_socket, send_socket) = match sockets {
            Ok(pair) => pair,
            Err(e) => {
                *self.state.lock().unwrap_or_else(PoisonError::into_inner) = DiscoveryState::Idle;
                return Err(e);
            }
        };

        let handles = vec![
            tokio::spawn(Arc::clone(self).run_sender(send_socket, self.shutdown.subscribe())),
            tokio::spawn(Arc::clone(self).run_listener(listen_socket, self.shutdown.subscribe())),
            tokio::spawn(Arc::clone(self).run_reaper(self.shutdown.subscribe())),
        ];
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(handles);

        tracing::info!(
            address = %self.config.local_address,
            group = %self.config.group,
            port = self.config.port,
            "discovery started"
        );
        Ok(())
    }

    async fn bind(&self) -> Result<(UdpSocket, UdpSocket), NetworkError> {
        let listen_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, self.config.port);
        let listen_socket = UdpSocket::bind(listen_addr).await?;
        listen_socket.join_multicast_v4(self.config.group, Ipv4Addr::UNSPECIFIED)?;

        let send_socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)).await?;
        send_socket.set_multicast_loop_v4(true)?;
        Ok((listen_socket, send_socket))
    }

    /// Signal every task to stop. Idempotent; the service cannot restart.
    pub fn stop(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == DiscoveryState::Running {
            tracing::info!("discovery stopping");
        }
        *state = DiscoveryState::Stopped;
        self.shutdown.shutdown();
    }

    /// Wait for the spawned tasks to finish after [`DiscoveryService::stop`].
    pub async fn join(&self) {
        let handles: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in handles {
            let _ = handle.await;
        }
    }

    async fn run_sender(self: Arc<Self>, socket: UdpSocket, mut shutdown_rx: broadcast::Receiver<()>) {
        let target = SocketAddr::V4(SocketAddrV4::new(self.config.group, self.config.port));
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !self.shutdown.is_shutdown() {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    tracing::debug!("heartbeat sender shutting down");
                    break;
                }
                _ = interval.tick() => {
                    if self.shutdown.is_shutdown() {
                        break;
                    }
                    let datagram = Heartbeat::new(&self.config.local_address, self.is_online()).encode();
                    if let Err(e) = socket.send_to(&datagram, target).await {
                        tracing::warn!(error = %e, "failed to send heartbeat");
                    }
                }
            }
        }
    }

    async fn run_listener(self: Arc<Self>, socket: UdpSocket, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut buf = vec![0u8; MAX_DATAGRAM];

        while !self.shutdown.is_shutdown() {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    tracing::debug!("heartbeat listener shutting down");
                    break;
                }
                received = socket.recv_from(&mut buf) => {
                    match received {
                        Ok(_) if self.shutdown.is_shutdown() => break,
                        Ok((n, from)) => {
                            tracing::trace!(%from, bytes = n, "heartbeat datagram");
                            self.handle_datagram(&buf[..n], Timestamp::now());
                        }
                        Err(e) => tracing::warn!(error = %e, "heartbeat receive failed"),
                    }
                }
            }
        }

        if let Err(e) = socket.leave_multicast_v4(self.config.group, Ipv4Addr::UNSPECIFIED) {
            tracing::debug!(error = %e, "failed to leave multicast group");
        }
    }

    async fn run_reaper(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(self.config.timeout_check_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !self.shutdown.is_shutdown() {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    tracing::debug!("timeout reaper shutting down");
                    break;
                }
                _ = interval.tick() => {
                    if self.shutdown.is_shutdown() {
                        break;
                    }
                    self.reap(Timestamp::now());
                }
            }
        }
    }

    /// Process one received heartbeat. Returns `true` if it created a peer.
    pub fn handle_datagram(&self, datagram: &[u8], now: Timestamp) -> bool {
        let heartbeat = match Heartbeat::parse(datagram) {
            Ok(hb) => hb,
            Err(e) => {
                tracing::debug!(error = %e, "ignoring malformed heartbeat");
                return false;
            }
        };
        if heartbeat.address == self.config.local_address {
            return false;
        }

        let up = self
            .registry
            .upsert_at(&heartbeat.address, heartbeat.online, now);
        if up.created {
            tracing::info!(peer = %up.peer.address, online = up.peer.online, "discovered peer");
            self.metrics.peer_count.set(self.registry.count() as i64);
            self.events.on_new_peer(&up.peer);
        }
        up.created
    }

    /// Evict every peer silent for longer than the timeout. Returns how many.
    pub fn reap(&self, now: Timestamp) -> usize {
        let limit = self.config.peer_timeout;
        let mut evicted = 0;
        for stale in self.registry.expired(now, limit) {
            // A heartbeat may have refreshed it since the scan.
            if let Some(peer) = self.registry.remove_if_expired(&stale.address, now, limit) {
                tracing::info!(peer = %peer.address, "peer timed out");
                self.metrics.peers_evicted.inc();
                self.events.on_peer_lost(&peer);
                evicted += 1;
            }
        }
        if evicted > 0 {
            self.metrics.peer_count.set(self.registry.count() as i64);
        }
        evicted
    }
}
