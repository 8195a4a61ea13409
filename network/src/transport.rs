//! Point-to-point messaging over pooled TCP connections.
//!
//! Outbound traffic goes through the [`ConnectionPool`]; inbound traffic is
//! accepted by the listener and decoded by one receive loop per connection.
//! Receive loops dispatch on the decoded [`MessageBody`]:
//! - `Application` payloads go to the consumer
//! - `ProbeOutbound` is echoed back to the probe's origin
//! - `ProbeReturn` completes the waiting throughput scan
//!
//! Any per-peer failure drops that peer from the pool and the registry and
//! reports it once through [`PeerEvents::on_peer_lost`].

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::AsyncRead;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Semaphore};

use lanmesh_messages::{Envelope, MessageBody};
use lanmesh_protocol::WireCodec;
use lanmesh_types::{socket_addr_for, PeerEvents};

use crate::broadcast::BroadcastResult;
use crate::connection::{ConnectionPool, PooledConnection};
use crate::{NetworkError, NetworkMetrics, PeerRegistry, ProbeRendezvous, ShutdownController};

/// Timeout for establishing an outbound TCP connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Messaging port assumed for peer addresses that carry none.
pub const DEFAULT_MESSAGE_PORT: u16 = 9999;

#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Our own address, stamped as `source` on every envelope.
    pub local_address: String,
    /// Port dialed for peer addresses without an explicit one.
    pub default_port: u16,
    pub listen_addr: SocketAddr,
    pub max_inbound_connections: usize,
    pub connect_timeout: Duration,
    pub broadcast_interval: Duration,
    /// Open an outbound connection to every sender we learn about.
    pub auto_connect: bool,
}

impl TransportConfig {
    pub fn new(local_address: impl Into<String>, listen_port: u16) -> Self {
        Self {
            local_address: local_address.into(),
            default_port: DEFAULT_MESSAGE_PORT,
            listen_addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, listen_port)),
            max_inbound_connections: 64,
            connect_timeout: CONNECT_TIMEOUT,
            broadcast_interval: Duration::from_millis(30),
            auto_connect: false,
        }
    }
}

pub struct Transport {
    pub(crate) config: TransportConfig,
    codec: WireCodec,
    registry: Arc<PeerRegistry>,
    pool: ConnectionPool,
    events: Arc<dyn PeerEvents>,
    rendezvous: Arc<ProbeRendezvous>,
    pub(crate) metrics: Arc<NetworkMetrics>,
    /// Stops every receive loop, inbound and outbound.
    closing: ShutdownController,
    listener: Mutex<Option<Arc<ShutdownController>>>,
    pub(crate) broadcaster: Mutex<Option<Arc<ShutdownController>>>,
}

impl Transport {
    pub fn new(
        config: TransportConfig,
        codec: WireCodec,
        registry: Arc<PeerRegistry>,
        events: Arc<dyn PeerEvents>,
        rendezvous: Arc<ProbeRendezvous>,
        metrics: Arc<NetworkMetrics>,
    ) -> Self {
        Self {
            config,
            codec,
            registry,
            pool: ConnectionPool::new(),
            events,
            rendezvous,
            metrics,
            closing: ShutdownController::new(),
            listener: Mutex::new(None),
            broadcaster: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn codec(&self) -> &WireCodec {
        &self.codec
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn local_address(&self) -> &str {
        &self.config.local_address
    }

    fn update_pool_gauge(&self) {
        self.metrics
            .pooled_connections
            .set(self.pool.addresses().len() as i64);
    }

    // ── Outbound ───────────────────────────────────────────────────────

    /// Make sure a pooled connection to `address` exists.
    ///
    /// Idempotent. Returns whether a live connection exists afterwards.
    pub async fn connect(self: &Arc<Self>, address: &str) -> bool {
        if self.pool.contains(address) {
            return true;
        }
        if self.closing.is_shutdown() {
            return false;
        }

        let target = match socket_addr_for(address, self.config.default_port) {
            Ok(addr) => addr,
            Err(e) => {
                tracing::warn!(peer = %address, error = %e, "cannot connect to peer");
                return false;
            }
        };

        let stream =
            match tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(target)).await {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    tracing::debug!(peer = %address, error = %e, "connect failed");
                    return false;
                }
                Err(_) => {
                    tracing::debug!(peer = %address, "connect timed out");
                    return false;
                }
            };
        let _ = stream.set_nodelay(true);

        let (read_half, write_half) = stream.into_split();
        let (conn, inserted) = self
            .pool
            .insert(PooledConnection::new(address, Box::new(write_half)));
        if !inserted {
            // Lost a race with a concurrent connect; ours is dropped here.
            return true;
        }
        self.update_pool_gauge();
        tracing::debug!(peer = %address, %target, "connected");

        self.spawn_receive_loop(read_half, target, None, Some(conn));
        true
    }

    /// Close and forget the pooled connection to `address`, if any.
    pub async fn disconnect(&self, address: &str) {
        if let Some(conn) = self.pool.remove(address) {
            conn.close().await;
            self.update_pool_gauge();
            tracing::debug!(peer = %address, "disconnected");
        }
    }

    /// Send one message to a pooled peer.
    pub async fn send(&self, address: &str, body: &MessageBody) -> Result<(), NetworkError> {
        if matches!(body, MessageBody::Application(payload) if payload.is_empty()) {
            return Ok(());
        }
        let frame = self.encode(body)?;
        self.send_frame(address, &frame).await
    }

    /// Send one message to every online peer with a pooled connection.
    ///
    /// Individual failures are counted, never fatal.
    pub async fn send_to_all(&self, body: &MessageBody) -> Result<BroadcastResult, NetworkError> {
        let mut result = BroadcastResult::default();
        if matches!(body, MessageBody::Application(payload) if payload.is_empty()) {
            return Ok(result);
        }
        let frame = self.encode(body)?;

        for address in self.registry.online_addresses() {
            if !self.pool.contains(&address) {
                continue;
            }
            match self.send_frame(&address, &frame).await {
                Ok(()) => result.sent += 1,
                Err(_) => result.failed += 1,
            }
        }
        Ok(result)
    }

    fn encode(&self, body: &MessageBody) -> Result<Vec<u8>, NetworkError> {
        let envelope = Envelope::new(self.config.local_address.clone(), body.clone());
        Ok(self.codec.encode(&envelope)?)
    }

    async fn send_frame(&self, address: &str, frame: &[u8]) -> Result<(), NetworkError> {
        let conn = self
            .pool
            .get(address)
            .ok_or_else(|| NetworkError::NotConnected(address.to_string()))?;

        match conn.write(frame).await {
            Ok(()) => {
                self.metrics.messages_sent.inc();
                Ok(())
            }
            Err(e) => {
                tracing::warn!(peer = %address, error = %e, "send failed, dropping peer");
                self.metrics.send_failures.inc();
                self.pool.remove_exact(&conn);
                self.update_pool_gauge();
                self.drop_peer(address);
                Err(NetworkError::Io(e))
            }
        }
    }

    /// Remove `address` from the registry and report it lost, once.
    fn drop_peer(&self, address: &str) {
        if let Some(peer) = self.registry.remove(address) {
            self.metrics.peers_evicted.inc();
            self.metrics.peer_count.set(self.registry.count() as i64);
            self.events.on_peer_lost(&peer);
        }
    }

    // ── Inbound ────────────────────────────────────────────────────────

    /// Bind the listener and spawn the accept loop. Returns the bound address.
    pub async fn start_listener(self: &Arc<Self>) -> Result<SocketAddr, NetworkError> {
        if self.listener_running() {
            return Err(NetworkError::AlreadyStarted("listener"));
        }
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        let bound = listener.local_addr()?;

        let stop = Arc::new(ShutdownController::new());
        {
            let mut slot = self.listener.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.is_some() {
                return Err(NetworkError::AlreadyStarted("listener"));
            }
            *slot = Some(Arc::clone(&stop));
        }

        let stop_rx = stop.subscribe();
        let closing_rx = self.closing.subscribe();
        let transport = Arc::clone(self);
        tokio::spawn(async move {
            transport
                .accept_loop(listener, stop, stop_rx, closing_rx)
                .await
        });
        tracing::info!(addr = %bound, "message listener started");
        Ok(bound)
    }

    /// Stop accepting and end every inbound receive loop.
    pub fn stop_listener(&self) {
        let stop = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(stop) = stop {
            stop.shutdown();
            tracing::info!("message listener stopped");
        }
    }

    pub fn listener_running(&self) -> bool {
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    async fn accept_loop(
        self: Arc<Self>,
        listener: TcpListener,
        stop: Arc<ShutdownController>,
        mut stop_rx: broadcast::Receiver<()>,
        mut closing_rx: broadcast::Receiver<()>,
    ) {
        let slots = Arc::new(Semaphore::new(self.config.max_inbound_connections));

        loop {
            if stop.is_shutdown() || self.closing.is_shutdown() {
                break;
            }
            let accepted = tokio::select! {
                biased;
                _ = stop_rx.recv() => break,
                _ = closing_rx.recv() => break,
                accepted = listener.accept() => accepted,
            };

            let (stream, remote) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    continue;
                }
            };

            let permit = match Arc::clone(&slots).try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    tracing::warn!(%remote, "inbound connection limit reached, closing");
                    drop(stream);
                    continue;
                }
            };

            // Subscribe before checking so a stop in between is still seen.
            let stop_rx = stop.subscribe();
            let closing_rx = self.closing.subscribe();
            if stop.is_shutdown() || self.closing.is_shutdown() {
                break;
            }

            tracing::debug!(%remote, "accepted connection");
            let _ = stream.set_nodelay(true);
            let transport = Arc::clone(&self);
            tokio::spawn(async move {
                transport
                    .receive_loop(stream, remote, Some(stop_rx), closing_rx, None)
                    .await;
                drop(permit);
            });
        }
        tracing::debug!("accept loop exited");
    }

    /// Spawn a receive loop for the read half of an outbound connection.
    ///
    /// A plain function so `connect`'s future does not contain the loop's.
    fn spawn_receive_loop<R>(
        self: &Arc<Self>,
        stream: R,
        remote: SocketAddr,
        stop_rx: Option<broadcast::Receiver<()>>,
        outbound: Option<Arc<PooledConnection>>,
    ) where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let transport = Arc::clone(self);
        let closing_rx = self.closing.subscribe();
        tokio::spawn(async move {
            transport
                .receive_loop(stream, remote, stop_rx, closing_rx, outbound)
                .await;
        });
    }

    /// Decode frames from one connection until it fails or we are told to stop.
    ///
    /// `outbound` is set when `stream` is the read half of a pooled
    /// connection; its pool entry is dropped when the loop ends.
    async fn receive_loop<R: AsyncRead + Unpin>(
        self: Arc<Self>,
        stream: R,
        remote: SocketAddr,
        mut stop_rx: Option<broadcast::Receiver<()>>,
        mut closing_rx: broadcast::Receiver<()>,
        outbound: Option<Arc<PooledConnection>>,
    ) {
        let mut frames = self.codec.reader(stream);
        let mut sender: Option<String> = outbound.as_ref().map(|c| c.address().to_string());

        let failure = loop {
            let frame = tokio::select! {
                biased;
                _ = closing_rx.recv() => break None,
                _ = recv_or_pending(&mut stop_rx) => break None,
                frame = frames.read_frame() => frame,
            };

            match frame {
                Ok(Some(envelope)) => {
                    self.metrics.messages_received.inc();
                    sender = Some(envelope.source.clone());
                    self.dispatch(envelope).await;
                }
                Ok(None) => break Some("connection closed".to_string()),
                Err(e) => break Some(e.to_string()),
            }
        };

        let Some(reason) = failure else {
            tracing::trace!(%remote, "receive loop stopped");
            return;
        };
        let Some(address) = sender else {
            tracing::debug!(%remote, %reason, "anonymous connection ended");
            return;
        };

        match &outbound {
            Some(conn) => {
                // Not in the pool any more: torn down on purpose or replaced.
                if !self.pool.remove_exact(conn) {
                    tracing::trace!(peer = %address, "closed outbound connection ended");
                    return;
                }
            }
            None => {
                if let Some(conn) = self.pool.remove(&address) {
                    conn.close().await;
                }
            }
        }
        self.update_pool_gauge();
        tracing::debug!(peer = %address, %remote, %reason, "connection lost");
        self.drop_peer(&address);
    }

    async fn dispatch(self: &Arc<Self>, envelope: Envelope) {
        let Envelope { source, body } = envelope;
        self.register_sender(&source);

        match body {
            MessageBody::Application(payload) => self.events.on_data(&source, payload),
            MessageBody::ProbeOutbound(probe) => {
                let origin = probe.origin.clone();
                let id = probe.id;
                if !self.connect(&origin).await {
                    tracing::warn!(peer = %origin, probe = id, "cannot echo probe");
                    return;
                }
                if let Err(e) = self.send(&origin, &MessageBody::ProbeReturn(probe)).await {
                    tracing::warn!(peer = %origin, probe = id, error = %e, "probe echo failed");
                }
            }
            MessageBody::ProbeReturn(probe) => {
                if !self.rendezvous.complete(probe.id) {
                    tracing::debug!(probe = probe.id, "late or unknown probe return");
                }
            }
        }
    }

    /// Touch a known sender or register a new one.
    fn register_sender(self: &Arc<Self>, source: &str) {
        if self.registry.touch(source) {
            return;
        }
        let up = self.registry.upsert(source, true);
        if !up.created {
            return;
        }
        tracing::info!(peer = %source, "new peer from inbound message");
        self.metrics.peer_count.set(self.registry.count() as i64);
        self.events.on_new_peer(&up.peer);

        if self.config.auto_connect && source != self.config.local_address {
            let transport = Arc::clone(self);
            let address = source.to_string();
            tokio::spawn(async move {
                transport.connect(&address).await;
            });
        }
    }

    /// Stop the listener, the broadcaster and every receive loop, and close
    /// all pooled connections.
    pub async fn shutdown(&self) {
        self.stop_listener();
        self.stop_broadcaster();
        self.closing.shutdown();
        for conn in self.pool.drain() {
            conn.close().await;
        }
        self.update_pool_gauge();
    }
}

async fn recv_or_pending(rx: &mut Option<broadcast::Receiver<()>>) {
    match rx {
        Some(rx) => {
            let _ = rx.recv().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanmesh_nullables::RecordingEvents;

    struct Fixture {
        transport: Arc<Transport>,
        registry: Arc<PeerRegistry>,
        events: Arc<RecordingEvents>,
    }

    fn fixture(local: &str) -> Fixture {
        let registry = Arc::new(PeerRegistry::new());
        let events = Arc::new(RecordingEvents::new());
        let mut config = TransportConfig::new(local, 0);
        config.listen_addr = "127.0.0.1:0".parse().unwrap();
        let transport = Arc::new(Transport::new(
            config,
            WireCodec::Native,
            Arc::clone(&registry),
            events.clone(),
            Arc::new(ProbeRendezvous::new()),
            Arc::new(NetworkMetrics::new()),
        ));
        Fixture {
            transport,
            registry,
            events,
        }
    }

    async fn eventually(cond: impl Fn() -> bool) -> bool {
        for _ in 0..200 {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn send_without_connection_is_not_connected() {
        let f = fixture("127.0.0.1:1");
        let err = f
            .transport
            .send("127.0.0.1:2", &MessageBody::Application(b"x".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, NetworkError::NotConnected(_)));
    }

    #[tokio::test]
    async fn empty_application_payload_is_a_noop() {
        let f = fixture("127.0.0.1:1");
        f.transport
            .send("127.0.0.1:2", &MessageBody::Application(Vec::new()))
            .await
            .unwrap();
        let result = f
            .transport
            .send_to_all(&MessageBody::Application(Vec::new()))
            .await
            .unwrap();
        assert_eq!(result.sent + result.failed, 0);
    }

    #[tokio::test]
    async fn connect_to_closed_port_fails() {
        let f = fixture("127.0.0.1:1");
        let unused = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = unused.local_addr().unwrap();
        drop(unused);
        assert!(!f.transport.connect(&addr.to_string()).await);
        assert!(f.transport.pool().is_empty());
    }

    #[tokio::test]
    async fn listener_delivers_payloads_and_registers_sender() {
        let rx = fixture("127.0.0.1:7001");
        let target = rx.transport.start_listener().await.unwrap().to_string();
        let tx = fixture("127.0.0.1:7002");

        assert!(tx.transport.connect(&target).await);
        assert!(tx.transport.connect(&target).await, "connect is idempotent");
        assert_eq!(tx.transport.pool().len(), 1);

        tx.transport
            .send(&target, &MessageBody::Application(b"hello".to_vec()))
            .await
            .unwrap();

        assert!(eventually(|| !rx.events.payloads().is_empty()).await);
        assert_eq!(rx.events.new_peers(), ["127.0.0.1:7002"]);
        assert_eq!(
            rx.events.payloads(),
            [("127.0.0.1:7002".to_string(), b"hello".to_vec())]
        );
        assert!(rx.registry.contains("127.0.0.1:7002"));

        rx.transport.shutdown().await;
        tx.transport.shutdown().await;
    }

    #[tokio::test]
    async fn send_to_all_skips_unpooled_and_offline_peers() {
        let rx = fixture("127.0.0.1:7011");
        let target = rx.transport.start_listener().await.unwrap().to_string();
        let tx = fixture("127.0.0.1:7012");

        tx.registry.upsert(&target, true);
        tx.registry.upsert("127.0.0.1:9", true);
        tx.registry.upsert("127.0.0.1:10", false);
        assert!(tx.transport.connect(&target).await);

        let result = tx
            .transport
            .send_to_all(&MessageBody::Application(b"tick".to_vec()))
            .await
            .unwrap();
        assert_eq!((result.sent, result.failed), (1, 0));
        assert!(eventually(|| rx.events.payloads().len() == 1).await);

        rx.transport.shutdown().await;
        tx.transport.shutdown().await;
    }

    #[tokio::test]
    async fn remote_close_drops_peer_once() {
        let rx = fixture("127.0.0.1:7021");
        let target = rx.transport.start_listener().await.unwrap().to_string();
        let tx = fixture("127.0.0.1:7022");
        tx.registry.upsert(&target, true);
        assert!(tx.transport.connect(&target).await);

        rx.transport.shutdown().await;

        assert!(eventually(|| !tx.registry.contains(&target)).await);
        assert!(eventually(|| tx.transport.pool().is_empty()).await);
        assert_eq!(tx.events.lost_peers(), [target.clone()]);
        tx.transport.shutdown().await;
    }

    #[tokio::test]
    async fn second_listener_start_is_rejected() {
        let f = fixture("127.0.0.1:1");
        f.transport.start_listener().await.unwrap();
        assert!(matches!(
            f.transport.start_listener().await,
            Err(NetworkError::AlreadyStarted("listener"))
        ));
        f.transport.stop_listener();
        assert!(!f.transport.listener_running());
    }

    #[tokio::test]
    async fn listener_stopped_right_after_start_delivers_nothing() {
        let rx = fixture("127.0.0.1:7301");
        let target = rx.transport.start_listener().await.unwrap().to_string();
        rx.transport.stop_listener();
        assert!(!rx.transport.listener_running());

        let tx = fixture("127.0.0.1:7302");
        tx.registry.upsert(&target, true);
        // The handshake may still complete from the kernel backlog.
        if tx.transport.connect(&target).await {
            let _ = tx
                .transport
                .send(&target, &MessageBody::Application(b"after-stop".to_vec()))
                .await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(rx.events.payloads().is_empty());
        assert!(rx.registry.is_empty());
        tx.transport.shutdown().await;
        rx.transport.shutdown().await;
    }
}
