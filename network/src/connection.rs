//! Outbound connection pool.
//!
//! At most one connection per peer address. Each entry owns the write half
//! of its stream behind an async mutex so concurrent senders never
//! interleave frames; the map itself sits behind a short-lived std lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::io::{AsyncWrite, AsyncWriteExt};

use lanmesh_protocol::write_frame;

/// Write half of a pooled stream.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// One pooled outbound connection.
pub struct PooledConnection {
    address: String,
    writer: tokio::sync::Mutex<BoxedWriter>,
    connected: AtomicBool,
}

impl PooledConnection {
    pub fn new(address: impl Into<String>, writer: BoxedWriter) -> Self {
        Self {
            address: address.into(),
            writer: tokio::sync::Mutex::new(writer),
            connected: AtomicBool::new(true),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Write one complete frame. A failed write marks the connection dead.
    pub async fn write(&self, frame: &[u8]) -> std::io::Result<()> {
        if !self.is_connected() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "connection already closed",
            ));
        }
        let mut writer = self.writer.lock().await;
        let result = write_frame(&mut *writer, frame).await;
        if result.is_err() {
            self.connected.store(false, Ordering::SeqCst);
        }
        result
    }

    /// Half-close the stream. Errors are irrelevant once we are tearing down.
    pub async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

/// Connection pool keyed by peer address.
#[derive(Default)]
pub struct ConnectionPool {
    connections: Mutex<HashMap<String, Arc<PooledConnection>>>,
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<PooledConnection>>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// The live connection to `address`, if any.
    pub fn get(&self, address: &str) -> Option<Arc<PooledConnection>> {
        self.lock()
            .get(address)
            .filter(|c| c.is_connected())
            .cloned()
    }

    pub fn contains(&self, address: &str) -> bool {
        self.get(address).is_some()
    }

    /// Pool `conn` unless a live connection to the same address exists.
    ///
    /// Returns the pooled connection and whether `conn` was the one stored.
    /// A dead entry for the address is replaced.
    pub fn insert(&self, conn: PooledConnection) -> (Arc<PooledConnection>, bool) {
        let mut map = self.lock();
        if let Some(existing) = map.get(conn.address()) {
            if existing.is_connected() {
                return (Arc::clone(existing), false);
            }
        }
        let conn = Arc::new(conn);
        map.insert(conn.address().to_string(), Arc::clone(&conn));
        (conn, true)
    }

    pub fn remove(&self, address: &str) -> Option<Arc<PooledConnection>> {
        self.lock().remove(address)
    }

    /// Remove the entry for `conn`'s address only if it is still `conn`.
    ///
    /// A receive loop for a replaced connection must not evict its successor.
    pub fn remove_exact(&self, conn: &Arc<PooledConnection>) -> bool {
        let mut map = self.lock();
        match map.get(conn.address()) {
            Some(current) if Arc::ptr_eq(current, conn) => {
                map.remove(conn.address());
                true
            }
            _ => false,
        }
    }

    /// Addresses with a live pooled connection.
    pub fn addresses(&self) -> Vec<String> {
        self.lock()
            .values()
            .filter(|c| c.is_connected())
            .map(|c| c.address().to_string())
            .collect()
    }

    /// Empty the pool, handing back every entry for teardown.
    pub fn drain(&self) -> Vec<Arc<PooledConnection>> {
        self.lock().drain().map(|(_, c)| c).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
