//! The remote host record tracked for liveness.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::Timestamp;

/// A remote host identified by its transport address.
///
/// Equality and hashing look at the address only; two records for the same
/// address with different liveness data compare equal.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Peer {
    /// `"ip"` or `"ip:port"`.
    pub address: String,
    /// Status advertised in the peer's last heartbeat.
    pub online: bool,
    /// Last time any heartbeat or message was received from the peer.
    pub last_seen: Timestamp,
}

impl Peer {
    pub fn new(address: impl Into<String>, online: bool, last_seen: Timestamp) -> Self {
        Self {
            address: address.into(),
            online,
            last_seen,
        }
    }

    /// A record for a peer that was just dropped, used for loss notifications
    /// when no registry entry is available.
    pub fn offline(address: impl Into<String>) -> Self {
        Self::new(address, false, Timestamp::now())
    }
}

impl PartialEq for Peer {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for Peer {}

impl Hash for Peer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({})",
            self.address,
            if self.online { "online" } else { "offline" }
        )
    }
}
