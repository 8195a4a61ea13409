//! Peer address parsing.
//!
//! Peers are normally identified by a bare IP and reached on the shared
//! messaging port. When several processes share one host (tests, demos) the
//! address carries an explicit port instead: `"127.0.0.1:40001"`.

use std::net::{IpAddr, SocketAddr};

use crate::TypesError;

/// Resolve a peer address string to the socket to dial.
///
/// `default_port` is used when the address is a bare IP.
pub fn socket_addr_for(address: &str, default_port: u16) -> Result<SocketAddr, TypesError> {
    if let Ok(sock) = address.parse::<SocketAddr>() {
        return Ok(sock);
    }
    address
        .parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, default_port))
        .map_err(|_| TypesError::InvalidAddress(address.to_string()))
}

/// The canonical peer address for a local endpoint.
///
/// Endpoints on the default messaging port advertise a bare IP; anything
/// else advertises `ip:port` so peers dial back to the right listener.
pub fn peer_address_for(addr: SocketAddr, default_port: u16) -> String {
    if addr.port() == default_port {
        addr.ip().to_string()
    } else {
        addr.to_string()
    }
}
