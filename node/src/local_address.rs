//! Resolution of the address this node advertises to its peers.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

use lanmesh_network::DEFAULT_MESSAGE_PORT;
use lanmesh_types::peer_address_for;

use crate::{NodeConfig, NodeError};

/// Any routable unicast address works: connecting a UDP socket sends
/// nothing, it only asks the kernel which interface would be used.
const ROUTE_PROBE: (Ipv4Addr, u16) = (Ipv4Addr::new(192, 0, 2, 1), 9);

/// IPv4 address of the interface carrying the default route.
///
/// Loopback and unspecified results mean there is no usable network.
pub fn resolve_local_ip() -> Result<Ipv4Addr, NodeError> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).map_err(|_| NodeError::NoNetwork)?;
    socket.connect(ROUTE_PROBE).map_err(|_| NodeError::NoNetwork)?;
    match socket.local_addr().map_err(|_| NodeError::NoNetwork)?.ip() {
        IpAddr::V4(ip) if !ip.is_loopback() && !ip.is_unspecified() => Ok(ip),
        _ => Err(NodeError::NoNetwork),
    }
}

/// The address to advertise: the configured one, or the resolved interface
/// address with the message port appended when it is not the default.
pub fn resolve_local_address(config: &NodeConfig) -> Result<String, NodeError> {
    if let Some(address) = &config.local_address {
        return Ok(address.clone());
    }
    let ip = resolve_local_ip()?;
    let address = peer_address_for(
        SocketAddr::new(IpAddr::V4(ip), config.message_port),
        DEFAULT_MESSAGE_PORT,
    );
    tracing::debug!(%address, "resolved local address");
    Ok(address)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_address_wins() {
        let config = NodeConfig {
            local_address: Some("127.0.0.1:4000".into()),
            ..NodeConfig::default()
        };
        assert_eq!(resolve_local_address(&config).unwrap(), "127.0.0.1:4000");
    }

    #[test]
    fn resolved_address_is_never_loopback() {
        // Hosts without a default route legitimately report NoNetwork.
        if let Ok(ip) = resolve_local_ip() {
            assert!(!ip.is_loopback());
            let config = NodeConfig {
                message_port: 7000,
                ..NodeConfig::default()
            };
            let address = resolve_local_address(&config).unwrap();
            assert_eq!(address, format!("{ip}:7000"));
        }
    }
}
