//! Discovery heartbeat datagram.
//!
//! ASCII text: `<address>:..:<Y|N>:..:`. The separator is a multi-character
//! token that cannot collide with the messaging frame markers (`%`, `&`).

use thiserror::Error;

/// Field separator inside a heartbeat datagram.
pub const HEARTBEAT_FIELD_SEPARATOR: &str = ":..:";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeartbeatError {
    #[error("heartbeat is not valid UTF-8")]
    NotUtf8,

    #[error("heartbeat has no address field")]
    MissingAddress,

    #[error("heartbeat has no status field")]
    MissingStatus,
}

/// A host's periodic liveness announcement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Heartbeat {
    pub address: String,
    pub online: bool,
}

impl Heartbeat {
    pub fn new(address: impl Into<String>, online: bool) -> Self {
        Self {
            address: address.into(),
            online,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        format!(
            "{addr}{sep}{status}{sep}",
            addr = self.address,
            sep = HEARTBEAT_FIELD_SEPARATOR,
            status = if self.online { "Y" } else { "N" },
        )
        .into_bytes()
    }

    /// Parse a received datagram. Anything other than `Y` reads as offline.
    pub fn parse(datagram: &[u8]) -> Result<Self, HeartbeatError> {
        let text = std::str::from_utf8(datagram).map_err(|_| HeartbeatError::NotUtf8)?;
        let mut fields = text.split(HEARTBEAT_FIELD_SEPARATOR);

        let address = fields
            .next()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .ok_or(HeartbeatError::MissingAddress)?;
        let status = fields.next().ok_or(HeartbeatError::MissingStatus)?;

        Ok(Self {
            address: address.to_string(),
            online: status == "Y",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_matches_wire_format() {
        assert_eq!(Heartbeat::new("10.0.0.2", true).encode(), b"10.0.0.2:..:Y:..:");
        assert_eq!(Heartbeat::new("10.0.0.2", false).encode(), b"10.0.0.2:..:N:..:");
    }

    #[test]
    fn parse_round_trips() {
        let hb = Heartbeat::new("192.168.1.20", true);
        assert_eq!(Heartbeat::parse(&hb.encode()).unwrap(), hb);
    }

    #[test]
    fn parse_accepts_ip_port_addresses() {
        let hb = Heartbeat::new("127.0.0.1:40001", false);
        assert_eq!(Heartbeat::parse(&hb.encode()).unwrap(), hb);
    }

    #[test]
    fn malformed_datagrams_are_rejected() {
        assert_eq!(Heartbeat::parse(b""), Err(HeartbeatError::MissingAddress));
        assert_eq!(Heartbeat::parse(b"10.0.0.2"), Err(HeartbeatError::MissingStatus));
        assert_eq!(Heartbeat::parse(&[0xff, 0xfe]), Err(HeartbeatError::NotUtf8));
    }

    #[test]
    fn unknown_status_reads_offline() {
        let hb = Heartbeat::parse(b"10.0.0.2:..:maybe:..:").unwrap();
        assert!(!hb.online);
    }
}
