//! Messaging envelope.
//!
//! Every frame on a messaging connection carries one [`Envelope`]. The body
//! is decoded once at the transport boundary; probes never reach the
//! application consumer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single message on a messaging connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Address of the sending host, as it advertises itself.
    pub source: String,
    pub body: MessageBody,
}

impl Envelope {
    pub fn new(source: impl Into<String>, body: MessageBody) -> Self {
        Self {
            source: source.into(),
            body,
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.body.kind()
    }
}

/// What an envelope carries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageBody {
    /// Opaque application payload.
    Application(Vec<u8>),
    /// Throughput probe on its way to the measured peer.
    ProbeOutbound(Probe),
    /// Throughput probe echoed back to its origin.
    ProbeReturn(Probe),
}

impl MessageBody {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Application(_) => MessageKind::Application,
            Self::ProbeOutbound(_) => MessageKind::ProbeOutbound,
            Self::ProbeReturn(_) => MessageKind::ProbeReturn,
        }
    }

    pub fn is_probe(&self) -> bool {
        !matches!(self, Self::Application(_))
    }
}

/// Discriminator used in logs, spans and text encodings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Application,
    ProbeOutbound,
    ProbeReturn,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Application => "app",
            Self::ProbeOutbound => "probe-out",
            Self::ProbeReturn => "probe-ret",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "app" => Some(Self::Application),
            "probe-out" => Some(Self::ProbeOutbound),
            "probe-ret" => Some(Self::ProbeReturn),
            _ => None,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Round-trip test message.
///
/// `padding` gives the probe a realistic size so the measured round-trip
/// reflects serialization and transfer of a non-trivial frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Probe {
    /// Identifies the scan step that is waiting for this probe.
    pub id: u64,
    /// Address the echo must be sent back to.
    pub origin: String,
    pub padding: Vec<u8>,
}

impl Probe {
    pub fn new(id: u64, origin: impl Into<String>, padding_len: usize) -> Self {
        Self {
            id,
            origin: origin.into(),
            padding: (0..padding_len).map(|i| (i % 251) as u8).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_round_trip_through_text() {
        for kind in [
            MessageKind::Application,
            MessageKind::ProbeOutbound,
            MessageKind::ProbeReturn,
        ] {
            assert_eq!(MessageKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(MessageKind::parse("bogus"), None);
    }

    #[test]
    fn probes_are_not_application_data() {
        let probe = Probe::new(1, "10.0.0.1", 8);
        assert!(MessageBody::ProbeOutbound(probe.clone()).is_probe());
        assert!(MessageBody::ProbeReturn(probe).is_probe());
        assert!(!MessageBody::Application(vec![1]).is_probe());
    }

    #[test]
    fn probe_padding_has_requested_length() {
        let probe = Probe::new(7, "10.0.0.1", 300);
        assert_eq!(probe.padding.len(), 300);
        assert_eq!(probe.padding[251], 0);
    }

    #[test]
    fn envelope_bincode_round_trip() {
        let env = Envelope::new("10.0.0.9", MessageBody::ProbeReturn(Probe::new(3, "10.0.0.1", 4)));
        let bytes = bincode::serialize(&env).unwrap();
        let back: Envelope = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, env);
        assert_eq!(back.kind(), MessageKind::ProbeReturn);
    }
}
