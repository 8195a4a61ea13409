//! Text encoding for cross-platform peers.
//!
//! The codec only knows the end marker. Field layout is the serializer's
//! business; [`FieldTextSerializer`] is the stock layout, using `&` between
//! fields and hex for raw bytes so neither reserved character can leak into
//! a rendered frame.

use lanmesh_messages::{Envelope, MessageBody, MessageKind, Probe};

use crate::ProtocolError;

/// Terminates every text frame.
pub const END_MARKER: u8 = b'%';

/// Separates fields inside a rendered envelope. Not interpreted by the codec.
pub const FIELD_SEPARATOR: char = '&';

/// Application-supplied text rendering of envelopes.
///
/// `deserialize(serialize(e))` must reconstruct an envelope equal to `e`
/// under the application's notion of equality.
pub trait TextSerializer: Send + Sync {
    fn serialize(&self, envelope: &Envelope) -> Result<String, ProtocolError>;
    fn deserialize(&self, text: &str) -> Result<Envelope, ProtocolError>;
}

/// `<kind>&<source>&<fields…>` with hex-encoded byte fields.
///
/// ```text
/// app&10.0.0.2&68656c6c6f
/// probe-out&10.0.0.2&17&10.0.0.2&000102
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct FieldTextSerializer;

impl FieldTextSerializer {
    fn check_field(field: &str) -> Result<(), ProtocolError> {
        if field.contains(FIELD_SEPARATOR) || field.as_bytes().contains(&END_MARKER) {
            return Err(ProtocolError::Serializer(format!(
                "field {field:?} contains a reserved character"
            )));
        }
        Ok(())
    }

    fn decode_hex(field: &str) -> Result<Vec<u8>, ProtocolError> {
        hex::decode(field).map_err(|e| ProtocolError::Serializer(format!("bad hex field: {e}")))
    }
}

impl TextSerializer for FieldTextSerializer {
    fn serialize(&self, envelope: &Envelope) -> Result<String, ProtocolError> {
        Self::check_field(&envelope.source)?;
        let sep = FIELD_SEPARATOR;
        let kind = envelope.kind();
        let text = match &envelope.body {
            MessageBody::Application(payload) => {
                format!("{kind}{sep}{}{sep}{}", envelope.source, hex::encode(payload))
            }
            MessageBody::ProbeOutbound(probe) | MessageBody::ProbeReturn(probe) => {
                Self::check_field(&probe.origin)?;
                format!(
                    "{kind}{sep}{}{sep}{}{sep}{}{sep}{}",
                    envelope.source,
                    probe.id,
                    probe.origin,
                    hex::encode(&probe.padding)
                )
            }
        };
        Ok(text)
    }

    fn deserialize(&self, text: &str) -> Result<Envelope, ProtocolError> {
        let fields: Vec<&str> = text.split(FIELD_SEPARATOR).collect();
        let kind = fields
            .first()
            .and_then(|k| MessageKind::parse(k))
            .ok_or_else(|| ProtocolError::Serializer(format!("unknown message kind in {text:?}")))?;

        match (kind, fields.as_slice()) {
            (MessageKind::Application, [_, source, payload]) => Ok(Envelope::new(
                *source,
                MessageBody::Application(Self::decode_hex(payload)?),
            )),
            (MessageKind::ProbeOutbound | MessageKind::ProbeReturn, [_, source, id, origin, padding]) => {
                let probe = Probe {
                    id: id
                        .parse()
                        .map_err(|_| ProtocolError::Serializer(format!("bad probe id {id:?}")))?,
                    origin: origin.to_string(),
                    padding: Self::decode_hex(padding)?,
                };
                let body = if kind == MessageKind::ProbeOutbound {
                    MessageBody::ProbeOutbound(probe)
                } else {
                    MessageBody::ProbeReturn(probe)
                };
                Ok(Envelope::new(*source, body))
            }
            _ => Err(ProtocolError::Serializer(format!(
                "wrong field count {} for {kind}",
                fields.len()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn application_layout() {
        let env = Envelope::new("10.0.0.2", MessageBody::Application(b"hello".to_vec()));
        let text = FieldTextSerializer.serialize(&env).unwrap();
        assert_eq!(text, "app&10.0.0.2&68656c6c6f");
        assert_eq!(FieldTextSerializer.deserialize(&text).unwrap(), env);
    }

    #[test]
    fn probe_layout() {
        let env = Envelope::new(
            "10.0.0.2",
            MessageBody::ProbeOutbound(Probe {
                id: 17,
                origin: "10.0.0.2".into(),
                padding: vec![0, 1, 2],
            }),
        );
        let text = FieldTextSerializer.serialize(&env).unwrap();
        assert_eq!(text, "probe-out&10.0.0.2&17&10.0.0.2&000102");
        assert_eq!(FieldTextSerializer.deserialize(&text).unwrap(), env);
    }

    #[test]
    fn empty_payload_survives() {
        let env = Envelope::new("10.0.0.2", MessageBody::Application(Vec::new()));
        let text = FieldTextSerializer.serialize(&env).unwrap();
        assert_eq!(FieldTextSerializer.deserialize(&text).unwrap(), env);
    }

    #[test]
    fn reserved_characters_in_source_are_refused() {
        let env = Envelope::new("10.0.0.2&x", MessageBody::Application(vec![]));
        assert!(matches!(
            FieldTextSerializer.serialize(&env),
            Err(ProtocolError::Serializer(_))
        ));
    }

    #[test]
    fn garbage_is_refused() {
        for text in ["", "nope&1&2", "app&only-two", "probe-ret&a&notanumber&b&00", "app&a&zz"] {
            assert!(FieldTextSerializer.deserialize(text).is_err(), "{text:?}");
        }
    }
}
