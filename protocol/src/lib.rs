//! Wire protocol: framing and encoding of messaging envelopes.
//!
//! Both peers of a session must agree on one [`Encoding`], fixed at process
//! configuration time:
//! - [`Encoding::Native`]: bincode body behind a 4-byte big-endian length.
//! - [`Encoding::Text`]: an application [`TextSerializer`] renders the
//!   envelope; frames end with [`END_MARKER`].

pub mod codec;
pub mod error;
pub mod text;

pub use codec::{write_frame, Encoding, FrameReader, WireCodec, MAX_FRAME_SIZE};
pub use error::ProtocolError;
pub use text::{FieldTextSerializer, TextSerializer, END_MARKER, FIELD_SEPARATOR};
