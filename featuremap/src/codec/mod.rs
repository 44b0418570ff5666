//! Converts between [Event](crate::Event)s and the payload bytes carried by the bus.
//!
//! Every payload is a protobuf [Envelope](crate::proto::featuremap::Envelope)
//! naming the publishing client, the event kind as a string and, for
//! feature events, the feature itself. Kinds this client doesn't know decode
//! successfully to [Event::Unknown](crate::Event::Unknown) so that newer clients can share a room
//! with older ones.

mod decoder;
mod encoder;

pub use decoder::{decode, decode_message};
pub use encoder::encode;

