use bytes::Bytes;
use prost::Message;

use crate::{event::Event, proto::featuremap::Envelope};

/// Serialize `event` as published by `origin_id`.
pub fn encode(origin_id: &str, event: &Event) -> Bytes {
    Envelope {
        id: origin_id.to_string(),
        r#type: event.wire_kind().to_string(),
        data: event.feature().map(Into::into),
    }
    .encode_to_vec()
    .into()
}
