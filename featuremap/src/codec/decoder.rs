use prost::Message;

use crate::{
    bus::BusMessage,
    constants::{ADD_FEATURE_KIND, CLEAR_KIND, MODIFY_FEATURE_KIND},
    error::DecodeError,
    event::{Envelope, Event, FeatureRecord},
    proto::featuremap::{self, Feature},
};

/// Deserialize a payload in to its origin id and event.
pub fn decode(payload: &[u8]) -> Result<(String, Event), DecodeError> {
    let featuremap::Envelope { id, r#type, data } = featuremap::Envelope::decode(payload)?;
    let event = match r#type.as_str() {
        CLEAR_KIND => Event::Clear,
        ADD_FEATURE_KIND => Event::AddFeature(record(ADD_FEATURE_KIND, data)?),
        MODIFY_FEATURE_KIND => Event::ModifyFeature(record(MODIFY_FEATURE_KIND, data)?),
        _ => Event::Unknown(r#type.clone()),
    };
    Ok((id, event))
}

/// Decode a received bus message, keeping its headers.
pub fn decode_message(message: &BusMessage) -> Result<Envelope, DecodeError> {
    let (origin_id, event) = decode(&message.payload)?;
    Ok(Envelope {
        origin_id,
        event,
        headers: message.headers.clone(),
        sequence_position: 0,
    })
}

fn record(kind: &str, data: Option<Feature>) -> Result<FeatureRecord, DecodeError> {
    let feature = data.ok_or_else(|| DecodeError::MissingFeature(kind.to_string()))?;
    if feature.id.is_empty() {
        return Err(DecodeError::MissingId(kind.to_string()));
    }
    Ok(feature.into())
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::{bus::Headers, codec::encode};

    fn envelope(kind: &str, data: Option<Feature>) -> Vec<u8> {
        featuremap::Envelope {
            id: "me".into(),
            r#type: kind.into(),
            data,
        }
        .encode_to_vec()
    }

    #[test]
    fn feature_events() {
        let record = FeatureRecord::new("a", Bytes::from_static(b"{\"type\":\"Point\"}"))
            .with_color("#ff0000")
            .with_text("hello");
        let payload = encode("me", &Event::AddFeature(record.clone()));
        assert_eq!(
            decode(&payload).unwrap(),
            ("me".to_string(), Event::AddFeature(record.clone()))
        );

        let payload = encode("you", &Event::ModifyFeature(record.clone()));
        assert_eq!(
            decode(&payload).unwrap(),
            ("you".to_string(), Event::ModifyFeature(record))
        );
    }

    #[test]
    fn clear_has_no_data() {
        let payload = encode("me", &Event::Clear);
        let raw = featuremap::Envelope::decode(payload.as_ref()).unwrap();
        assert_eq!(raw.r#type, "clear");
        assert!(raw.data.is_none());
        assert_eq!(decode(&payload).unwrap().1, Event::Clear);
    }

    #[test]
    fn unknown_kind_decodes() {
        let payload = envelope("DeleteFeature", None);
        assert_eq!(
            decode(&payload).unwrap().1,
            Event::Unknown("DeleteFeature".to_string())
        );
    }

    #[test]
    fn feature_event_without_data() {
        let payload = envelope(ADD_FEATURE_KIND, None);
        assert!(matches!(
            decode(&payload),
            Err(DecodeError::MissingFeature(kind)) if kind == ADD_FEATURE_KIND
        ));

        let payload = envelope(MODIFY_FEATURE_KIND, Some(Feature::default()));
        assert!(matches!(decode(&payload), Err(DecodeError::MissingId(_))));
    }

    #[test]
    fn malformed_payload() {
        // a length-delimited field running past the end of the buffer
        let payload = [0x0a, 0x10, b'x'];
        assert!(matches!(decode(&payload), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn message_headers_are_kept() {
        let message = BusMessage {
            sequence: 7,
            timestamp: 0,
            topic: "featuremap.room".into(),
            headers: Headers::rollup(),
            payload: encode("me", &Event::Clear),
        };
        let envelope = decode_message(&message).unwrap();
        assert_eq!(envelope.origin_id, "me");
        assert_eq!(envelope.event, Event::Clear);
        assert!(envelope.headers.is_rollup());
        assert_eq!(envelope.sequence_position, 0);
    }
}
