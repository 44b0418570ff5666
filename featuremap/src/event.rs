use bytes::Bytes;

use crate::{
    bus::Headers,
    constants::{ADD_FEATURE_KIND, CLEAR_KIND, MODIFY_FEATURE_KIND},
    proto::featuremap::Feature,
};

/// A drawn point, line or polygon. Identity is `id`: storing a record with
/// an existing id replaces it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FeatureRecord {
    /// Globally unique, generated by the client which drew it.
    pub id: String,
    /// Serialized shape. Never inspected here.
    pub geometry: Bytes,
    pub color: String,
    pub text: String,
}

impl FeatureRecord {
    pub fn new(id: impl Into<String>, geometry: impl Into<Bytes>) -> Self {
        Self {
            id: id.into(),
            geometry: geometry.into(),
            ..Default::default()
        }
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }
}

impl From<Feature> for FeatureRecord {
    fn from(feature: Feature) -> Self {
        Self {
            id: feature.id,
            geometry: feature.geometry.into(),
            color: feature.color,
            text: feature.text,
        }
    }
}

impl From<&FeatureRecord> for Feature {
    fn from(record: &FeatureRecord) -> Self {
        Self {
            id: record.id.clone(),
            geometry: record.geometry.to_vec(),
            color: record.color.clone(),
            text: record.text.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Clear,
    AddFeature,
    ModifyFeature,
    Unknown,
}

/// Any change a client can make to a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Remove every feature.
    Clear,
    /// A new feature was drawn.
    AddFeature(FeatureRecord),
    /// An existing feature was reshaped or restyled.
    ModifyFeature(FeatureRecord),
    /// A kind this client doesn't understand, kept by name for logging.
    Unknown(String),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Clear => EventKind::Clear,
            Event::AddFeature(_) => EventKind::AddFeature,
            Event::ModifyFeature(_) => EventKind::ModifyFeature,
            Event::Unknown(_) => EventKind::Unknown,
        }
    }

    /// The name this event travels under.
    pub fn wire_kind(&self) -> &str {
        match self {
            Event::Clear => CLEAR_KIND,
            Event::AddFeature(_) => ADD_FEATURE_KIND,
            Event::ModifyFeature(_) => MODIFY_FEATURE_KIND,
            Event::Unknown(kind) => kind,
        }
    }

    pub fn feature(&self) -> Option<&FeatureRecord> {
        match self {
            Event::AddFeature(record) | Event::ModifyFeature(record) => Some(record),
            Event::Clear | Event::Unknown(_) => None,
        }
    }
}

/// A decoded bus message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Session id of the publishing client.
    pub origin_id: String,
    pub event: Event,
    pub headers: Headers,
    /// Position the feature store gave this event once applied; zero
    /// until then.
    pub sequence_position: u64,
}
