use tokio::sync::mpsc;

use crate::event::FeatureRecord;

/// Whatever draws the room. Called from the consume loop as events are
/// reconciled, so implementations must not block.
pub trait RenderSink: Send + Sync + 'static {
    /// `record` was added or replaced the feature with the same id.
    fn on_feature_upserted(&self, record: &FeatureRecord);

    /// Every feature was removed.
    fn on_feature_cleared(&self);
}

/// Renders nothing.
impl RenderSink for () {
    fn on_feature_upserted(&self, _record: &FeatureRecord) {}

    fn on_feature_cleared(&self) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderEvent {
    Upserted(FeatureRecord),
    Cleared,
}

/// Forwards render calls over a channel, for a UI living on another task.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<RenderEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RenderEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    fn send(&self, event: RenderEvent) {
        // A closed receiver means nobody is looking.
        let _ = self.sender.send(event);
    }
}

impl RenderSink for ChannelSink {
    fn on_feature_upserted(&self, record: &FeatureRecord) {
        self.send(RenderEvent::Upserted(record.clone()));
    }

    fn on_feature_cleared(&self) {
        self.send(RenderEvent::Cleared);
    }
}
