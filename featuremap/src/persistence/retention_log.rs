//! The bus is the only durable history of a room. Whatever a topic retains
//! is what a replaying subscriber sees.

use std::error::Error;

use async_trait::async_trait;

use crate::{
    bus::{BusMessage, Headers},
    error::BusError,
};

/// This is the interface for storing the messages a bus retains per topic.
#[async_trait]
pub trait RetentionLog: Send + Sync + 'static {
    /// An error occurring from an operation.
    type Error: Into<BusError> + Error + Send;

    /// Assign the topic's next sequence to a message and store it. With
    /// `rollup` set, everything previously retained on the topic is
    /// discarded first, so the new message becomes the start of its replay.
    async fn append(
        &self,
        topic: &str,
        timestamp: i64,
        headers: &Headers,
        payload: &[u8],
        rollup: bool,
    ) -> Result<BusMessage, Self::Error>;

    /// Everything currently retained on `topic`, in sequence order.
    async fn retained(&self, topic: &str) -> Result<Vec<BusMessage>, Self::Error>;

    /// The last sequence assigned on `topic`, if any message was ever
    /// accepted. Unaffected by rollups.
    async fn last_sequence(&self, topic: &str) -> Result<Option<u64>, Self::Error>;
}
