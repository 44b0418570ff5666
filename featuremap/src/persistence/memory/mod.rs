use std::{collections::HashMap, convert::Infallible};

use bytes::Bytes;
use tokio::sync::Mutex;

use crate::{
    bus::{BusMessage, Headers},
    persistence::RetentionLog,
};

/// An in-memory retention log. Nothing is kept across restarts and only
/// rollups free memory.
#[derive(Debug, Default)]
pub struct MemoryLog {
    topics: Mutex<HashMap<String, TopicLog>>,
}

#[derive(Debug, Default)]
struct TopicLog {
    last_sequence: u64,
    messages: Vec<BusMessage>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Default::default()
    }
}

#[async_trait::async_trait]
impl RetentionLog for MemoryLog {
    type Error = Infallible;

    async fn append(
        &self,
        topic: &str,
        timestamp: i64,
        headers: &Headers,
        payload: &[u8],
        rollup: bool,
    ) -> Result<BusMessage, Self::Error> {
        let mut lock = self.topics.lock().await;
        let log = lock.entry(topic.to_string()).or_default();
        if rollup {
            log.messages.clear();
        }
        log.last_sequence += 1;
        let message = BusMessage {
            sequence: log.last_sequence,
            timestamp,
            topic: topic.to_string(),
            headers: headers.clone(),
            payload: Bytes::copy_from_slice(payload),
        };
        log.messages.push(message.clone());
        Ok(message)
    }

    async fn retained(&self, topic: &str) -> Result<Vec<BusMessage>, Self::Error> {
        let lock = self.topics.lock().await;
        Ok(lock
            .get(topic)
            .map(|log| log.messages.clone())
            .unwrap_or_default())
    }

    async fn last_sequence(&self, topic: &str) -> Result<Option<u64>, Self::Error> {
        let lock = self.topics.lock().await;
        Ok(lock
            .get(topic)
            .map(|log| log.last_sequence)
            .filter(|sequence| *sequence > 0))
    }
}
