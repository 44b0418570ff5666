//! The message bus, seen only through its contracts: connect, publish,
//! ordered subscribe and close.
//!
//! A [Bus] hands out [Connection]s. Every connection can publish to a topic
//! and open [Subscription]s, each of which is a lazy, potentially infinite
//! and non-restartable stream of the topic's messages in the order the bus
//! accepted them. Restarting means opening a new subscription.
//!
//! Two implementations are provided:
//!
//! - [LocalBus]: an in-process bus keeping each topic's retained log in a
//! [RetentionLog](crate::persistence::RetentionLog).
//! - [GrpcBus]: a client for a [BusServer], which exposes a [LocalBus] over
//! gRPC.

mod grpc;
mod local;
mod sequencer;

use std::{
    collections::{BTreeMap, HashMap},
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
pub use grpc::{BusServer, BusService, GrpcBus, GrpcConnection};
pub use local::{LocalBus, LocalConnection};
use pin_project::pin_project;
pub use sequencer::MessageSequencer;
use tokio_util::sync::CancellationToken;

use crate::{
    constants::{ROLLUP_HEADER, ROLLUP_SUBJECT},
    error::{BusError, ConnectionError, PublishError, SubscribeError},
    proto::bus::StreamMessage,
};

pub type MessageStream<T> = Pin<Box<dyn Stream<Item = Result<T, BusError>> + Send>>;

/// Message headers, ordered by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Default::default()
    }

    /// Headers marking a message as the topic's new anchor: the bus
    /// discards everything it retained on the topic before it.
    pub fn rollup() -> Self {
        let mut headers = Self::new();
        headers.insert(ROLLUP_HEADER, ROLLUP_SUBJECT);
        headers
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn is_rollup(&self) -> bool {
        self.get(ROLLUP_HEADER) == Some(ROLLUP_SUBJECT)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<HashMap<String, String>> for Headers {
    fn from(headers: HashMap<String, String>) -> Self {
        Self(headers.into_iter().collect())
    }
}

impl From<Headers> for HashMap<String, String> {
    fn from(headers: Headers) -> Self {
        headers.0.into_iter().collect()
    }
}

/// Where a new subscription starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliverPolicy {
    /// Replay everything the topic retains, then follow the live tail.
    #[default]
    All,
    /// Only messages accepted after subscribing.
    New,
}

/// A message as accepted by the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Per topic, strictly increasing from 1 and never reused.
    pub sequence: u64,
    /// Acceptance time in nano-seconds.
    pub timestamp: i64,
    pub topic: String,
    pub headers: Headers,
    pub payload: Bytes,
}

impl PartialOrd for BusMessage {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BusMessage {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sequence.cmp(&other.sequence)
    }
}

impl From<StreamMessage> for BusMessage {
    fn from(message: StreamMessage) -> Self {
        Self {
            sequence: message.sequence,
            timestamp: message.timestamp,
            topic: message.topic,
            headers: message.headers.into(),
            payload: message.payload.into(),
        }
    }
}

impl From<BusMessage> for StreamMessage {
    fn from(message: BusMessage) -> Self {
        Self {
            sequence: message.sequence,
            timestamp: message.timestamp,
            topic: message.topic,
            headers: message.headers.into(),
            payload: message.payload.to_vec(),
        }
    }
}

#[async_trait]
pub trait Bus: Send + Sync + 'static {
    type Connection: Connection;

    /// Open a connection to the bus at `url`.
    async fn connect(&self, url: &str) -> Result<Self::Connection, ConnectionError>;
}

#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Hand `payload` to the bus. Returns once the bus has accepted it; there
    /// is no delivery acknowledgement.
    async fn publish(&self, topic: &str, payload: Bytes, headers: Headers)
        -> Result<(), PublishError>;

    /// Open an ordered subscription on `topic`. Callers hold at most one
    /// subscription per topic and close it before opening the next.
    async fn subscribe_ordered(
        &self,
        topic: &str,
        policy: DeliverPolicy,
    ) -> Result<Subscription, SubscribeError>;

    /// Release the connection. Every subscription it opened stops yielding
    /// and later publishes fail.
    async fn close(&self);

    fn is_closed(&self) -> bool;
}

/// An open ordered subscription.
///
/// Yields the topic's messages in sequence order with duplicates removed.
/// Once [closed](Subscription::close), or once its connection is closed, it
/// yields nothing more, even if messages were already buffered.
#[pin_project]
pub struct Subscription {
    topic: String,
    cancel: CancellationToken,
    #[pin]
    messages: MessageStream<BusMessage>,
}

impl Subscription {
    /// Wrap the raw messages of `topic` in a [MessageSequencer]. The
    /// subscription is closed along with `connection`.
    pub fn new(
        topic: impl Into<String>,
        messages: MessageStream<BusMessage>,
        gap_timeout: Duration,
        connection: &CancellationToken,
    ) -> Self {
        let cancel = connection.child_token();
        let closed = cancel.clone();
        let messages = MessageSequencer::new(messages, gap_timeout)
            .into_stream()
            .take_until(async move { closed.cancelled().await });
        Self {
            topic: topic.into(),
            cancel,
            messages: Box::pin(messages),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Stream for Subscription {
    type Item = Result<BusMessage, BusError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        if this.cancel.is_cancelled() {
            return Poll::Ready(None);
        }
        this.messages.poll_next(cx)
    }
}
