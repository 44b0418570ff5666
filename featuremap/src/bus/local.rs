use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_stream::stream;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use tokio::sync::{broadcast, broadcast::error::RecvError, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    bus::{
        Bus, BusMessage, Connection, DeliverPolicy, Headers, MessageStream, Subscription,
    },
    constants::{DEFAULT_GAP_TIMEOUT, LIVE_CHANNEL_CAPACITY},
    error::{BusError, ConnectionError, PublishError, SubscribeError},
    persistence::{MemoryLog, RetentionLog},
};

/// An in-process bus.
///
/// Every topic has a retained log (see [RetentionLog]) and a live fan-out
/// channel. Publishing appends to the log and then fans out, all under one
/// lock; a replaying subscriber reads the log and joins the fan-out under
/// the same lock, so it sees every message exactly once.
pub struct LocalBus<L = MemoryLog> {
    inner: Arc<Inner<L>>,
    gap_timeout: Duration,
}

struct Inner<L> {
    log: L,
    /// Live fan-out per topic. Held while appending so that log order and
    /// delivery order agree.
    live: Mutex<HashMap<String, broadcast::Sender<BusMessage>>>,
    reachable: AtomicBool,
    reject_subscriptions: AtomicBool,
}

impl LocalBus<MemoryLog> {
    pub fn new() -> Self {
        Self::with_log(MemoryLog::new())
    }
}

impl Default for LocalBus<MemoryLog> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L> Clone for LocalBus<L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            gap_timeout: self.gap_timeout,
        }
    }
}

impl<L: RetentionLog> LocalBus<L> {
    pub fn with_log(log: L) -> Self {
        Self {
            inner: Arc::new(Inner {
                log,
                live: Mutex::new(HashMap::new()),
                reachable: AtomicBool::new(true),
                reject_subscriptions: AtomicBool::new(false),
            }),
            gap_timeout: DEFAULT_GAP_TIMEOUT,
        }
    }

    pub fn with_gap_timeout(mut self, gap_timeout: Duration) -> Self {
        self.gap_timeout = gap_timeout;
        self
    }

    /// While unreachable, every [connect](Bus::connect) fails.
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.reachable.store(reachable, Ordering::SeqCst);
    }

    /// While set, every subscription attempt is rejected.
    pub fn reject_subscriptions(&self, reject: bool) {
        self.inner.reject_subscriptions.store(reject, Ordering::SeqCst);
    }

    /// A connection which skips the reachability check.
    pub fn open(&self) -> LocalConnection<L> {
        LocalConnection {
            bus: self.clone(),
            token: CancellationToken::new(),
        }
    }

    /// Accept a message on `topic`, returning it as subscribers will see it.
    pub async fn publish_message(
        &self,
        topic: &str,
        payload: &[u8],
        headers: Headers,
    ) -> Result<BusMessage, BusError> {
        let timestamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let rollup = headers.is_rollup();
        let mut live = self.inner.live.lock().await;
        let message = self
            .inner
            .log
            .append(topic, timestamp, &headers, payload, rollup)
            .await
            .map_err(Into::<BusError>::into)?;
        if rollup {
            info!("Rolled up {} at sequence {}", topic, message.sequence);
        }
        let sender = live
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(LIVE_CHANNEL_CAPACITY).0);
        // Nobody listening is fine: the message is retained.
        let _ = sender.send(message.clone());
        Ok(message)
    }

    /// The unordered, raw messages of `topic` as the bus delivers them.
    pub async fn subscribe_raw(
        &self,
        topic: &str,
        policy: DeliverPolicy,
    ) -> Result<MessageStream<BusMessage>, SubscribeError> {
        if self.inner.reject_subscriptions.load(Ordering::SeqCst) {
            return Err(SubscribeError::Rejected {
                topic: topic.to_string(),
                reason: "subscriptions disabled".to_string(),
            });
        }
        let (retained, mut receiver) = {
            let mut live = self.inner.live.lock().await;
            let receiver = live
                .entry(topic.to_string())
                .or_insert_with(|| broadcast::channel(LIVE_CHANNEL_CAPACITY).0)
                .subscribe();
            let retained = match policy {
                DeliverPolicy::All => self
                    .inner
                    .log
                    .retained(topic)
                    .await
                    .map_err(Into::<BusError>::into)?,
                DeliverPolicy::New => Vec::new(),
            };
            (retained, receiver)
        };
        debug!("Subscribed to {} replaying {} messages", topic, retained.len());

        Ok(Box::pin(stream! {
            for message in retained {
                yield Ok(message);
            }
            loop {
                match receiver.recv().await {
                    Ok(message) => yield Ok(message),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Subscriber lagged behind by {} messages", skipped);
                        yield Err(BusError::Lagged(skipped));
                        break;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }))
    }
}

#[async_trait]
impl<L: RetentionLog> Bus for LocalBus<L> {
    type Connection = LocalConnection<L>;

    async fn connect(&self, url: &str) -> Result<Self::Connection, ConnectionError> {
        if !self.inner.reachable.load(Ordering::SeqCst) {
            return Err(ConnectionError::Unreachable(url.to_string()));
        }
        debug!("Connected to local bus as {}", url);
        Ok(self.open())
    }
}

/// A connection to a [LocalBus].
pub struct LocalConnection<L> {
    bus: LocalBus<L>,
    token: CancellationToken,
}

#[async_trait]
impl<L: RetentionLog> Connection for LocalConnection<L> {
    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        headers: Headers,
    ) -> Result<(), PublishError> {
        if self.is_closed() {
            return Err(PublishError::Closed);
        }
        self.bus
            .publish_message(topic, &payload, headers)
            .await
            .map(|_| ())
            .map_err(|e| PublishError::Failed {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    async fn subscribe_ordered(
        &self,
        topic: &str,
        policy: DeliverPolicy,
    ) -> Result<Subscription, SubscribeError> {
        if self.is_closed() {
            return Err(SubscribeError::Closed);
        }
        let messages = self.bus.subscribe_raw(topic, policy).await?;
        Ok(Subscription::new(
            topic,
            messages,
            self.bus.gap_timeout,
            &self.token,
        ))
    }

    async fn close(&self) {
        self.token.cancel();
    }

    fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    const TOPIC: &str = "featuremap.room";

    async fn take(subscription: &mut Subscription, n: usize) -> Vec<(u64, Bytes)> {
        let mut out = Vec::new();
        for _ in 0..n {
            let message = subscription.next().await.unwrap().unwrap();
            out.push((message.sequence, message.payload));
        }
        out
    }

    #[tokio::test]
    async fn replay_then_live() {
        let bus = LocalBus::new();
        let connection = bus.connect("local").await.unwrap();
        connection
            .publish(TOPIC, Bytes::from_static(b"a"), Headers::new())
            .await
            .unwrap();
        connection
            .publish(TOPIC, Bytes::from_static(b"b"), Headers::new())
            .await
            .unwrap();

        let mut replay = connection
            .subscribe_ordered(TOPIC, DeliverPolicy::All)
            .await
            .unwrap();
        let mut live = connection
            .subscribe_ordered(TOPIC, DeliverPolicy::New)
            .await
            .unwrap();
        connection
            .publish(TOPIC, Bytes::from_static(b"c"), Headers::new())
            .await
            .unwrap();

        assert_eq!(
            take(&mut replay, 3).await,
            vec![
                (1, Bytes::from_static(b"a")),
                (2, Bytes::from_static(b"b")),
                (3, Bytes::from_static(b"c"))
            ]
        );
        assert_eq!(take(&mut live, 1).await, vec![(3, Bytes::from_static(b"c"))]);
    }

    #[tokio::test]
    async fn rollup_truncates_replay() {
        let bus = LocalBus::new();
        let connection = bus.connect("local").await.unwrap();
        for payload in [&b"a"[..], b"b"] {
            connection
                .publish(TOPIC, Bytes::copy_from_slice(payload), Headers::new())
                .await
                .unwrap();
        }
        connection
            .publish(TOPIC, Bytes::from_static(b"clear"), Headers::rollup())
            .await
            .unwrap();

        let mut replay = connection
            .subscribe_ordered(TOPIC, DeliverPolicy::All)
            .await
            .unwrap();
        let first = replay.next().await.unwrap().unwrap();
        assert_eq!(first.sequence, 3);
        assert!(first.headers.is_rollup());
    }

    #[tokio::test]
    async fn topics_are_independent() {
        let bus = LocalBus::new();
        let connection = bus.connect("local").await.unwrap();
        connection
            .publish("featuremap.other", Bytes::from_static(b"x"), Headers::new())
            .await
            .unwrap();
        connection
            .publish(TOPIC, Bytes::from_static(b"a"), Headers::new())
            .await
            .unwrap();
        let mut replay = connection
            .subscribe_ordered(TOPIC, DeliverPolicy::All)
            .await
            .unwrap();
        assert_eq!(take(&mut replay, 1).await, vec![(1, Bytes::from_static(b"a"))]);
    }

    #[tokio::test]
    async fn unreachable() {
        let bus = LocalBus::new();
        bus.set_reachable(false);
        assert!(matches!(
            bus.connect("local").await,
            Err(ConnectionError::Unreachable(_))
        ));
        bus.set_reachable(true);
        assert!(bus.connect("local").await.is_ok());
    }

    #[tokio::test]
    async fn rejected_subscription() {
        let bus = LocalBus::new();
        bus.reject_subscriptions(true);
        let connection = bus.connect("local").await.unwrap();
        assert!(matches!(
            connection.subscribe_ordered(TOPIC, DeliverPolicy::All).await,
            Err(SubscribeError::Rejected { .. })
        ));
    }

    #[tokio::test]
    async fn close_ends_subscriptions_and_publishes() {
        let bus = LocalBus::new();
        let connection = bus.connect("local").await.unwrap();
        let other = bus.connect("local").await.unwrap();
        let mut subscription = connection
            .subscribe_ordered(TOPIC, DeliverPolicy::All)
            .await
            .unwrap();
        other
            .publish(TOPIC, Bytes::from_static(b"a"), Headers::new())
            .await
            .unwrap();

        connection.close().await;
        assert!(connection.is_closed());
        // already delivered to the subscription's channel, but never yielded
        assert!(subscription.next().await.is_none());
        assert!(matches!(
            connection
                .publish(TOPIC, Bytes::from_static(b"b"), Headers::new())
                .await,
            Err(PublishError::Closed)
        ));
        assert!(matches!(
            connection.subscribe_ordered(TOPIC, DeliverPolicy::All).await,
            Err(SubscribeError::Closed)
        ));
        // other connections are unaffected
        assert!(!other.is_closed());
    }
}
