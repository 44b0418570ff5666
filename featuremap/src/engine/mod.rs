//! The sync engine: one room, one subscription, one store.
//!
//! A [SyncEngine] connects to the bus, opens an ordered subscription on the
//! room's topic and spawns a single consume loop which decodes every
//! message, applies it to the [FeatureStore] and forwards the change to a
//! [RenderSink]. Events this client published itself are applied but not
//! rendered again, since the local drawing already shows them.
//!
//! ```text
//! Disconnected -> Connecting -> Subscribing -> Streaming
//!       ^              |             |  ^          |
//!       +--------------+-------------+  +----------+
//!        (failure or disconnect)        (reconnect)
//! ```
//!
//! Local edits go the other way: [submit_add](SyncEngine::submit_add) and
//! friends pass through a [ThrottleGate] and are published on the current
//! connection. They only reach the store by coming back from the bus.

mod consumer;
mod history;
mod render;

use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use render::{ChannelSink, RenderEvent, RenderSink};

use self::consumer::{ConsumeLoop, Consumer};
use crate::{
    bus::{Bus, Connection, DeliverPolicy, Headers},
    codec,
    config::{EngineConfig, SessionConfig},
    error::EngineResult,
    event::{Event, EventKind, FeatureRecord},
    store::FeatureStore,
    throttle::ThrottleGate,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No connection, no subscription.
    Disconnected,
    Connecting,
    Subscribing,
    /// A consume loop was started on an open subscription.
    Streaming,
}

/// Event counts of the current session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Positions {
    /// Events received and decoded.
    pub current: u64,
    /// Events applied to the store. Behind `current` only while scrubbing.
    pub display: u64,
}

/// A point-in-time view of the engine's progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncState {
    pub current_position: u64,
    pub display_position: u64,
    /// A consume loop is running.
    pub streaming: bool,
}

/// Pending edits replace each other per feature and kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum EditKey {
    Feature(EventKind, String),
    Clear,
}

impl EditKey {
    fn of(event: &Event) -> Self {
        match event.feature() {
            Some(record) => EditKey::Feature(event.kind(), record.id.clone()),
            None => EditKey::Clear,
        }
    }
}

pub struct SyncEngine<B: Bus, R> {
    bus: B,
    session: SessionConfig,
    config: EngineConfig,
    sink: Arc<R>,
    store: Arc<RwLock<FeatureStore>>,
    positions: Arc<watch::Sender<Positions>>,
    connection: watch::Sender<Option<Arc<B::Connection>>>,
    consumer: Option<Consumer>,
    state: EngineState,
    /// Position the current session stops applying at, while scrubbing.
    target: Option<u64>,
    gate: ThrottleGate<EditKey, Event>,
}

impl<B: Bus, R: RenderSink> SyncEngine<B, R> {
    /// Create a disconnected engine. Must be called within a tokio runtime.
    pub fn new(bus: B, session: SessionConfig, config: EngineConfig, sink: R) -> Self {
        let (connection, current) = watch::channel(None::<Arc<B::Connection>>);
        let topic = session.topic();
        let client_id = session.client_id.clone();
        let gate = ThrottleGate::new(config.throttle_window, move |_: EditKey, event: Event| {
            let connection = current.borrow().clone();
            let topic = topic.clone();
            let payload = codec::encode(&client_id, &event);
            async move {
                let Some(connection) = connection else {
                    warn!("Dropping {:?} edit while disconnected", event.kind());
                    return;
                };
                let headers = if matches!(event, Event::Clear) {
                    Headers::rollup()
                } else {
                    Headers::new()
                };
                if let Err(e) = connection.publish(&topic, payload, headers).await {
                    error!("Failed to publish {:?} edit: {}", event.kind(), e);
                }
            }
        });
        Self {
            bus,
            session,
            config,
            sink: Arc::new(sink),
            store: Default::default(),
            positions: Arc::new(watch::channel(Positions::default()).0),
            connection,
            consumer: None,
            state: EngineState::Disconnected,
            target: None,
            gate,
        }
    }

    /// Start streaming the room, replacing any current session.
    ///
    /// On failure the engine is left [Disconnected](EngineState::Disconnected)
    /// and it's up to the caller to try again.
    pub async fn connect(&mut self) -> EngineResult<()> {
        self.disconnect().await;
        self.target = None;
        self.start_session(self.config.deliver, None).await
    }

    /// Drop the current subscription and open a new one, on the same
    /// connection if it's still open. A scrubbed session stays scrubbed.
    pub async fn reconnect(&mut self) -> EngineResult<()> {
        let policy = self.policy();
        let connection = self.connection.borrow().clone();
        match connection {
            Some(connection) if !connection.is_closed() => {
                info!("Resubscribing to {}", self.session.topic());
                self.stop_consumer().await;
                self.reset().await;
                self.subscribe(connection, policy, self.target).await
            }
            _ => {
                self.disconnect().await;
                self.start_session(policy, self.target).await
            }
        }
    }

    /// Close the subscription and connection and empty the store. Safe to
    /// call in any state.
    pub async fn disconnect(&mut self) {
        if self.state == EngineState::Disconnected
            && self.consumer.is_none()
            && self.connection.borrow().is_none()
        {
            return;
        }
        debug!("Disconnecting from {}", self.session.topic());
        self.stop_consumer().await;
        self.close_connection().await;
        self.reset().await;
        self.state = EngineState::Disconnected;
    }

    /// Publish a newly drawn feature.
    pub fn submit_add(&self, record: FeatureRecord) {
        self.submit(Event::AddFeature(record));
    }

    /// Publish a changed feature.
    pub fn submit_modify(&self, record: FeatureRecord) {
        self.submit(Event::ModifyFeature(record));
    }

    /// Publish a clear, rolling up the room's history.
    pub fn submit_clear(&self) {
        self.submit(Event::Clear);
    }

    /// The store's features, ordered by id.
    pub async fn snapshot(&self) -> Vec<FeatureRecord> {
        self.store.read().await.snapshot()
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn sync_state(&self) -> SyncState {
        let positions = *self.positions.borrow();
        SyncState {
            current_position: positions.current,
            display_position: positions.display,
            streaming: self.consumer.as_ref().map_or(false, Consumer::is_running),
        }
    }

    /// Follow position changes as events arrive.
    pub fn subscribe_positions(&self) -> watch::Receiver<Positions> {
        self.positions.subscribe()
    }

    /// The position the current session was scrubbed to, if any.
    pub fn scrub_target(&self) -> Option<u64> {
        self.target
    }

    pub fn session(&self) -> &SessionConfig {
        &self.session
    }

    fn submit(&self, event: Event) {
        self.gate.trigger(EditKey::of(&event), event);
    }

    fn policy(&self) -> DeliverPolicy {
        if self.target.is_some() {
            DeliverPolicy::All
        } else {
            self.config.deliver
        }
    }

    async fn start_session(
        &mut self,
        policy: DeliverPolicy,
        limit: Option<u64>,
    ) -> EngineResult<()> {
        self.state = EngineState::Connecting;
        let connection = match self.bus.connect(&self.config.bus_url).await {
            Ok(connection) => Arc::new(connection),
            Err(e) => {
                error!("Failed to connect to {}: {}", self.config.bus_url, e);
                self.state = EngineState::Disconnected;
                return Err(e.into());
            }
        };
        info!("Connected to {}", self.config.bus_url);
        self.connection.send_replace(Some(Arc::clone(&connection)));
        self.subscribe(connection, policy, limit).await
    }

    async fn subscribe(
        &mut self,
        connection: Arc<B::Connection>,
        policy: DeliverPolicy,
        limit: Option<u64>,
    ) -> EngineResult<()> {
        self.state = EngineState::Subscribing;
        let topic = self.session.topic();
        let subscription = match connection.subscribe_ordered(&topic, policy).await {
            Ok(subscription) => subscription,
            Err(e) => {
                error!("Failed to subscribe to {}: {}", topic, e);
                self.close_connection().await;
                self.state = EngineState::Disconnected;
                return Err(e.into());
            }
        };
        info!("Streaming {} ({:?})", topic, policy);
        self.consumer = Some(Consumer::spawn(ConsumeLoop {
            subscription,
            store: Arc::clone(&self.store),
            positions: Arc::clone(&self.positions),
            sink: Arc::clone(&self.sink),
            client_id: self.session.client_id.clone(),
            limit,
            cancel: CancellationToken::new(),
        }));
        self.state = EngineState::Streaming;
        Ok(())
    }

    async fn stop_consumer(&mut self) {
        if let Some(consumer) = self.consumer.take() {
            consumer.stop().await;
        }
    }

    async fn close_connection(&mut self) {
        if let Some(connection) = self.connection.send_replace(None) {
            connection.close().await;
        }
    }

    /// Forget the session's progress. Only called with no consume loop
    /// running.
    async fn reset(&mut self) {
        self.store.write().await.reset();
        self.positions.send_replace(Positions::default());
        self.sink.on_feature_cleared();
    }
}

impl<B: Bus, R> Drop for SyncEngine<B, R> {
    fn drop(&mut self) {
        if let Some(consumer) = &self.consumer {
            consumer.cancel();
        }
    }
}
