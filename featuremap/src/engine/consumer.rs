use std::sync::Arc;

use futures::StreamExt;
use tokio::{
    sync::{watch, RwLock},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::{
    bus::Subscription,
    codec,
    engine::{render::RenderSink, Positions},
    event::Event,
    store::{Change, FeatureStore},
};

/// The one task allowed to apply events to the store while it runs.
pub(super) struct Consumer {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Consumer {
    pub fn spawn<R: RenderSink>(consume: ConsumeLoop<R>) -> Self {
        let cancel = consume.cancel.clone();
        let task = tokio::spawn(consume.run());
        Self { cancel, task }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop applying events, buffered or not, and wait for the loop to
    /// exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            error!("Consume loop panicked: {:?}", e);
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

pub(super) struct ConsumeLoop<R> {
    pub subscription: Subscription,
    pub store: Arc<RwLock<FeatureStore>>,
    pub positions: Arc<watch::Sender<Positions>>,
    pub sink: Arc<R>,
    pub client_id: String,
    /// Events received past this position are not applied.
    pub limit: Option<u64>,
    pub cancel: CancellationToken,
}

impl<R: RenderSink> ConsumeLoop<R> {
    async fn run(mut self) {
        let topic = self.subscription.topic().to_string();
        debug!("Consuming {}", topic);
        loop {
            let message = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                next = self.subscription.next() => match next {
                    Some(Ok(message)) => message,
                    Some(Err(e)) => {
                        error!("Subscription to {} broke: {}", topic, e);
                        break;
                    }
                    None => {
                        debug!("Subscription to {} ended", topic);
                        break;
                    }
                },
            };
            trace!("Received sequence {} on {}", message.sequence, topic);

            let mut envelope = match codec::decode_message(&message) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!("Skipping sequence {} on {}: {}", message.sequence, topic, e);
                    continue;
                }
            };

            let mut current = 0;
            self.positions.send_modify(|positions| {
                positions.current += 1;
                current = positions.current;
            });
            if let Some(limit) = self.limit {
                if current > limit {
                    if current == limit + 1 {
                        info!("Reached position {} on {}, skipping the rest", limit, topic);
                    }
                    continue;
                }
            }

            let mut store = self.store.write().await;
            if self.cancel.is_cancelled() {
                break;
            }
            if let Event::Unknown(kind) = &envelope.event {
                warn!("Ignoring unknown event kind {:?} from {}", kind, envelope.origin_id);
            }
            let change = store.apply(&envelope.event);
            envelope.sequence_position = store.position();
            self.positions
                .send_modify(|positions| positions.display = envelope.sequence_position);

            if envelope.origin_id == self.client_id {
                trace!("Own event at position {}, not rendering", envelope.sequence_position);
                continue;
            }
            match change {
                Change::Cleared => self.sink.on_feature_cleared(),
                Change::Upserted(record) => self.sink.on_feature_upserted(&record),
                Change::Unchanged => {}
            }
        }
        self.subscription.close();
    }
}
