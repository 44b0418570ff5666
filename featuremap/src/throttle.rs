//! Trailing-edge rate limiting for local edits.
//!
//! Dragging a vertex produces a modify intent per pointer move. A
//! [ThrottleGate] holds each key's latest value until a full window passes
//! without a newer one, then runs its action once with that value. Values
//! for different keys never replace each other.

use std::{collections::HashMap, future::Future, hash::Hash, time::Duration};

use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{sleep_until, Instant},
};
use tracing::trace;

pub struct ThrottleGate<K, T> {
    sender: mpsc::UnboundedSender<(K, T)>,
    task: JoinHandle<()>,
}

impl<K, T> ThrottleGate<K, T>
where
    K: Eq + Hash + Send + 'static,
    T: Send + 'static,
{
    /// Spawn the gate's timer task. Must be called within a tokio runtime.
    pub fn new<F, Fut>(window: Duration, action: F) -> Self
    where
        F: FnMut(K, T) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (sender, receiver) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(receiver, window, action));
        Self { sender, task }
    }

    /// Replace `key`'s pending value and restart its window.
    pub fn trigger(&self, key: K, value: T) {
        // The task only stops once every sender is gone.
        let _ = self.sender.send((key, value));
    }

    /// Run every pending action now and wait for them to finish.
    pub async fn flush(self) {
        let Self { sender, task } = self;
        drop(sender);
        let _ = task.await;
    }
}

async fn run<K, T, F, Fut>(
    mut receiver: mpsc::UnboundedReceiver<(K, T)>,
    window: Duration,
    mut action: F,
) where
    K: Eq + Hash,
    F: FnMut(K, T) -> Fut,
    Fut: Future<Output = ()>,
{
    let mut pending: HashMap<K, Pending<T>> = HashMap::new();
    let mut arrivals = 0u64;
    loop {
        let next = pending.values().map(|p| p.deadline).min();
        tokio::select! {
            received = receiver.recv() => match received {
                Some((key, value)) => {
                    arrivals += 1;
                    let entry = Pending {
                        deadline: Instant::now() + window,
                        arrival: arrivals,
                        value,
                    };
                    if pending.insert(key, entry).is_some() {
                        trace!("Coalesced a pending value");
                    }
                }
                None => break,
            },
            _ = sleep_until(next.unwrap_or_else(Instant::now)), if next.is_some() => {
                let now = Instant::now();
                fire(&mut pending, &mut action, |deadline| deadline <= now).await;
            }
        }
    }
    // Dropped with values still pending: deliver them rather than lose the
    // end of a burst.
    fire(&mut pending, &mut action, |_| true).await;
}

struct Pending<T> {
    deadline: Instant,
    /// Breaks ties between equal deadlines.
    arrival: u64,
    value: T,
}

/// Run `action` for every pending value whose deadline is `due`, oldest
/// deadline first.
async fn fire<K, T, F, Fut>(
    pending: &mut HashMap<K, Pending<T>>,
    action: &mut F,
    due: impl Fn(Instant) -> bool,
) where
    K: Eq + Hash,
    F: FnMut(K, T) -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ready = Vec::new();
    for (key, entry) in std::mem::take(pending) {
        if due(entry.deadline) {
            ready.push((key, entry));
        } else {
            pending.insert(key, entry);
        }
    }
    ready.sort_by_key(|(_, entry)| (entry.deadline, entry.arrival));
    for (key, entry) in ready {
        action(key, entry.value).await;
    }
}
