use std::{cmp::Reverse, collections::BinaryHeap, time::Duration};

use async_stream::stream;
use futures::stream::StreamExt;
use tokio::time::timeout;
use tracing::{trace, warn};

use crate::{bus::BusMessage, bus::MessageStream, error::BusError};

/// Takes a stream of possibly duplicated or out of order messages and
/// returns a stream of in order messages.
///
/// The first message seen fixes the starting sequence unless one is given
/// with [starting_at](MessageSequencer::starting_at). A message with a
/// sequence already passed is a duplicate and is dropped. Messages from
/// ahead of the wanted sequence wait in a heap; if the gap isn't filled
/// within `gap_timeout` the sequencer skips ahead to the lowest buffered
/// message.
pub struct MessageSequencer {
    messages: MessageStream<BusMessage>,
    /// Buffer of messages received with a higher sequence than
    /// `want_sequence`.
    heap: BinaryHeap<Reverse<BusMessage>>,
    /// How long to wait for a missing message while others are buffered.
    gap_timeout: Duration,
    /// The sequence number of the next message we want.
    want_sequence: Option<u64>,
    /// The underlying stream has ended.
    finished: bool,
}

impl MessageSequencer {
    pub fn new(messages: MessageStream<BusMessage>, gap_timeout: Duration) -> Self {
        Self {
            messages,
            heap: BinaryHeap::new(),
            gap_timeout,
            want_sequence: None,
            finished: false,
        }
    }

    pub fn starting_at(mut self, sequence: u64) -> Self {
        self.want_sequence = Some(sequence);
        self
    }

    /// Ends after the first error.
    pub fn into_stream(mut self) -> MessageStream<BusMessage> {
        Box::pin(stream! {
            while let Some(result) = self.next().await {
                let failed = result.is_err();
                yield result;
                if failed {
                    break;
                }
            }
        })
    }

    async fn next(&mut self) -> Option<Result<BusMessage, BusError>> {
        loop {
            if let Some(message) = self.pop_ready() {
                return Some(Ok(message));
            }

            if self.finished {
                // Nothing more will arrive to fill the gap.
                let Reverse(message) = self.heap.pop()?;
                warn!("Stream ended before sequence {:?}, skipping", self.want_sequence);
                self.want_sequence = Some(message.sequence + 1);
                return Some(Ok(message));
            }

            let received = if self.heap.is_empty() {
                self.messages.next().await
            } else {
                match timeout(self.gap_timeout, self.messages.next()).await {
                    Ok(received) => received,
                    Err(_) => {
                        self.skip_gap();
                        continue;
                    }
                }
            };

            match received {
                Some(Ok(message)) => {
                    let want = *self.want_sequence.get_or_insert(message.sequence);
                    if message.sequence < want {
                        trace!("Dropping duplicate sequence {}", message.sequence);
                    } else if message.sequence == want {
                        self.want_sequence = Some(want + 1);
                        return Some(Ok(message));
                    } else {
                        trace!("Buffering sequence {} (want {})", message.sequence, want);
                        self.heap.push(Reverse(message));
                    }
                }
                Some(Err(err)) => return Some(Err(err)),
                None => self.finished = true,
            }
        }
    }

    /// Pop the wanted message off the heap, discarding stale ones on the way.
    fn pop_ready(&mut self) -> Option<BusMessage> {
        let want = self.want_sequence?;
        while let Some(sequence) = self.heap.peek().map(|Reverse(m)| m.sequence) {
            if sequence < want {
                self.heap.pop();
            } else if sequence == want {
                self.want_sequence = Some(want + 1);
                return self.heap.pop().map(|Reverse(m)| m);
            } else {
                break;
            }
        }
        None
    }

    fn skip_gap(&mut self) {
        if let Some(Reverse(first)) = self.heap.peek() {
            warn!(
                "Timed out waiting for sequence {:?}, skipping to {}",
                self.want_sequence, first.sequence
            );
            self.want_sequence = Some(first.sequence);
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::{stream, TryStreamExt};
    use rand::{seq::SliceRandom, thread_rng};

    use super::*;
    use crate::bus::tests::message;

    fn raw(sequences: Vec<u64>) -> MessageStream<BusMessage> {
        Box::pin(stream::iter(
            sequences.into_iter().map(|i| Ok::<_, BusError>(message(i))),
        ))
    }

    async fn sequence(sequencer: MessageSequencer) -> anyhow::Result<Vec<u64>> {
        let out: Vec<_> = sequencer.into_stream().try_collect().await?;
        Ok(out.into_iter().map(|m| m.sequence).collect())
    }

    #[tokio::test]
    async fn ordered() -> anyhow::Result<()> {
        let source: Vec<_> = (1..=100).collect();
        let sequencer = MessageSequencer::new(raw(source.clone()), Duration::from_secs(60));
        assert_eq!(sequence(sequencer).await?, source);
        Ok(())
    }

    #[tokio::test]
    async fn unordered() -> anyhow::Result<()> {
        let target: Vec<_> = (1..=100).collect();
        let mut source = target.clone();
        source.shuffle(&mut thread_rng());

        let sequencer =
            MessageSequencer::new(raw(source), Duration::from_secs(60)).starting_at(1);
        assert_eq!(sequence(sequencer).await?, target);
        Ok(())
    }

    #[tokio::test]
    async fn duplicates_dropped() -> anyhow::Result<()> {
        let source = vec![5, 6, 6, 5, 7, 8, 7, 6, 9];
        let sequencer = MessageSequencer::new(raw(source), Duration::from_secs(60));
        assert_eq!(sequence(sequencer).await?, vec![5, 6, 7, 8, 9]);
        Ok(())
    }

    #[tokio::test]
    async fn ended_stream_flushes_past_gaps() -> anyhow::Result<()> {
        let source = vec![1, 2, 5, 4];
        let sequencer = MessageSequencer::new(raw(source), Duration::from_secs(60));
        assert_eq!(sequence(sequencer).await?, vec![1, 2, 4, 5]);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn gap_times_out() {
        let source = stream::iter([1, 3, 4].map(|i| Ok::<_, BusError>(message(i))))
            .chain(stream::pending());
        let mut ordered =
            MessageSequencer::new(Box::pin(source), Duration::from_millis(500)).into_stream();

        assert_eq!(ordered.next().await.unwrap().unwrap().sequence, 1);
        let start = tokio::time::Instant::now();
        assert_eq!(ordered.next().await.unwrap().unwrap().sequence, 3);
        assert!(start.elapsed() >= Duration::from_millis(500));
        assert_eq!(ordered.next().await.unwrap().unwrap().sequence, 4);
    }

    #[tokio::test]
    async fn error_ends_stream() {
        let source = stream::iter(vec![
            Ok(message(1)),
            Err(BusError::Lagged(4)),
            Ok(message(2)),
        ]);
        let mut ordered =
            MessageSequencer::new(Box::pin(source), Duration::from_secs(60)).into_stream();
        assert_eq!(ordered.next().await.unwrap().unwrap().sequence, 1);
        assert!(matches!(ordered.next().await, Some(Err(BusError::Lagged(4)))));
        assert!(ordered.next().await.is_none());
    }
}
