// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Single write path to the durable output stream.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ferry_core::{EventSink, FerryError, MessageEvent, PublishOutcome};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::retry::RetryPolicy;

/// Publishes normalized events, deduplicating on `(channel_id, seq_id)`.
///
/// Deduplication itself lives in the sink; the publisher retries a sink that
/// is temporarily unavailable and reports outcomes to metrics.
pub struct QueuePublisher {
    sink: Arc<dyn EventSink>,
    retry: RetryPolicy,
}

impl QueuePublisher {
    pub fn new(sink: Arc<dyn EventSink>, retry: RetryPolicy) -> Self {
        Self { sink, retry }
    }

    /// Append `event` to the output stream.
    ///
    /// `DuplicateIgnored` is a successful no-op. An error means the event was
    /// not accepted and the caller must not advance its cursor past it.
    pub async fn publish(&self, event: &MessageEvent) -> Result<PublishOutcome, FerryError> {
        let mut attempt = 0;
        loop {
            match self.sink.append(event).await {
                Ok(outcome) => {
                    ferry_prometheus::record_published(event.origin, outcome);
                    if outcome == PublishOutcome::DuplicateIgnored {
                        debug!(
                            channel_id = %event.channel_id,
                            seq_id = event.seq_id,
                            origin = %event.origin,
                            "duplicate event ignored"
                        );
                    }
                    return Ok(outcome);
                }
                Err(e) if e.is_recoverable() && attempt + 1 < self.retry.max_attempts => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(
                        channel_id = %event.channel_id,
                        seq_id = event.seq_id,
                        attempt,
                        error = %e,
                        "output stream unavailable, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Periodically drop delivered entries older than `window`.
    pub fn spawn_pruner(
        self: &Arc<Self>,
        interval: Duration,
        window: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let publisher = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Ok(window) = chrono::Duration::from_std(window) else {
                    warn!("dedup window out of range, pruning disabled");
                    break;
                };
                match publisher.sink.prune(Utc::now() - window).await {
                    Ok(0) => {}
                    Ok(removed) => info!(removed, "pruned delivered events past the dedup window"),
                    Err(e) => warn!(error = %e, "output stream prune failed"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::{ChannelId, MessagePayload, Origin, SeqId};
    use ferry_test_utils::MemorySink;
    use proptest::prelude::*;

    fn event(channel: i64, seq: SeqId, origin: Origin) -> MessageEvent {
        MessageEvent {
            channel_id: ChannelId(channel),
            seq_id: seq,
            timestamp: Utc::now(),
            payload: MessagePayload::default(),
            origin,
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
            jitter_percent: 0.0,
            max_attempts,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_unavailable_sink() {
        let sink = Arc::new(MemorySink::new());
        sink.fail_next(2);
        let publisher = QueuePublisher::new(sink.clone(), fast_retry(5));

        let outcome = publisher.publish(&event(1, 1, Origin::Live)).await.unwrap();
        assert_eq!(outcome, PublishOutcome::Accepted);
        assert_eq!(sink.seqs(ChannelId(1)), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_ceiling() {
        let sink = Arc::new(MemorySink::new());
        sink.fail_next(3);
        let publisher = QueuePublisher::new(sink.clone(), fast_retry(3));

        assert!(publisher.publish(&event(1, 1, Origin::Live)).await.is_err());
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn live_and_backfill_overlap_is_deduplicated() {
        let sink = Arc::new(MemorySink::new());
        let publisher = QueuePublisher::new(sink.clone(), fast_retry(1));

        assert_eq!(
            publisher.publish(&event(7, 500, Origin::Live)).await.unwrap(),
            PublishOutcome::Accepted
        );
        assert_eq!(
            publisher.publish(&event(7, 500, Origin::Backfill)).await.unwrap(),
            PublishOutcome::DuplicateIgnored
        );
        assert_eq!(sink.events()[0].origin, Origin::Live);
    }

    proptest! {
        #[test]
        fn repeated_publishes_are_observed_once(
            keys in proptest::collection::vec((0i64..4, 1i64..40, any::<bool>()), 1..120)
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let sink = Arc::new(MemorySink::new());
                let publisher = QueuePublisher::new(sink.clone(), fast_retry(1));
                let mut distinct = std::collections::BTreeSet::new();
                let mut accepted = 0usize;

                for (channel, seq, live) in &keys {
                    let origin = if *live { Origin::Live } else { Origin::Backfill };
                    let outcome = publisher.publish(&event(*channel, *seq, origin)).await.unwrap();
                    let fresh = distinct.insert((*channel, *seq));
                    prop_assert_eq!(outcome == PublishOutcome::Accepted, fresh);
                    if fresh {
                        accepted += 1;
                    }
                }

                prop_assert_eq!(sink.accepted_count(), distinct.len());
                prop_assert_eq!(accepted, distinct.len());
                Ok(())
            })?;
        }
    }
}
