//! Background drain of the deferred queue

use tracing::debug;

use super::Orchestrator;
use crate::{internal, types::QueueReason};

impl Orchestrator {
    /// Resubmit queued messages head first until the queue is empty
    ///
    /// Runs as the single drain task; the caller must hold the queue's drain
    /// flag. Before each dequeue it waits out an all-breakers-open condition
    /// and an empty token bucket, so every iteration either sleeps or makes
    /// progress.
    pub(super) async fn drain(self) {
        let inner = &*self.inner;
        let mut paused = false;

        internal!(level = DEBUG, "Deferred queue drain started");

        loop {
            if inner.queue.is_empty() {
                if inner.queue.finish_drain() {
                    continue;
                }
                break;
            }

            if self.all_breakers_rejecting() {
                let pause = inner.queue_config.breaker_pause();
                inner.auditor.drain_paused(QueueReason::AllBreakersOpen, pause);
                paused = true;
                tokio::time::sleep(pause).await;
                continue;
            }

            let wait = inner.admission.time_until_next_token();
            if !wait.is_zero() {
                inner
                    .auditor
                    .drain_paused(QueueReason::RateLimited { retry_in: wait }, wait);
                paused = true;
                tokio::time::sleep(wait).await;
                continue;
            }

            if paused {
                paused = false;
                inner.auditor.drain_resumed();
            }

            let Some(message) = inner.queue.pop_front() else {
                continue;
            };

            let id = message.id.clone();
            let outcome = self.submit(message).await;
            debug!(
                message_id = %id,
                success = outcome.success,
                requeued = outcome.is_queued(),
                remaining = inner.queue.len(),
                "Drained queued message"
            );
        }

        internal!(level = DEBUG, "Deferred queue drain finished");
    }
}
