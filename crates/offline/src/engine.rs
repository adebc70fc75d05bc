//! Synchronization engine: drains the offline queue against the server.
//!
//! One drain delivers queued entries FIFO and stops at the first failure;
//! later entries never jump the queue, preserving the causal order of the
//! operator's mutations. Failures set the `sync_blocked` flag and arm a
//! single retry timer with capped exponential backoff. The attempt counter
//! and the timer live in memory only and reset on process restart.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::store::OfflineStore;
use crate::transport::ActionTransport;
use crate::types::SYNC_BLOCKED;

/// Backoff cap (5 minutes), reached from attempt 10 on.
pub const MAX_BACKOFF: Duration = Duration::from_secs(300);

const BASE_BACKOFF_MS: u64 = 1_000;

/// Retry delay for the n-th consecutive failed attempt:
/// `min(300_000ms, 1000ms * 2^(n-1))`.
pub fn backoff_delay(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(9);
    Duration::from_millis((BASE_BACKOFF_MS << exp).min(MAX_BACKOFF.as_millis() as u64))
}

/// Result of one drain cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every queued entry was delivered and removed.
    Completed { delivered: usize },
    /// A delivery failed; `sync_blocked` is set and a retry is armed.
    Blocked { attempt: u32, retry_in: Duration },
    /// Another drain was already in flight; this request was a no-op.
    AlreadyRunning,
    /// The engine was stopped by logout; nothing will be attempted.
    Stopped,
}

/// The single scheduled retry task. At most one exists at a time; it is
/// always re-armed from a clean slate, never stacked.
struct RetryHandle {
    task: JoinHandle<()>,
}

impl RetryHandle {
    fn cancel(self) {
        self.task.abort();
    }
}

struct EngineState {
    attempt: u32,
    retry: Option<RetryHandle>,
    stopped: bool,
}

/// Drains the queue, owns the in-memory backoff state.
pub struct SyncEngine {
    store: Arc<OfflineStore>,
    transport: Arc<dyn ActionTransport>,
    state: Mutex<EngineState>,
    drain_gate: Mutex<()>,
}

impl SyncEngine {
    pub fn new(store: Arc<OfflineStore>, transport: Arc<dyn ActionTransport>) -> Arc<Self> {
        Arc::new(Self {
            store,
            transport,
            state: Mutex::new(EngineState {
                attempt: 0,
                retry: None,
                stopped: false,
            }),
            drain_gate: Mutex::new(()),
        })
    }

    /// Attempt to deliver all currently queued entries, FIFO, stopping at the
    /// first failure. Also the manual "sync now" entry point: a manual call
    /// during a backoff wait runs immediately, and on success cancels the
    /// pending retry and resets the attempt counter.
    ///
    /// At most one drain runs at a time; a call while one is in flight
    /// returns [`DrainOutcome::AlreadyRunning`] without touching the queue.
    pub async fn sync_offline_queue(self: &Arc<Self>) -> DrainOutcome {
        let _gate = match self.drain_gate.try_lock() {
            Ok(gate) => gate,
            Err(_) => {
                tracing::debug!("drain already in flight, skipping");
                return DrainOutcome::AlreadyRunning;
            }
        };

        if self.state.lock().await.stopped {
            return DrainOutcome::Stopped;
        }

        let pending = match self.store.list_pending().await {
            Ok(pending) => pending,
            Err(err) => {
                tracing::error!("failed to read offline queue: {err:?}");
                return self.note_failure().await;
            }
        };

        if pending.is_empty() {
            return self.note_success(0).await;
        }

        tracing::info!(pending = pending.len(), "draining offline queue");

        let mut delivered = 0usize;
        for action in pending {
            if let Err(err) = self.store.increment_attempt(action.id).await {
                tracing::warn!("failed to record delivery attempt for {}: {err:?}", action.id);
            }

            match self.transport.deliver(&action).await {
                Ok(()) => {
                    if let Err(err) = self.store.remove_entry(action.id).await {
                        // Delivered but not removed: it will be replayed. The
                        // server owns final state, so at-least-once holds.
                        tracing::error!(
                            "failed to remove delivered entry {}: {err:?}",
                            action.id
                        );
                    }
                    delivered += 1;
                }
                Err(err) => {
                    tracing::warn!(
                        "delivery failed for {} ({} {}): {err}",
                        action.id,
                        action.method,
                        action.endpoint
                    );
                    return self.note_failure().await;
                }
            }
        }

        self.note_success(delivered).await
    }

    /// Cancel the scheduled retry, if any. Called on the OFFLINE transition.
    pub async fn cancel_retry(&self) {
        let mut state = self.state.lock().await;
        if let Some(retry) = state.retry.take() {
            retry.cancel();
            tracing::debug!("scheduled retry canceled");
        }
    }

    /// Stop the engine for good. No further drains run and no retries are
    /// scheduled; used at logout.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        state.stopped = true;
        if let Some(retry) = state.retry.take() {
            retry.cancel();
        }
        tracing::info!("sync engine stopped");
    }

    /// Consecutive failed attempts in the current backoff chain.
    pub async fn attempt(&self) -> u32 {
        self.state.lock().await.attempt
    }

    /// Whether a retry timer is currently armed.
    pub async fn retry_scheduled(&self) -> bool {
        self.state.lock().await.retry.is_some()
    }

    async fn note_success(&self, delivered: usize) -> DrainOutcome {
        if let Err(err) = self.store.set_offline_flag(SYNC_BLOCKED, "false").await {
            tracing::warn!("failed to clear sync_blocked flag: {err:?}");
        }

        let mut state = self.state.lock().await;
        state.attempt = 0;
        if let Some(retry) = state.retry.take() {
            retry.cancel();
        }

        if delivered > 0 {
            tracing::info!(delivered, "offline queue drained");
        }
        DrainOutcome::Completed { delivered }
    }

    async fn note_failure(self: &Arc<Self>) -> DrainOutcome {
        let mut state = self.state.lock().await;
        if state.stopped {
            return DrainOutcome::Stopped;
        }

        if let Err(err) = self.store.set_offline_flag(SYNC_BLOCKED, "true").await {
            tracing::warn!("failed to set sync_blocked flag: {err:?}");
        }

        state.attempt += 1;
        let attempt = state.attempt;
        let retry_in = backoff_delay(attempt);

        if let Some(previous) = state.retry.take() {
            // When the armed retry task is the one re-entering the drain, the
            // stored handle is its own; aborting it here would kill the task
            // mid-failure. Dropping the handle is enough, the task is about
            // to finish anyway.
            if tokio::task::try_id() != Some(previous.task.id()) {
                previous.cancel();
            }
        }

        let engine = Arc::clone(self);
        let task = tokio::spawn(async move {
            tokio::time::sleep(retry_in).await;
            engine.drain_boxed().await;
        });
        state.retry = Some(RetryHandle { task });

        tracing::info!(attempt, ?retry_in, "sync blocked, retry scheduled");
        DrainOutcome::Blocked { attempt, retry_in }
    }

    // Boxed so the retry task can re-enter the drain without producing a
    // recursive future type.
    fn drain_boxed(self: &Arc<Self>) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let _ = self.sync_offline_queue().await;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn backoff_starts_at_one_second_and_doubles() {
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(2), Duration::from_secs(2));
        assert_eq!(backoff_delay(3), Duration::from_secs(4));
        assert_eq!(backoff_delay(8), Duration::from_secs(128));
    }

    #[test]
    fn backoff_caps_at_five_minutes() {
        // 1000ms * 2^8 = 256s is still under the cap; the cap first binds at
        // attempt 10 (512s clamped to 300s).
        assert_eq!(backoff_delay(9), Duration::from_secs(256));
        assert_eq!(backoff_delay(10), MAX_BACKOFF);
        assert_eq!(backoff_delay(u32::MAX), MAX_BACKOFF);
    }

    #[test]
    fn backoff_handles_attempt_zero() {
        // Never produced by the engine, but the function stays total.
        assert_eq!(backoff_delay(0), Duration::from_secs(1));
    }

    proptest! {
        #[test]
        fn backoff_is_monotonic_and_capped(attempt in 1u32..64) {
            let delay = backoff_delay(attempt);
            let next = backoff_delay(attempt + 1);
            prop_assert!(delay <= next);
            prop_assert!(delay <= MAX_BACKOFF);
            prop_assert!(delay >= Duration::from_secs(1));
        }
    }
}
