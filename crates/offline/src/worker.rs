//! Background worker for periodic queue synchronization.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::connectivity::ConnectivityMonitor;
use crate::engine::SyncEngine;
use crate::store::OfflineStore;

/// Periodic ticker driving the sync engine while online.
///
/// The connectivity monitor handles edge-triggered syncs; this worker is the
/// belt-and-braces path that picks up entries queued while online (e.g. after
/// a transient failure whose retry chain was canceled by an offline period).
pub struct SyncWorker {
    store: Arc<OfflineStore>,
    engine: Arc<SyncEngine>,
    monitor: Arc<ConnectivityMonitor>,
    shutdown: Arc<Notify>,
    interval: Duration,
}

impl SyncWorker {
    pub fn new(
        store: Arc<OfflineStore>,
        engine: Arc<SyncEngine>,
        monitor: Arc<ConnectivityMonitor>,
        shutdown: Arc<Notify>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            engine,
            monitor,
            shutdown,
            interval,
        }
    }

    /// Start the background task. Stops when `shutdown` is notified.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        let Self {
            store,
            engine,
            monitor,
            shutdown,
            interval,
        } = self;

        tokio::spawn(async move {
            tracing::info!("background sync worker started");

            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.notified() => {
                        tracing::info!("background sync worker received shutdown signal");
                        break;
                    }
                    _ = tick.tick() => {
                        if !monitor.is_online().await {
                            tracing::debug!("skipping sync tick - offline");
                            continue;
                        }

                        match store.pending_count().await {
                            Ok(0) => continue,
                            Ok(pending) => {
                                tracing::debug!(pending, "periodic sync tick");
                                let _ = engine.sync_offline_queue().await;
                            }
                            Err(err) => {
                                tracing::error!("failed to read pending count: {err:?}");
                            }
                        }
                    }
                }
            }

            tracing::info!("background sync worker stopped");
        })
    }
}
