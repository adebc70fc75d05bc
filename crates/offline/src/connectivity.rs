//! Connectivity monitoring and offline-period bookkeeping.
//!
//! The hosting runtime feeds edge events into [`ConnectivityMonitor`] via
//! `handle_online`/`handle_offline`; tests drive the same interface directly
//! instead of touching real platform APIs. Two states only: ONLINE and
//! OFFLINE.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::engine::SyncEngine;
use crate::store::OfflineStore;
use crate::types::{ConnectivityState, OFFLINE_SINCE};

/// Observability collaborator receiving status transitions. Fire-and-forget;
/// no acknowledgment expected.
pub trait StatusRecorder: Send + Sync {
    /// `since` carries the offline timestamp when transitioning to OFFLINE.
    fn record(&self, status: ConnectivityState, since: Option<DateTime<Utc>>);
}

/// Default recorder: logs transitions through `tracing`.
pub struct LogStatusRecorder;

impl StatusRecorder for LogStatusRecorder {
    fn record(&self, status: ConnectivityState, since: Option<DateTime<Utc>>) {
        match status {
            ConnectivityState::Online => tracing::info!("status transition: online"),
            ConnectivityState::Offline => {
                tracing::warn!(?since, "status transition: offline")
            }
        }
    }
}

/// Tracks the runtime's connectivity signal and drives the sync engine.
///
/// Invariant: the `offline_since` flag is non-empty exactly while the monitor
/// believes the client is offline.
pub struct ConnectivityMonitor {
    store: Arc<OfflineStore>,
    engine: Arc<SyncEngine>,
    recorder: Arc<dyn StatusRecorder>,
    state: Mutex<ConnectivityState>,
}

impl ConnectivityMonitor {
    pub fn new(
        store: Arc<OfflineStore>,
        engine: Arc<SyncEngine>,
        recorder: Arc<dyn StatusRecorder>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            engine,
            recorder,
            state: Mutex::new(ConnectivityState::Online),
        })
    }

    pub async fn state(&self) -> ConnectivityState {
        *self.state.lock().await
    }

    pub async fn is_online(&self) -> bool {
        self.state().await == ConnectivityState::Online
    }

    /// Seed the state from the runtime's current signal at mount.
    ///
    /// A reload can leave entries behind; when already online with a nonzero
    /// pending count, a drain starts right away instead of waiting for a
    /// fresh transition or the next tick.
    pub async fn bootstrap(self: &Arc<Self>, initially_online: bool) {
        if initially_online {
            *self.state.lock().await = ConnectivityState::Online;
            // A stamp left behind by a shutdown-while-offline is stale now;
            // the flag must be empty whenever the client is online.
            if let Err(err) = self.store.set_offline_flag(OFFLINE_SINCE, "").await {
                tracing::warn!("failed to clear offline_since flag: {err:?}");
            }
            match self.store.pending_count().await {
                Ok(0) => {}
                Ok(pending) => {
                    tracing::info!(pending, "draining leftover offline queue at mount");
                    let _ = self.engine.sync_offline_queue().await;
                }
                Err(err) => tracing::error!("failed to read pending count at mount: {err:?}"),
            }
        } else {
            *self.state.lock().await = ConnectivityState::Offline;
            // Keep an earlier offline_since if one survived the reload; the
            // client has been offline since then, not since the restart.
            match self.store.offline_flag(OFFLINE_SINCE).await {
                Ok(existing) if !existing.is_empty() => {}
                Ok(_) => self.stamp_offline_since(Utc::now()).await,
                Err(err) => tracing::error!("failed to read offline_since at mount: {err:?}"),
            }
        }
    }

    /// ONLINE → OFFLINE edge from the hosting runtime.
    pub async fn handle_offline(&self) {
        {
            let mut state = self.state.lock().await;
            if *state == ConnectivityState::Offline {
                return;
            }
            *state = ConnectivityState::Offline;
        }

        let now = Utc::now();
        self.stamp_offline_since(now).await;

        // No point retrying while definitely offline.
        self.engine.cancel_retry().await;

        self.recorder.record(ConnectivityState::Offline, Some(now));
        tracing::warn!("connectivity lost");
    }

    /// OFFLINE → ONLINE edge from the hosting runtime. Triggers a sync
    /// attempt immediately.
    pub async fn handle_online(self: &Arc<Self>) {
        {
            let mut state = self.state.lock().await;
            if *state == ConnectivityState::Online {
                return;
            }
            *state = ConnectivityState::Online;
        }

        if let Err(err) = self.store.set_offline_flag(OFFLINE_SINCE, "").await {
            tracing::warn!("failed to clear offline_since flag: {err:?}");
        }

        self.recorder.record(ConnectivityState::Online, None);
        tracing::info!("connectivity restored");

        let _ = self.engine.sync_offline_queue().await;
    }

    async fn stamp_offline_since(&self, when: DateTime<Utc>) {
        if let Err(err) = self
            .store
            .set_offline_flag(OFFLINE_SINCE, &when.to_rfc3339())
            .await
        {
            tracing::warn!("failed to stamp offline_since flag: {err:?}");
        }
    }
}
