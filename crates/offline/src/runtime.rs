//! Runtime wiring: the single service object the shell UI talks to.

use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use crate::config::OfflineConfig;
use crate::connectivity::{ConnectivityMonitor, StatusRecorder};
use crate::engine::SyncEngine;
use crate::session::{self, SessionTokens};
use crate::store::{OfflineStore, StoreError};
use crate::transport::ActionTransport;
use crate::worker::SyncWorker;

/// Explicitly constructed, single-instance offline service.
///
/// Created once at app mount, torn down at logout. The shell UI records
/// mutations through [`OfflineRuntime::store`], feeds connectivity edges to
/// [`OfflineRuntime::monitor`], and renders badges from the store's
/// subscription channel.
pub struct OfflineRuntime {
    store: Arc<OfflineStore>,
    engine: Arc<SyncEngine>,
    monitor: Arc<ConnectivityMonitor>,
    session: Mutex<Option<SessionTokens>>,
    worker_shutdown: Arc<Notify>,
    worker_handle: Mutex<Option<JoinHandle<()>>>,
}

impl OfflineRuntime {
    /// Initialize the subsystem: open the store, start the background
    /// worker, seed connectivity state and drain any leftover queue.
    pub async fn init(
        config: &OfflineConfig,
        transport: Arc<dyn ActionTransport>,
        recorder: Arc<dyn StatusRecorder>,
        initially_online: bool,
    ) -> Result<Arc<Self>, StoreError> {
        let store = Arc::new(OfflineStore::open(&config.db_path).await?);
        let engine = SyncEngine::new(store.clone(), transport);
        let monitor = ConnectivityMonitor::new(store.clone(), engine.clone(), recorder);

        let worker_shutdown = Arc::new(Notify::new());
        let worker = SyncWorker::new(
            store.clone(),
            engine.clone(),
            monitor.clone(),
            worker_shutdown.clone(),
            config.sync_interval,
        );
        let worker_handle = worker.start();

        let runtime = Arc::new(Self {
            store,
            engine,
            monitor,
            session: Mutex::new(None),
            worker_shutdown,
            worker_handle: Mutex::new(Some(worker_handle)),
        });

        runtime.monitor.bootstrap(initially_online).await;

        Ok(runtime)
    }

    pub fn store(&self) -> &Arc<OfflineStore> {
        &self.store
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }

    /// Install the session credentials after a successful login.
    pub async fn login(&self, tokens: SessionTokens) {
        tracing::info!(tenant = %tokens.tenant_id, "session established");
        *self.session.lock().await = Some(tokens);
    }

    pub async fn session(&self) -> Option<SessionTokens> {
        self.session.lock().await.clone()
    }

    /// Tear the subsystem down at logout.
    ///
    /// The engine and worker stop first so no drain races the wipe; then the
    /// ordered wipe path runs (rotate key, clear data), and finally the
    /// in-memory tokens are dropped. Every step is best-effort: this path
    /// completes before navigation away regardless of individual failures.
    pub async fn logout(&self) {
        self.engine.stop().await;
        self.worker_shutdown.notify_one();
        if let Some(handle) = self.worker_handle.lock().await.take() {
            if let Err(err) = handle.await {
                tracing::warn!("sync worker did not shut down cleanly: {err:?}");
            }
        }

        session::wipe_offline_data(&self.store).await;

        self.session.lock().await.take();
        tracing::info!("offline session torn down");
    }
}
