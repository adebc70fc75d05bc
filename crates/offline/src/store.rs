//! Durable queue store persisted in SQLite.
//!
//! `OfflineStore` is the exclusive owner of persisted offline state: queued
//! actions, keyed flags, and the at-rest encryption key. The request intent
//! (`endpoint`, `method`, `body`) of each entry is sealed before it touches
//! disk; `id`, `created_at` and `attempt` stay cleartext for ordering and
//! accounting. All mutation goes through this interface, which makes it the
//! serialization point for the single-writer model.

use std::path::{Path, PathBuf};

use anyhow::Context;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tokio::sync::{watch, RwLock};

use tillpoint_core::ActionId;

use crate::crypto::{CryptoError, QueueCipher, KEY_SIZE};
use crate::types::{ActionIntent, QueuedAction};

const CIPHER_KEY_META: &str = "cipher_key";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("corrupt queue row: {0}")]
    Corrupt(String),
    #[error("storage setup failed: {0}")]
    Setup(String),
}

/// SQLite-backed store for queued actions and offline flags.
pub struct OfflineStore {
    pool: SqlitePool,
    cipher: RwLock<QueueCipher>,
    queue_changed: watch::Sender<u64>,
}

impl OfflineStore {
    /// Open (or create) the store at the given path.
    ///
    /// Creates the schema on first use and loads the at-rest key, generating
    /// one if none exists yet.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Setup(format!("failed to create store directory {parent:?}: {e}"))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        // A single connection keeps all writes serialized through one handle.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS action_queue (
                id         TEXT PRIMARY KEY,
                payload    BLOB NOT NULL,
                created_at TEXT NOT NULL,
                attempt    INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS offline_flags (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS offline_meta (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        let key = load_or_create_key(&pool).await?;
        let initial_count = count_entries(&pool).await?;
        let (queue_changed, _) = watch::channel(initial_count);

        Ok(Self {
            pool,
            cipher: RwLock::new(QueueCipher::new(&key)),
            queue_changed,
        })
    }

    /// Open the store at the platform default location
    /// (`{app_data_dir}/tillpoint/offline.db`).
    pub async fn open_default() -> Result<Self, StoreError> {
        let path = default_db_path().map_err(|e| StoreError::Setup(e.to_string()))?;
        Self::open(&path).await
    }

    /// Append a recorded mutation to the queue.
    ///
    /// Never fails the caller: a storage error is logged and swallowed so the
    /// UI action that produced the intent is not blocked. Callers that need
    /// the durability truth use [`OfflineStore::try_enqueue`].
    pub async fn enqueue(&self, intent: ActionIntent) -> QueuedAction {
        let action = QueuedAction::record(intent);
        if let Err(err) = self.persist(&action).await {
            tracing::error!("failed to enqueue offline action {}: {err:?}", action.id);
        }
        action
    }

    /// Typed form of [`OfflineStore::enqueue`].
    pub async fn try_enqueue(&self, intent: ActionIntent) -> Result<QueuedAction, StoreError> {
        let action = QueuedAction::record(intent);
        self.persist(&action).await?;
        Ok(action)
    }

    async fn persist(&self, action: &QueuedAction) -> Result<(), StoreError> {
        let plaintext = serde_json::to_vec(&action.intent())?;
        let sealed = self.cipher.read().await.seal(&plaintext)?;

        sqlx::query(
            r#"
            INSERT INTO action_queue (id, payload, created_at, attempt)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(action.id.to_string())
        .bind(&sealed)
        .bind(action.created_at.to_rfc3339())
        .bind(action.attempt as i64)
        .execute(&self.pool)
        .await?;

        self.notify_queue_changed().await;
        Ok(())
    }

    /// Number of entries currently stored, including rows whose payload can
    /// no longer be decrypted.
    pub async fn pending_count(&self) -> Result<u64, StoreError> {
        Ok(count_entries(&self.pool).await?)
    }

    /// All queued actions in FIFO order (`created_at`, then time-ordered id).
    ///
    /// Rows sealed under a rotated-away key are skipped with a warning; they
    /// are unrecoverable by design and get purged by
    /// [`OfflineStore::clear_offline_data`].
    pub async fn list_pending(&self) -> Result<Vec<QueuedAction>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, payload, created_at, attempt
            FROM action_queue
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let cipher = self.cipher.read().await;
        let mut actions = Vec::with_capacity(rows.len());
        for row in rows {
            match row_to_action(&row, &cipher) {
                Ok(action) => actions.push(action),
                Err(err) => tracing::warn!("skipping unreadable queue entry: {err:?}"),
            }
        }
        Ok(actions)
    }

    /// Delete exactly one entry. Removing a missing id is a no-op.
    pub async fn remove_entry(&self, id: ActionId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM action_queue WHERE id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        self.notify_queue_changed().await;
        Ok(())
    }

    /// Record one delivery attempt against an entry. The only permitted
    /// mutation of a stored entry.
    pub async fn increment_attempt(&self, id: ActionId) -> Result<(), StoreError> {
        sqlx::query("UPDATE action_queue SET attempt = attempt + 1 WHERE id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Read a keyed flag; returns the empty string when unset.
    pub async fn offline_flag(&self, key: &str) -> Result<String, StoreError> {
        let row = sqlx::query("SELECT value FROM offline_flags WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row
            .map(|r| r.try_get::<String, _>("value"))
            .transpose()?
            .unwrap_or_default())
    }

    /// Set a keyed flag (upsert).
    pub async fn set_offline_flag(&self, key: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO offline_flags (key, value)
            VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        self.notify_queue_changed().await;
        Ok(())
    }

    /// Subscribe to pending-count updates.
    ///
    /// Every mutating call on the store publishes the new count after its
    /// write lands. Dropping the receiver unsubscribes; any number of
    /// concurrent subscribers is fine.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.queue_changed.subscribe()
    }

    /// Purge all entries and flags unconditionally. Used at logout, after
    /// [`OfflineStore::rotate_offline_key`].
    pub async fn clear_offline_data(&self) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM action_queue")
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM offline_flags")
            .execute(&self.pool)
            .await?;

        self.notify_queue_changed().await;
        Ok(())
    }

    /// Replace the at-rest key with a freshly generated one.
    ///
    /// The new key is persisted before the in-memory cipher is swapped, so an
    /// interrupted logout still leaves previous-session ciphertext
    /// unrecoverable.
    pub async fn rotate_offline_key(&self) -> Result<(), StoreError> {
        let key = QueueCipher::generate_key();

        sqlx::query(
            r#"
            INSERT INTO offline_meta (key, value)
            VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(CIPHER_KEY_META)
        .bind(BASE64.encode(key))
        .execute(&self.pool)
        .await?;

        *self.cipher.write().await = QueueCipher::new(&key);
        tracing::info!("offline encryption key rotated");

        self.notify_queue_changed().await;
        Ok(())
    }

    async fn notify_queue_changed(&self) {
        match count_entries(&self.pool).await {
            Ok(count) => {
                let _ = self.queue_changed.send(count);
            }
            Err(err) => tracing::error!("failed to refresh pending count: {err:?}"),
        }
    }
}

async fn count_entries(pool: &SqlitePool) -> Result<u64, sqlx::Error> {
    let row = sqlx::query("SELECT COUNT(*) AS total FROM action_queue")
        .fetch_one(pool)
        .await?;
    let total: i64 = row.try_get("total")?;
    Ok(total as u64)
}

async fn load_or_create_key(pool: &SqlitePool) -> Result<[u8; KEY_SIZE], StoreError> {
    let row = sqlx::query("SELECT value FROM offline_meta WHERE key = ?1")
        .bind(CIPHER_KEY_META)
        .fetch_optional(pool)
        .await?;

    if let Some(row) = row {
        let encoded: String = row.try_get("value")?;
        match BASE64.decode(&encoded) {
            Ok(bytes) if bytes.len() == KEY_SIZE => {
                let mut key = [0u8; KEY_SIZE];
                key.copy_from_slice(&bytes);
                return Ok(key);
            }
            _ => {
                // A corrupt key blob means the existing payloads are lost
                // either way; start over with a fresh key.
                tracing::warn!("stored offline key is malformed, generating a new one");
            }
        }
    }

    let key = QueueCipher::generate_key();
    sqlx::query(
        r#"
        INSERT INTO offline_meta (key, value)
        VALUES (?1, ?2)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value
        "#,
    )
    .bind(CIPHER_KEY_META)
    .bind(BASE64.encode(key))
    .execute(pool)
    .await?;

    Ok(key)
}

fn row_to_action(row: &SqliteRow, cipher: &QueueCipher) -> Result<QueuedAction, StoreError> {
    let id_str: String = row.try_get("id")?;
    let id = id_str
        .parse::<ActionId>()
        .map_err(|e| StoreError::Corrupt(format!("invalid id in action_queue: {e}")))?;

    let created_at_str: String = row.try_get("created_at")?;
    let created_at = DateTime::parse_from_rfc3339(&created_at_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("invalid created_at in action_queue: {e}")))?;

    let attempt: i64 = row.try_get("attempt")?;

    let payload: Vec<u8> = row.try_get("payload")?;
    let plaintext = cipher.open(&payload)?;
    let intent: ActionIntent = serde_json::from_slice(&plaintext)?;

    Ok(QueuedAction {
        id,
        endpoint: intent.endpoint,
        method: intent.method,
        body: intent.body,
        created_at,
        attempt: attempt as u32,
    })
}

/// Resolve the path to the SQLite database for the offline store:
/// `{app_data_dir}/tillpoint/offline.db`.
pub(crate) fn default_db_path() -> anyhow::Result<PathBuf> {
    let base = dirs::data_dir()
        .or_else(|| {
            dirs::home_dir().map(|mut h| {
                h.push(".local");
                h.push("share");
                h
            })
        })
        .context("failed to resolve OS app data directory")?;

    let mut dir = base;
    dir.push("tillpoint");

    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create offline store directory at {dir:?}"))?;

    dir.push("offline.db");
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OFFLINE_SINCE, SYNC_BLOCKED};
    use serde_json::json;
    use tempfile::TempDir;

    async fn open_store() -> (TempDir, OfflineStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = OfflineStore::open(&dir.path().join("offline.db"))
            .await
            .expect("open store");
        (dir, store)
    }

    fn intent(n: u32) -> ActionIntent {
        ActionIntent::new(
            format!("/inventory/items/{n}/adjust"),
            "POST",
            json!({ "delta": -1 }),
        )
    }

    #[tokio::test]
    async fn pending_count_tracks_enqueue_and_removal() {
        let (_dir, store) = open_store().await;
        assert_eq!(store.pending_count().await.unwrap(), 0);

        let a = store.enqueue(intent(1)).await;
        let _b = store.enqueue(intent(2)).await;
        assert_eq!(store.pending_count().await.unwrap(), 2);

        store.remove_entry(a.id).await.unwrap();
        assert_eq!(store.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn list_pending_preserves_insertion_order() {
        let (_dir, store) = open_store().await;
        let ids: Vec<_> = [1u32, 2, 3]
            .into_iter()
            .map(|n| intent(n))
            .collect::<Vec<_>>();
        let mut expected = Vec::new();
        for i in ids {
            expected.push(store.try_enqueue(i).await.unwrap().id);
        }

        let listed: Vec<_> = store
            .list_pending()
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(listed, expected);
    }

    #[tokio::test]
    async fn remove_entry_is_idempotent() {
        let (_dir, store) = open_store().await;
        let a = store.enqueue(intent(1)).await;

        store.remove_entry(a.id).await.unwrap();
        store.remove_entry(a.id).await.unwrap();
        assert_eq!(store.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn flags_are_independent_of_the_queue() {
        let (_dir, store) = open_store().await;
        assert_eq!(store.offline_flag(OFFLINE_SINCE).await.unwrap(), "");

        store
            .set_offline_flag(OFFLINE_SINCE, "2026-08-26T09:00:00+00:00")
            .await
            .unwrap();
        store.set_offline_flag(SYNC_BLOCKED, "true").await.unwrap();

        assert_eq!(
            store.offline_flag(OFFLINE_SINCE).await.unwrap(),
            "2026-08-26T09:00:00+00:00"
        );
        assert_eq!(store.offline_flag(SYNC_BLOCKED).await.unwrap(), "true");
        assert_eq!(store.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn attempt_increment_is_the_only_entry_mutation() {
        let (_dir, store) = open_store().await;
        let a = store.enqueue(intent(1)).await;

        store.increment_attempt(a.id).await.unwrap();
        store.increment_attempt(a.id).await.unwrap();

        let listed = store.list_pending().await.unwrap();
        assert_eq!(listed[0].attempt, 2);
        assert_eq!(listed[0].endpoint, a.endpoint);
        assert_eq!(listed[0].created_at, a.created_at);
    }

    #[tokio::test]
    async fn subscribers_see_the_new_count() {
        let (_dir, store) = open_store().await;
        let mut rx = store.subscribe();
        assert_eq!(*rx.borrow(), 0);

        store.enqueue(intent(1)).await;
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), 1);

        // A second subscriber joins late and still sees the current count.
        let rx2 = store.subscribe();
        assert_eq!(*rx2.borrow(), 1);
    }

    #[tokio::test]
    async fn rotate_then_clear_leaves_nothing_readable() {
        let (_dir, store) = open_store().await;
        store.enqueue(intent(1)).await;
        store.enqueue(intent(2)).await;

        store.rotate_offline_key().await.unwrap();

        // Rows are still owned by the store but sealed under the old key.
        assert_eq!(store.pending_count().await.unwrap(), 2);
        assert!(store.list_pending().await.unwrap().is_empty());

        store.clear_offline_data().await.unwrap();
        assert_eq!(store.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn entries_survive_a_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("offline.db");

        let first = OfflineStore::open(&path).await.unwrap();
        let a = first.enqueue(intent(7)).await;
        drop(first);

        let second = OfflineStore::open(&path).await.unwrap();
        let listed = second.list_pending().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, a.id);
        assert_eq!(listed[0].body, json!({ "delta": -1 }));
    }
}
