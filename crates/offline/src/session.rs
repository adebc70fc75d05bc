//! Session credentials and the logout wipe path.

use tillpoint_core::TenantId;

use crate::store::OfflineStore;

/// In-memory session credentials. Never persisted; dropped at logout.
#[derive(Clone)]
pub struct SessionTokens {
    pub tenant_id: TenantId,
    pub access_token: String,
    pub refresh_token: String,
}

impl std::fmt::Debug for SessionTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTokens")
            .field("tenant_id", &self.tenant_id)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

/// Rotate the at-rest key, then purge all entries and flags.
///
/// Rotation must land first: if the purge is interrupted (tab closed
/// mid-operation), leftover ciphertext is already unreadable under the new
/// key. Both steps are best-effort; on a shared device an incomplete wipe is
/// preferable to staying logged in, so errors are logged and logout proceeds.
pub async fn wipe_offline_data(store: &OfflineStore) {
    if let Err(err) = store.rotate_offline_key().await {
        tracing::error!("offline key rotation failed, wiping anyway: {err:?}");
    }
    if let Err(err) = store.clear_offline_data().await {
        tracing::error!("offline data wipe failed: {err:?}");
    }
}
