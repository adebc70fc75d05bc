//! Shared types for the offline subsystem.
//!
//! These are plain serde types with no storage or runtime dependencies so the
//! shell UI can consume them directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tillpoint_core::ActionId;

/// Flag key: RFC 3339 timestamp of when connectivity was lost; empty while
/// online.
pub const OFFLINE_SINCE: &str = "offline_since";

/// Flag key: `"true"` while the most recent drain failed and a retry is
/// scheduled, `"false"` otherwise.
pub const SYNC_BLOCKED: &str = "sync_blocked";

/// A request intent handed in by the record-mutation collaborator: the exact
/// call to replay once the server is reachable again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionIntent {
    pub endpoint: String,
    pub method: String,
    pub body: Value,
}

impl ActionIntent {
    pub fn new(endpoint: impl Into<String>, method: impl Into<String>, body: Value) -> Self {
        Self {
            endpoint: endpoint.into(),
            method: method.into(),
            body,
        }
    }
}

/// One durably recorded mutating action awaiting delivery.
///
/// Created at enqueue time, removed only after a confirmed successful replay.
/// Only `attempt` is ever mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedAction {
    pub id: ActionId,
    pub endpoint: String,
    pub method: String,
    pub body: Value,
    pub created_at: DateTime<Utc>,
    pub attempt: u32,
}

impl QueuedAction {
    /// Capture an intent as a queue entry (id and timestamp assigned here).
    pub fn record(intent: ActionIntent) -> Self {
        Self {
            id: ActionId::new(),
            endpoint: intent.endpoint,
            method: intent.method,
            body: intent.body,
            created_at: Utc::now(),
            attempt: 0,
        }
    }

    /// The request intent this entry replays.
    pub fn intent(&self) -> ActionIntent {
        ActionIntent {
            endpoint: self.endpoint.clone(),
            method: self.method.clone(),
            body: self.body.clone(),
        }
    }
}

/// Connectivity state of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityState {
    /// Online and (believed) connected to the API.
    Online,
    /// Offline (network unreachable or API unavailable).
    Offline,
}
