//! `tillpoint-offline`
//!
//! **Responsibility:** offline action queue and synchronization engine for the
//! tillpoint console.
//!
//! This crate provides:
//! - A durable, encrypted-at-rest queue of mutating actions (SQLite)
//! - A synchronization engine that drains the queue FIFO with capped
//!   exponential backoff
//! - A connectivity monitor driving sync on reconnect
//! - The key-rotation/data-wipe path invoked at logout
//!
//! The rendering layer, authentication screens and the REST API itself are
//! external collaborators; the server remains the arbiter of final state and
//! this crate guarantees at-least-once delivery of recorded intents.

pub mod config;
pub mod connectivity;
pub mod crypto;
pub mod engine;
pub mod runtime;
pub mod session;
pub mod store;
pub mod transport;
pub mod types;
pub mod worker;

pub use config::OfflineConfig;
pub use connectivity::{ConnectivityMonitor, LogStatusRecorder, StatusRecorder};
pub use engine::{DrainOutcome, SyncEngine};
pub use runtime::OfflineRuntime;
pub use session::SessionTokens;
pub use store::{OfflineStore, StoreError};
pub use transport::{ActionTransport, DeliveryError, HttpApiTransport};
pub use types::{ActionIntent, ConnectivityState, QueuedAction};
pub use worker::SyncWorker;
