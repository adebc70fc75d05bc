//! Tracing and logging (shared setup).
//!
//! The offline subsystem logs through `tracing` everywhere; the hosting shell
//! calls [`init`] once at startup, and integration tests call it per process.

/// Initialize process-wide observability (tracing/logging).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Tracing configuration (filters, layers).
pub mod tracing;
