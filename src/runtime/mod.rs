//! Single-writer async runtime, configuration and event stream.

/// Runtime tuning and TOML loading.
pub mod config;
/// Completion events and notifier.
pub mod events;
/// Engine task and its handle.
pub mod handle;
