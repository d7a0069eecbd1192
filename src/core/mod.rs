//! Queue bookkeeping: migration, dependency resolution and dispatch tracking.

/// Per-playlist queue aliases.
pub mod indices;
/// Legacy row migration.
pub mod migrate;
/// Playlist-creation dependency resolution.
pub mod resolver;
/// In-flight dispatch tracking.
pub mod tracker;
