//! Shared primitive IDs and protocol enums.

use serde::{Deserialize, Serialize};

/// Monotonic log identifier assigned by the store on append.
pub type LocalId = u64;
/// Per-dispatch correlation identifier.
pub type RequestId = uuid::Uuid;
/// Client-generated playlist identifier.
pub type LocalPlaylistId = String;
/// Identifier assigned by the remote service.
pub type RemoteId = String;

/// Reserved [`LocalId`] for dispatches that never touch the log.
pub const UNLOGGED_LOCAL_ID: LocalId = 0;

/// HTTP verb used by the remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verb {
    /// Read.
    Get,
    /// Create.
    Post,
    /// Replace.
    Put,
    /// Remove.
    Delete,
}

/// Remote resource family an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceFamily {
    /// `/playlists`.
    Playlists,
    /// `/playlistEntries`.
    PlaylistEntries,
    /// `/playbackLogEntries`.
    PlaybackLog,
    /// `/relationships`.
    Relationships,
    /// `/socialActions`, only reachable through legacy rows.
    SocialActions,
}

/// Seconds since the Unix epoch, saturating to zero on clock skew.
pub fn now_epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
