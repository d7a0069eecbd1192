//! Mutation operation model and persistence wrappers.

use serde::{Deserialize, Serialize};

use crate::types::{LocalId, RequestId, ResourceFamily, Verb};

/// Version number for serialized [`StoredOpEnvelope`] payloads.
pub const OP_FORMAT_VERSION: u16 = 1;

/// Closed set of remote mutations the log can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpKind {
    /// Create a playlist; acknowledged with its remote id.
    CreatePlaylist,
    /// Delete a playlist by remote id.
    DeletePlaylist,
    /// Append entries to a playlist.
    AddPlaylistEntries,
    /// Remove one entry from a playlist.
    DeletePlaylistEntry,
    /// Scrobble a finished play.
    PostPlaybackRecord,
    /// Announce the currently playing track.
    PostNowPlaying,
    /// Love an item or follow a user.
    PostRelationship,
    /// Remove a relationship by remote id.
    DeleteRelationship,
    /// Pre-relationship social action. Never written by this crate.
    PostSocialAction,
}

impl OpKind {
    /// Verb the current writer pairs with this kind.
    pub fn canonical_verb(self) -> Verb {
        match self {
            OpKind::CreatePlaylist
            | OpKind::AddPlaylistEntries
            | OpKind::PostPlaybackRecord
            | OpKind::PostNowPlaying
            | OpKind::PostRelationship
            | OpKind::PostSocialAction => Verb::Post,
            OpKind::DeletePlaylist | OpKind::DeletePlaylistEntry | OpKind::DeleteRelationship => {
                Verb::Delete
            }
        }
    }

    /// Remote resource family addressed by this kind.
    pub fn family(self) -> ResourceFamily {
        match self {
            OpKind::CreatePlaylist | OpKind::DeletePlaylist => ResourceFamily::Playlists,
            OpKind::AddPlaylistEntries | OpKind::DeletePlaylistEntry => {
                ResourceFamily::PlaylistEntries
            }
            OpKind::PostPlaybackRecord | OpKind::PostNowPlaying => ResourceFamily::PlaybackLog,
            OpKind::PostRelationship | OpKind::DeleteRelationship => ResourceFamily::Relationships,
            OpKind::PostSocialAction => ResourceFamily::SocialActions,
        }
    }
}

/// Sparse correlation fields. Exactly one subset is populated per kind.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OpParams {
    /// Client-side playlist id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_playlist_id: Option<String>,
    /// Server-side playlist id, filled in once known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_playlist_id: Option<String>,
    /// Playlist entry id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_id: Option<String>,
    /// Server-side relationship id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship_id: Option<String>,
    /// Pagination cursor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// Append payload used to create a new [`Operation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpDraft {
    /// Mutation kind.
    pub kind: OpKind,
    /// Remote verb.
    pub verb: Verb,
    /// Correlation fields.
    pub params: OpParams,
    /// Serialized JSON request body.
    pub payload: Option<String>,
    /// Creation timestamp in seconds.
    pub created_at_epoch_secs: u64,
    /// Scheduling hint for the transport.
    pub background: bool,
}

/// One queued remote mutation as held by the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// Store-assigned identifier, never reused.
    pub local_id: LocalId,
    /// Correlation id of the current dispatch attempt. Never persisted.
    #[serde(skip)]
    pub request_id: Option<RequestId>,
    /// Mutation kind.
    pub kind: OpKind,
    /// Remote verb.
    pub verb: Verb,
    /// Correlation fields.
    #[serde(default)]
    pub params: OpParams,
    /// Serialized JSON request body.
    #[serde(default)]
    pub payload: Option<String>,
    /// Creation timestamp in seconds.
    #[serde(default)]
    pub created_at_epoch_secs: u64,
    /// Scheduling hint for the transport.
    #[serde(default)]
    pub background: bool,
}

impl Operation {
    /// Materializes a draft under `local_id`.
    pub fn from_draft(local_id: LocalId, draft: OpDraft) -> Self {
        Self {
            local_id,
            request_id: None,
            kind: draft.kind,
            verb: draft.verb,
            params: draft.params,
            payload: draft.payload,
            created_at_epoch_secs: draft.created_at_epoch_secs,
            background: draft.background,
        }
    }

    /// Strips the identifiers back off.
    pub fn to_draft(&self) -> OpDraft {
        OpDraft {
            kind: self.kind,
            verb: self.verb,
            params: self.params.clone(),
            payload: self.payload.clone(),
            created_at_epoch_secs: self.created_at_epoch_secs,
            background: self.background,
        }
    }

    /// True when dispatch must wait for a playlist creation to be acknowledged.
    pub fn is_dependent(&self) -> bool {
        match self.kind {
            OpKind::AddPlaylistEntries => true,
            OpKind::DeletePlaylist => self.verb == Verb::Delete,
            OpKind::CreatePlaylist
            | OpKind::DeletePlaylistEntry
            | OpKind::PostPlaybackRecord
            | OpKind::PostNowPlaying
            | OpKind::PostRelationship
            | OpKind::DeleteRelationship
            | OpKind::PostSocialAction => false,
        }
    }

    /// Client-side playlist id, if any.
    pub fn local_playlist_id(&self) -> Option<&str> {
        self.params.local_playlist_id.as_deref()
    }

    /// Parses the body as JSON. `None` when the operation has no body.
    pub fn payload_json(&self) -> Option<Result<serde_json::Value, serde_json::Error>> {
        self.payload.as_deref().map(serde_json::from_str)
    }
}

/// Versioned wrapper for stable on-disk payload decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredOpEnvelope {
    /// Payload format version.
    pub format_version: u16,
    /// Wrapped operation.
    pub op: Operation,
}

impl StoredOpEnvelope {
    /// Constructs an envelope using [`OP_FORMAT_VERSION`].
    pub fn new(op: Operation) -> Self {
        Self {
            format_version: OP_FORMAT_VERSION,
            op,
        }
    }
}
