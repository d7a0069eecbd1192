//! Request bodies sent to the metadata service, and draft builders for each
//! mutation the application can log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    op::{OpDraft, OpKind, OpParams},
    types::{RemoteId, now_epoch_secs},
};

/// Relationship type for following a user.
pub const RELATIONSHIP_TYPE_FOLLOW: &str = "follow";
/// Relationship type for loving a track, artist or album.
pub const RELATIONSHIP_TYPE_LOVE: &str = "love";

const UNKNOWN_ARTIST: &str = "Unknown Artist";
const UNKNOWN_TITLE: &str = "Unknown Title";

/// Track reference as the application knows it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct TrackRef {
    /// Track title.
    pub track: String,
    /// Artist name.
    pub artist: String,
    /// Album name, empty when unknown.
    pub album: String,
}

impl TrackRef {
    /// Convenience constructor.
    pub fn new(track: impl Into<String>, artist: impl Into<String>, album: impl Into<String>) -> Self {
        Self {
            track: track.into(),
            artist: artist.into(),
            album: album.into(),
        }
    }
}

/// `{"playlist": {...}}` body of a playlist creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistPost {
    /// Playlist to create.
    pub playlist: PlaylistRequest,
}

/// Playlist attributes sent on creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistRequest {
    /// Display title.
    pub title: String,
}

/// Batched entries body. `playlist` is injected once the remote id is known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistEntriesPost {
    /// Remote playlist id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playlist: Option<RemoteId>,
    /// Entries to append, in order.
    pub playlist_entries: Vec<PlaylistEntryRequest>,
}

/// One entry inside [`PlaylistEntriesPost`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistEntryRequest {
    /// Track title.
    #[serde(default)]
    pub track_string: String,
    /// Artist name.
    #[serde(default)]
    pub artist_string: String,
    /// Album name.
    #[serde(default)]
    pub album_string: String,
}

impl From<&TrackRef> for PlaylistEntryRequest {
    fn from(track: &TrackRef) -> Self {
        Self {
            track_string: track.track.clone(),
            artist_string: track.artist.clone(),
            album_string: track.album.clone(),
        }
    }
}

/// Scrobble / now-playing body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackLogPost {
    /// The logged play.
    pub playback_log_entry: PlaybackLogEntry,
}

/// Single playback log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackLogEntry {
    /// Track title.
    pub track_string: String,
    /// Artist name.
    pub artist_string: String,
    /// Album name.
    pub album_string: String,
    /// When the play happened.
    pub timestamp: DateTime<Utc>,
    /// `"nowplaying"` for now-playing notices, absent for scrobbles.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub entry_type: Option<String>,
}

impl PlaybackLogEntry {
    fn from_track(track: &TrackRef, timestamp: DateTime<Utc>, entry_type: Option<&str>) -> Self {
        Self {
            track_string: or_default(&track.track, UNKNOWN_TITLE),
            artist_string: or_default(&track.artist, UNKNOWN_ARTIST),
            album_string: track.album.clone(),
            timestamp,
            entry_type: entry_type.map(str::to_string),
        }
    }
}

/// `{"relationship": {...}}` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipPost {
    /// The relationship to create.
    pub relationship: RelationshipRequest,
}

/// Relationship target and type. Exactly one target shape is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipRequest {
    /// Followed user id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_user: Option<String>,
    /// Loved track title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_track_string: Option<String>,
    /// Artist of the loved item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_artist_string: Option<String>,
    /// Loved album name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_album_string: Option<String>,
    /// [`RELATIONSHIP_TYPE_FOLLOW`] or [`RELATIONSHIP_TYPE_LOVE`].
    #[serde(rename = "type")]
    pub relationship_type: String,
}

/// What a relationship points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationshipTarget {
    /// Follow a user.
    User(String),
    /// Love a track.
    Track {
        /// Track title.
        track: String,
        /// Artist name.
        artist: String,
    },
    /// Love an artist.
    Artist(String),
    /// Love an album.
    Album {
        /// Artist name.
        artist: String,
        /// Album name.
        album: String,
    },
}

impl RelationshipRequest {
    /// Builds the request for `target`.
    pub fn for_target(target: RelationshipTarget) -> Self {
        let mut req = Self {
            target_user: None,
            target_track_string: None,
            target_artist_string: None,
            target_album_string: None,
            relationship_type: RELATIONSHIP_TYPE_LOVE.to_string(),
        };
        match target {
            RelationshipTarget::User(user) => {
                req.target_user = Some(user);
                req.relationship_type = RELATIONSHIP_TYPE_FOLLOW.to_string();
            }
            RelationshipTarget::Track { track, artist } => {
                req.target_track_string = Some(track);
                req.target_artist_string = Some(artist);
            }
            RelationshipTarget::Artist(artist) => {
                req.target_artist_string = Some(artist);
            }
            RelationshipTarget::Album { artist, album } => {
                req.target_artist_string = Some(artist);
                req.target_album_string = Some(album);
            }
        }
        req
    }
}

impl OpDraft {
    fn new(kind: OpKind, params: OpParams, payload: Option<String>) -> Self {
        Self {
            kind,
            verb: kind.canonical_verb(),
            params,
            payload,
            created_at_epoch_secs: now_epoch_secs(),
            background: false,
        }
    }

    /// Creates `local_playlist_id` remotely with `title`.
    pub fn create_playlist(
        local_playlist_id: impl Into<String>,
        title: impl Into<String>,
    ) -> Result<Self, serde_json::Error> {
        let body = PlaylistPost {
            playlist: PlaylistRequest { title: title.into() },
        };
        Ok(Self::new(
            OpKind::CreatePlaylist,
            OpParams {
                local_playlist_id: Some(local_playlist_id.into()),
                ..OpParams::default()
            },
            Some(serde_json::to_string(&body)?),
        ))
    }

    /// Deletes the remote counterpart of `local_playlist_id`.
    pub fn delete_playlist(local_playlist_id: impl Into<String>) -> Self {
        Self::new(
            OpKind::DeletePlaylist,
            OpParams {
                local_playlist_id: Some(local_playlist_id.into()),
                ..OpParams::default()
            },
            None,
        )
    }

    /// Appends `tracks` to the playlist in one request.
    pub fn add_playlist_entries(
        local_playlist_id: impl Into<String>,
        tracks: &[TrackRef],
    ) -> Result<Self, serde_json::Error> {
        let body = PlaylistEntriesPost {
            playlist: None,
            playlist_entries: tracks.iter().map(PlaylistEntryRequest::from).collect(),
        };
        Ok(Self::new(
            OpKind::AddPlaylistEntries,
            OpParams {
                local_playlist_id: Some(local_playlist_id.into()),
                ..OpParams::default()
            },
            Some(serde_json::to_string(&body)?),
        ))
    }

    /// Removes `entry_id` from the playlist.
    pub fn delete_playlist_entry(
        local_playlist_id: impl Into<String>,
        entry_id: impl Into<String>,
    ) -> Self {
        Self::new(
            OpKind::DeletePlaylistEntry,
            OpParams {
                local_playlist_id: Some(local_playlist_id.into()),
                entry_id: Some(entry_id.into()),
                ..OpParams::default()
            },
            None,
        )
    }

    /// Scrobbles a finished play at `played_at`.
    pub fn playback_record(track: &TrackRef, played_at: DateTime<Utc>) -> Result<Self, serde_json::Error> {
        let body = PlaybackLogPost {
            playback_log_entry: PlaybackLogEntry::from_track(track, played_at, None),
        };
        let mut draft = Self::new(
            OpKind::PostPlaybackRecord,
            OpParams::default(),
            Some(serde_json::to_string(&body)?),
        );
        draft.created_at_epoch_secs = u64::try_from(played_at.timestamp()).unwrap_or(0);
        draft.background = true;
        Ok(draft)
    }

    /// Now-playing notice for `track`.
    pub fn now_playing(track: &TrackRef, started_at: DateTime<Utc>) -> Result<Self, serde_json::Error> {
        let body = PlaybackLogPost {
            playback_log_entry: PlaybackLogEntry::from_track(track, started_at, Some("nowplaying")),
        };
        Ok(Self::new(
            OpKind::PostNowPlaying,
            OpParams::default(),
            Some(serde_json::to_string(&body)?),
        ))
    }

    /// Loves an item or follows a user.
    pub fn post_relationship(target: RelationshipTarget) -> Result<Self, serde_json::Error> {
        let body = RelationshipPost {
            relationship: RelationshipRequest::for_target(target),
        };
        Ok(Self::new(
            OpKind::PostRelationship,
            OpParams::default(),
            Some(serde_json::to_string(&body)?),
        ))
    }

    /// Removes a relationship by its remote id.
    pub fn delete_relationship(relationship_id: impl Into<String>) -> Self {
        Self::new(
            OpKind::DeleteRelationship,
            OpParams {
                relationship_id: Some(relationship_id.into()),
                ..OpParams::default()
            },
            None,
        )
    }
}

/// Pulls the new playlist id out of a creation acknowledgement.
///
/// The service answers `{"playlists": [{"id": ...}]}`; the id may be a string
/// or a number.
pub fn remote_id_from_creation_ack(payload: &Value) -> Option<RemoteId> {
    let id = payload.get("playlists")?.as_array()?.first()?.get("id")?;
    match id {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn or_default(value: &str, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entries_body_omits_playlist_until_injected() {
        let draft = OpDraft::add_playlist_entries("L1", &[TrackRef::new("Song", "Band", "LP")])
            .expect("draft");
        let body: Value = serde_json::from_str(draft.payload.as_deref().unwrap_or("")).expect("json");
        assert!(body.get("playlist").is_none());
        assert_eq!(body["playlistEntries"][0]["trackString"], "Song");
        assert_eq!(draft.params.local_playlist_id.as_deref(), Some("L1"));
    }

    #[test]
    fn blank_scrobble_fields_fall_back() {
        let draft = OpDraft::playback_record(&TrackRef::new("", " ", "X"), Utc::now()).expect("draft");
        let body: Value = serde_json::from_str(draft.payload.as_deref().unwrap_or("")).expect("json");
        assert_eq!(body["playbackLogEntry"]["trackString"], UNKNOWN_TITLE);
        assert_eq!(body["playbackLogEntry"]["artistString"], UNKNOWN_ARTIST);
        assert!(body["playbackLogEntry"].get("type").is_none());
    }

    #[test]
    fn follow_and_love_pick_relationship_type() {
        let follow = RelationshipRequest::for_target(RelationshipTarget::User("u1".into()));
        assert_eq!(follow.relationship_type, RELATIONSHIP_TYPE_FOLLOW);
        let love = RelationshipRequest::for_target(RelationshipTarget::Artist("Band".into()));
        assert_eq!(love.relationship_type, RELATIONSHIP_TYPE_LOVE);
        assert_eq!(love.target_artist_string.as_deref(), Some("Band"));
    }

    #[test]
    fn creation_ack_accepts_string_or_number_ids() {
        assert_eq!(
            remote_id_from_creation_ack(&json!({"playlists": [{"id": "R1"}]})),
            Some("R1".to_string())
        );
        assert_eq!(
            remote_id_from_creation_ack(&json!({"playlists": [{"id": 42}]})),
            Some("42".to_string())
        );
        assert_eq!(remote_id_from_creation_ack(&json!({"playlists": []})), None);
        assert_eq!(remote_id_from_creation_ack(&json!({"ok": true})), None);
    }
}
