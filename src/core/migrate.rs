//! Legacy row migration.
//!
//! The log can hold rows written by every historical version of the writer, so
//! [`migrate`] runs on every drain cycle. It is a pure function of the
//! operation; the caller applies the verdict to the store.

use serde_json::{Map, Value};

use crate::{
    op::{OpDraft, OpKind, OpParams, Operation},
    request::{
        PlaylistEntriesPost, PlaylistEntryRequest, PlaylistPost, PlaylistRequest, RelationshipPost,
        RelationshipRequest, RELATIONSHIP_TYPE_LOVE,
    },
    types::Verb,
};

/// Verdict for one stored operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Migration {
    /// Replace the row with this current-schema draft.
    Migrated(OpDraft),
    /// Already current.
    Unchanged,
    /// Drop the row without replacement.
    Discarded(DiscardReason),
}

/// Why a row cannot be brought up to date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// An old "unlove" social action. Deleting the relationship needs its
    /// remote id, which was never recorded.
    UnrecoverableRelationship,
    /// The body is not the JSON shape any writer produced.
    MalformedPayload,
    /// A correlation field the remote call needs is absent.
    MissingCorrelation(&'static str),
}

impl std::fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnrecoverableRelationship => write!(f, "relationship id unrecoverable"),
            Self::MalformedPayload => write!(f, "malformed payload"),
            Self::MissingCorrelation(field) => write!(f, "missing {field}"),
        }
    }
}

/// Classifies `op` as current, rewritable, or unrecoverable.
pub fn migrate(op: &Operation) -> Migration {
    match op.kind {
        OpKind::PostSocialAction => migrate_social_action(op),
        OpKind::AddPlaylistEntries if op.verb == Verb::Delete => {
            retag(op, OpKind::DeletePlaylistEntry)
        }
        OpKind::AddPlaylistEntries => migrate_playlist_entries(op),
        OpKind::CreatePlaylist if op.verb == Verb::Delete => retag(op, OpKind::DeletePlaylist),
        OpKind::PostRelationship if op.verb == Verb::Delete => {
            retag(op, OpKind::DeleteRelationship)
        }
        OpKind::CreatePlaylist
        | OpKind::DeletePlaylist
        | OpKind::DeletePlaylistEntry
        | OpKind::DeleteRelationship
        | OpKind::PostRelationship
        | OpKind::PostPlaybackRecord
        | OpKind::PostNowPlaying => match missing_correlation(op.kind, &op.params) {
            Some(field) => Migration::Discarded(DiscardReason::MissingCorrelation(field)),
            None => Migration::Unchanged,
        },
    }
}

fn missing_correlation(kind: OpKind, params: &OpParams) -> Option<&'static str> {
    match kind {
        OpKind::CreatePlaylist | OpKind::AddPlaylistEntries => {
            params.local_playlist_id.is_none().then_some("local_playlist_id")
        }
        OpKind::DeletePlaylist => (params.local_playlist_id.is_none()
            && params.remote_playlist_id.is_none())
        .then_some("local_playlist_id"),
        OpKind::DeletePlaylistEntry => {
            if params.local_playlist_id.is_none() {
                Some("local_playlist_id")
            } else if params.entry_id.is_none() {
                Some("entry_id")
            } else {
                None
            }
        }
        OpKind::DeleteRelationship => params.relationship_id.is_none().then_some("relationship_id"),
        OpKind::PostPlaybackRecord
        | OpKind::PostNowPlaying
        | OpKind::PostRelationship
        | OpKind::PostSocialAction => None,
    }
}

fn rewritten(op: &Operation, kind: OpKind, params: OpParams, payload: Option<String>) -> Migration {
    if let Some(field) = missing_correlation(kind, &params) {
        return Migration::Discarded(DiscardReason::MissingCorrelation(field));
    }
    Migration::Migrated(OpDraft {
        kind,
        verb: kind.canonical_verb(),
        params,
        payload,
        created_at_epoch_secs: op.created_at_epoch_secs,
        background: op.background,
    })
}

/// Kind/verb pairs that disagree; the verb wins. Delete calls carry no body.
fn retag(op: &Operation, kind: OpKind) -> Migration {
    rewritten(op, kind, op.params.clone(), None)
}

fn body_object(op: &Operation) -> Option<Map<String, Value>> {
    match op.payload_json()? {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn string_field(obj: &Map<String, Value>, name: &str) -> Option<String> {
    match obj.get(name)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn migrate_social_action(op: &Operation) -> Migration {
    let Some(body) = body_object(op) else {
        return Migration::Discarded(DiscardReason::MalformedPayload);
    };
    let Some(Value::Object(action)) = body.get("socialAction") else {
        return Migration::Discarded(DiscardReason::MalformedPayload);
    };

    if string_field(action, "action").as_deref() != Some("true") {
        return Migration::Discarded(DiscardReason::UnrecoverableRelationship);
    }

    let relationship = RelationshipRequest {
        target_user: None,
        target_track_string: string_field(action, "trackString"),
        target_artist_string: string_field(action, "artistString"),
        target_album_string: string_field(action, "albumString"),
        relationship_type: RELATIONSHIP_TYPE_LOVE.to_string(),
    };
    match serde_json::to_string(&RelationshipPost { relationship }) {
        Ok(payload) => rewritten(op, OpKind::PostRelationship, OpParams::default(), Some(payload)),
        Err(_) => Migration::Discarded(DiscardReason::MalformedPayload),
    }
}

fn migrate_playlist_entries(op: &Operation) -> Migration {
    let Some(mut body) = body_object(op) else {
        return Migration::Discarded(DiscardReason::MalformedPayload);
    };

    if body.contains_key("playlistEntries") {
        return match missing_correlation(op.kind, &op.params) {
            Some(field) => Migration::Discarded(DiscardReason::MissingCorrelation(field)),
            None => Migration::Unchanged,
        };
    }

    // One entry per request, as written before batching existed.
    if let Some(entry) = body.remove("playlistEntry") {
        let Ok(entry) = serde_json::from_value::<PlaylistEntryRequest>(entry) else {
            return Migration::Discarded(DiscardReason::MalformedPayload);
        };
        let post = PlaylistEntriesPost {
            playlist: string_field(&body, "playlist"),
            playlist_entries: vec![entry],
        };
        return match serde_json::to_string(&post) {
            Ok(payload) => rewritten(op, OpKind::AddPlaylistEntries, op.params.clone(), Some(payload)),
            Err(_) => Migration::Discarded(DiscardReason::MalformedPayload),
        };
    }

    // A playlist object without entries is an old creation struct that was
    // logged under the entries type.
    if let Some(Value::Object(playlist)) = body.get("playlist") {
        let post = PlaylistPost {
            playlist: PlaylistRequest {
                title: string_field(playlist, "title").unwrap_or_default(),
            },
        };
        return match serde_json::to_string(&post) {
            Ok(payload) => rewritten(op, OpKind::CreatePlaylist, op.params.clone(), Some(payload)),
            Err(_) => Migration::Discarded(DiscardReason::MalformedPayload),
        };
    }

    Migration::Discarded(DiscardReason::MalformedPayload)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::request::TrackRef;

    fn stored(kind: OpKind, verb: Verb, params: OpParams, payload: Option<Value>) -> Operation {
        Operation::from_draft(
            7,
            OpDraft {
                kind,
                verb,
                params,
                payload: payload.map(|v| v.to_string()),
                created_at_epoch_secs: 1_400_000_000,
                background: false,
            },
        )
    }

    fn local(id: &str) -> OpParams {
        OpParams {
            local_playlist_id: Some(id.to_string()),
            ..OpParams::default()
        }
    }

    fn migrated(m: Migration) -> OpDraft {
        match m {
            Migration::Migrated(draft) => draft,
            other => panic!("expected a rewrite, got {other:?}"),
        }
    }

    #[test]
    fn loved_social_action_becomes_relationship() {
        let op = stored(
            OpKind::PostSocialAction,
            Verb::Post,
            OpParams::default(),
            Some(json!({"socialAction": {"action": "true", "trackString": "Song", "artistString": "Band"}})),
        );
        let draft = migrated(migrate(&op));
        assert_eq!(draft.kind, OpKind::PostRelationship);
        assert_eq!(draft.verb, Verb::Post);
        assert_eq!(draft.created_at_epoch_secs, 1_400_000_000);
        let body: Value = serde_json::from_str(draft.payload.as_deref().unwrap_or("")).expect("json");
        assert_eq!(body["relationship"]["type"], "love");
        assert_eq!(body["relationship"]["targetTrackString"], "Song");
        assert!(body["relationship"].get("targetAlbumString").is_none());
    }

    #[test]
    fn boolean_action_flag_is_accepted() {
        let op = stored(
            OpKind::PostSocialAction,
            Verb::Post,
            OpParams::default(),
            Some(json!({"socialAction": {"action": true, "artistString": "Band"}})),
        );
        assert_eq!(migrated(migrate(&op)).kind, OpKind::PostRelationship);
    }

    #[test]
    fn unlove_social_action_is_discarded() {
        let op = stored(
            OpKind::PostSocialAction,
            Verb::Post,
            OpParams::default(),
            Some(json!({"socialAction": {"action": "false", "trackString": "Song"}})),
        );
        assert_eq!(
            migrate(&op),
            Migration::Discarded(DiscardReason::UnrecoverableRelationship)
        );
    }

    #[test]
    fn garbage_social_action_is_discarded() {
        let mut op = stored(OpKind::PostSocialAction, Verb::Post, OpParams::default(), None);
        op.payload = Some("not json".to_string());
        assert_eq!(migrate(&op), Migration::Discarded(DiscardReason::MalformedPayload));
    }

    #[test]
    fn single_entry_wrapper_is_batched() {
        let op = stored(
            OpKind::AddPlaylistEntries,
            Verb::Post,
            local("L1"),
            Some(json!({"playlistEntry": {"trackString": "A", "artistString": "B", "albumString": "C"}})),
        );
        let draft = migrated(migrate(&op));
        assert_eq!(draft.kind, OpKind::AddPlaylistEntries);
        assert_eq!(draft.params.local_playlist_id.as_deref(), Some("L1"));
        let body: PlaylistEntriesPost =
            serde_json::from_str(draft.payload.as_deref().unwrap_or("")).expect("json");
        assert_eq!(body.playlist, None);
        assert_eq!(body.playlist_entries, vec![PlaylistEntryRequest::from(&TrackRef::new("A", "B", "C"))]);
    }

    #[test]
    fn playlist_struct_under_entries_type_becomes_creation() {
        let op = stored(
            OpKind::AddPlaylistEntries,
            Verb::Post,
            local("L2"),
            Some(json!({"playlist": {"title": "Road trip"}})),
        );
        let draft = migrated(migrate(&op));
        assert_eq!(draft.kind, OpKind::CreatePlaylist);
        let body: PlaylistPost = serde_json::from_str(draft.payload.as_deref().unwrap_or("")).expect("json");
        assert_eq!(body.playlist.title, "Road trip");
    }

    #[test]
    fn delete_verb_wins_over_post_kind() {
        let mut params = local("L3");
        params.entry_id = Some("e1".to_string());
        let op = stored(OpKind::AddPlaylistEntries, Verb::Delete, params, None);
        let draft = migrated(migrate(&op));
        assert_eq!(draft.kind, OpKind::DeletePlaylistEntry);
        assert_eq!(draft.verb, Verb::Delete);

        let op = stored(OpKind::CreatePlaylist, Verb::Delete, local("L3"), None);
        assert_eq!(migrated(migrate(&op)).kind, OpKind::DeletePlaylist);
    }

    #[test]
    fn missing_correlation_is_discarded() {
        let op = stored(OpKind::DeleteRelationship, Verb::Delete, OpParams::default(), None);
        assert_eq!(
            migrate(&op),
            Migration::Discarded(DiscardReason::MissingCorrelation("relationship_id"))
        );

        let op = stored(OpKind::PostRelationship, Verb::Delete, OpParams::default(), None);
        assert_eq!(
            migrate(&op),
            Migration::Discarded(DiscardReason::MissingCorrelation("relationship_id"))
        );
    }

    #[test]
    fn current_schema_is_unchanged_and_rewrites_are_stable() {
        let current = [
            OpDraft::create_playlist("L1", "Mix").expect("draft"),
            OpDraft::add_playlist_entries("L1", &[TrackRef::new("a", "b", "c")]).expect("draft"),
            OpDraft::delete_playlist("L1"),
            OpDraft::delete_playlist_entry("L1", "e"),
            OpDraft::delete_relationship("r"),
        ];
        for draft in current {
            let op = Operation::from_draft(1, draft);
            assert_eq!(migrate(&op), Migration::Unchanged);
            assert_eq!(migrate(&op), Migration::Unchanged);
        }

        let legacy = stored(
            OpKind::AddPlaylistEntries,
            Verb::Post,
            local("L1"),
            Some(json!({"playlistEntry": {"trackString": "A"}})),
        );
        let once = Operation::from_draft(8, migrated(migrate(&legacy)));
        assert_eq!(migrate(&once), Migration::Unchanged);
    }
}
