use hashbrown::{HashMap, HashSet};
use serde_json::{Map, Value};

use crate::{
    op::{OpKind, Operation},
    persist::{LogStore, PersistResult},
    types::{LocalId, LocalPlaylistId, RemoteId, Verb},
};

use super::indices::PlaylistQueue;

/// Whether an operation can go out now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Dispatch now, injecting the remote playlist id when one is given.
    Ready(Option<RemoteId>),
    /// Waits for a playlist creation to be acknowledged.
    Blocked,
    /// Dependent whose playlist has no remote id and no creation to produce
    /// one. It can never be sent.
    Orphaned,
}

/// Dependents handed back after a creation settles.
#[derive(Debug, Default)]
pub struct Release {
    /// Injected and ready to dispatch, FIFO per playlist.
    pub ready: Vec<Operation>,
    /// Could not take the remote id (body was not a JSON object).
    pub unsendable: Vec<Operation>,
}

/// Tracks playlist creations in flight and the dependents waiting on them.
#[derive(Debug, Default)]
pub struct DependencyResolver {
    /// Outstanding CreatePlaylist dispatches per playlist.
    pending_creations: HashMap<LocalPlaylistId, usize>,
    queued: PlaylistQueue<Operation>,
    queued_ids: HashSet<LocalId>,
}

impl DependencyResolver {
    /// Resolver with nothing pending or queued.
    pub fn new() -> Self {
        Self::default()
    }

    /// `creations_in_log` holds the local playlist ids of every CreatePlaylist
    /// still in the log, dispatched or not.
    pub fn classify<S: LogStore + ?Sized>(
        &self,
        op: &Operation,
        store: &S,
        creations_in_log: &HashSet<LocalPlaylistId>,
    ) -> PersistResult<Readiness> {
        if !op.is_dependent() {
            return Ok(Readiness::Ready(None));
        }

        let Some(local) = op.local_playlist_id() else {
            return Ok(match &op.params.remote_playlist_id {
                Some(remote) => Readiness::Ready(Some(remote.clone())),
                None => Readiness::Orphaned,
            });
        };

        if self.is_pending(local) || creations_in_log.contains(local) {
            return Ok(Readiness::Blocked);
        }

        Ok(match store.lookup_remote_id(local)? {
            Some(remote) => Readiness::Ready(Some(remote)),
            None => Readiness::Orphaned,
        })
    }

    /// Records one more CreatePlaylist dispatch for `local_playlist_id`.
    pub fn creation_dispatched(&mut self, local_playlist_id: &str) {
        *self
            .pending_creations
            .entry(local_playlist_id.to_string())
            .or_default() += 1;
    }

    /// One creation settled without releasing anything: it failed and will
    /// be retried, or another creation for the playlist is still outstanding.
    /// Dependents stay queued.
    pub fn creation_interrupted(&mut self, local_playlist_id: &str) {
        if let Some(pending) = self.pending_creations.get_mut(local_playlist_id) {
            *pending -= 1;
            if *pending == 0 {
                self.pending_creations.remove(local_playlist_id);
            }
        }
    }

    /// True while any CreatePlaylist for `local_playlist_id` is in flight.
    pub fn is_pending(&self, local_playlist_id: &str) -> bool {
        self.pending_creations.contains_key(local_playlist_id)
    }

    /// True when `local_id` is parked behind a creation.
    pub fn is_queued(&self, local_id: LocalId) -> bool {
        self.queued_ids.contains(&local_id)
    }

    /// Number of parked dependents across all playlists.
    pub fn queued_len(&self) -> usize {
        self.queued_ids.len()
    }

    /// Parks a blocked dependent behind its playlist's creation.
    pub fn enqueue(&mut self, op: Operation) {
        let Some(local) = op.params.local_playlist_id.clone() else {
            return;
        };
        if self.queued_ids.insert(op.local_id) {
            self.queued.entry(local).or_default().push_back(op);
        }
    }

    /// Settles one acknowledged creation. Once no other creation for
    /// `local_playlist_id` is in flight, releases its dependents in enqueue
    /// order with `remote_id` injected.
    pub fn on_creation_acknowledged(&mut self, local_playlist_id: &str, remote_id: &str) -> Release {
        self.creation_interrupted(local_playlist_id);
        let mut release = Release::default();
        if self.is_pending(local_playlist_id) {
            return release;
        }
        for mut op in self.take_queue(local_playlist_id) {
            match inject_remote_id(&mut op, remote_id) {
                Ok(()) => release.ready.push(op),
                Err(_) => release.unsendable.push(op),
            }
        }
        release
    }

    /// Drops every dependent of `local_playlist_id`; the caller removes them
    /// from the log.
    pub fn on_creation_failed_permanently(&mut self, local_playlist_id: &str) -> Vec<Operation> {
        self.pending_creations.remove(local_playlist_id);
        self.take_queue(local_playlist_id)
    }

    fn take_queue(&mut self, local_playlist_id: &str) -> Vec<Operation> {
        let ops: Vec<Operation> = self
            .queued
            .remove(local_playlist_id)
            .map(Vec::from)
            .unwrap_or_default();
        for op in &ops {
            self.queued_ids.remove(&op.local_id);
        }
        ops
    }
}

/// Writes the remote playlist id where the remote call expects it: the
/// `playlist` body field for entry posts, `params.remote_playlist_id` for
/// everything else.
pub fn inject_remote_id(op: &mut Operation, remote_id: &str) -> Result<(), serde_json::Error> {
    match (op.kind, op.verb) {
        (OpKind::AddPlaylistEntries, Verb::Post) => {
            let mut body = match op.payload_json() {
                Some(parsed) => parsed?,
                None => Value::Object(Map::new()),
            };
            let Value::Object(map) = &mut body else {
                return Err(serde::de::Error::custom("entries body is not an object"));
            };
            map.insert("playlist".to_string(), Value::String(remote_id.to_string()));
            op.payload = Some(serde_json::to_string(&body)?);
        }
        _ => op.params.remote_playlist_id = Some(remote_id.to_string()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        op::OpDraft,
        persist::memory::MemoryLogStore,
        request::TrackRef,
    };

    fn entries(store: &mut MemoryLogStore, local: &str, track: &str) -> Operation {
        store
            .append(OpDraft::add_playlist_entries(local, &[TrackRef::new(track, "x", "y")]).expect("draft"))
            .expect("append")
    }

    #[test]
    fn independent_ops_are_always_ready() {
        let mut store = MemoryLogStore::new();
        let op = store
            .append(OpDraft::create_playlist("L1", "t").expect("draft"))
            .expect("append");
        let resolver = DependencyResolver::new();
        let creations: HashSet<String> = ["L1".to_string()].into_iter().collect();
        assert_eq!(
            resolver.classify(&op, &store, &creations).expect("classify"),
            Readiness::Ready(None)
        );
    }

    #[test]
    fn dependent_blocks_on_pending_or_logged_creation() {
        let mut store = MemoryLogStore::new();
        let op = entries(&mut store, "L1", "a");
        let mut resolver = DependencyResolver::new();

        let logged: HashSet<String> = ["L1".to_string()].into_iter().collect();
        assert_eq!(resolver.classify(&op, &store, &logged).expect("classify"), Readiness::Blocked);

        resolver.creation_dispatched("L1");
        assert_eq!(
            resolver.classify(&op, &store, &HashSet::new()).expect("classify"),
            Readiness::Blocked
        );
    }

    #[test]
    fn dependent_with_known_remote_id_is_ready() {
        let mut store = MemoryLogStore::new();
        store.record_remote_id("L1", "R1").expect("record");
        let op = entries(&mut store, "L1", "a");
        let resolver = DependencyResolver::new();
        assert_eq!(
            resolver.classify(&op, &store, &HashSet::new()).expect("classify"),
            Readiness::Ready(Some("R1".to_string()))
        );
    }

    #[test]
    fn dependent_without_any_creation_is_orphaned() {
        let mut store = MemoryLogStore::new();
        let op = store.append(OpDraft::delete_playlist("L9")).expect("append");
        let resolver = DependencyResolver::new();
        assert_eq!(
            resolver.classify(&op, &store, &HashSet::new()).expect("classify"),
            Readiness::Orphaned
        );
    }

    #[test]
    fn acknowledgement_releases_fifo_with_injection() {
        let mut store = MemoryLogStore::new();
        let first = entries(&mut store, "L1", "a");
        let other = entries(&mut store, "L2", "b");
        let delete = store.append(OpDraft::delete_playlist("L1")).expect("append");

        let mut resolver = DependencyResolver::new();
        resolver.creation_dispatched("L1");
        resolver.creation_dispatched("L2");
        resolver.enqueue(first.clone());
        resolver.enqueue(other.clone());
        resolver.enqueue(delete.clone());
        resolver.enqueue(first.clone());
        assert_eq!(resolver.queued_len(), 3);

        let release = resolver.on_creation_acknowledged("L1", "R1");
        assert!(release.unsendable.is_empty());
        let ids: Vec<LocalId> = release.ready.iter().map(|o| o.local_id).collect();
        assert_eq!(ids, vec![first.local_id, delete.local_id]);

        let body: Value = serde_json::from_str(release.ready[0].payload.as_deref().unwrap_or(""))
            .expect("json");
        assert_eq!(body["playlist"], "R1");
        assert_eq!(release.ready[1].params.remote_playlist_id.as_deref(), Some("R1"));

        assert!(!resolver.is_pending("L1"));
        assert!(resolver.is_pending("L2"));
        assert!(resolver.is_queued(other.local_id));
    }

    #[test]
    fn dependents_wait_for_every_creation_of_their_playlist() {
        let mut store = MemoryLogStore::new();
        let op = entries(&mut store, "L1", "a");
        let mut resolver = DependencyResolver::new();
        resolver.creation_dispatched("L1");
        resolver.creation_dispatched("L1");
        resolver.enqueue(op.clone());

        assert!(resolver.on_creation_acknowledged("L1", "R1").ready.is_empty());
        assert!(resolver.is_pending("L1"));
        assert!(resolver.is_queued(op.local_id));

        resolver.creation_interrupted("L1");
        assert!(!resolver.is_pending("L1"));
        assert!(resolver.is_queued(op.local_id));

        resolver.creation_dispatched("L1");
        let release = resolver.on_creation_acknowledged("L1", "R2");
        assert_eq!(release.ready.len(), 1);
        let body = release.ready[0].payload_json().expect("body").expect("json");
        assert_eq!(body["playlist"], "R2");
    }

    #[test]
    fn permanent_failure_drops_queued_dependents() {
        let mut store = MemoryLogStore::new();
        let op = entries(&mut store, "L9", "a");
        let mut resolver = DependencyResolver::new();
        resolver.creation_dispatched("L9");
        resolver.enqueue(op.clone());

        let dropped = resolver.on_creation_failed_permanently("L9");
        assert_eq!(dropped, vec![op.clone()]);
        assert!(!resolver.is_queued(op.local_id));
        assert!(!resolver.is_pending("L9"));
        assert!(resolver.on_creation_acknowledged("L9", "R9").ready.is_empty());
    }

    #[test]
    fn injection_rejects_non_object_bodies() {
        let mut store = MemoryLogStore::new();
        let mut op = entries(&mut store, "L1", "a");
        op.payload = Some("[1,2]".to_string());
        assert!(inject_remote_id(&mut op, "R1").is_err());
    }
}
