//! Drain cycle and acknowledgement handling, independent of any runtime.
//!
//! [`SyncCore`] owns the dependency resolver and the dispatch tracker. It
//! never performs network calls itself: a drain returns the operations to
//! send, and the caller feeds each combined [`Outcome`] back through
//! [`SyncCore::acknowledge`].

use hashbrown::HashSet;
use tracing::{debug, info, warn};

use crate::{
    core::{
        migrate::{Migration, migrate},
        resolver::{DependencyResolver, Readiness, inject_remote_id},
        tracker::{DispatchStart, DispatchTracker},
    },
    op::{OpDraft, OpKind, Operation},
    persist::{LogStore, PersistResult},
    request::remote_id_from_creation_ack,
    runtime::events::SyncEvent,
    types::{LocalPlaylistId, RequestId, UNLOGGED_LOCAL_ID},
};

use super::traits::Outcome;

/// Counters for one drain cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Legacy rows rewritten in place.
    pub migrated: usize,
    /// Rows removed without being sent.
    pub discarded: usize,
    /// Operations handed out for dispatch.
    pub dispatched: usize,
    /// Dependents waiting on a playlist creation.
    pub queued: usize,
    /// Operations skipped because a dispatch is already outstanding.
    pub in_flight: usize,
}

/// Work produced by a drain or an acknowledgement.
#[derive(Debug, Default)]
pub struct Effects {
    /// Operations to send, each carrying its fresh request id.
    pub dispatch: Vec<Operation>,
    /// Events to publish, in order.
    pub events: Vec<SyncEvent>,
}

/// Result of [`SyncCore::drain`].
#[derive(Debug, Default)]
pub struct Drained {
    /// Cycle counters.
    pub report: DrainReport,
    /// Dispatches and events.
    pub effects: Effects,
}

/// Engine state that outlives a single drain cycle.
#[derive(Debug, Default)]
pub struct SyncCore {
    resolver: DependencyResolver,
    tracker: DispatchTracker,
    touched_kinds: HashSet<OpKind>,
    touched_playlists: HashSet<LocalPlaylistId>,
}

impl SyncCore {
    /// Core with nothing in flight or queued.
    pub fn new() -> Self {
        Self::default()
    }

    /// One full cycle: migrate, re-list, dispatch independents, then resolve
    /// dependents.
    pub fn drain<S: LogStore + ?Sized>(&mut self, store: &mut S) -> PersistResult<Drained> {
        let mut report = DrainReport::default();
        let mut effects = Effects::default();

        for op in store.list_all()? {
            if self.tracker.is_in_flight(op.local_id) || self.resolver.is_queued(op.local_id) {
                continue;
            }
            match migrate(&op) {
                Migration::Unchanged => {}
                Migration::Migrated(draft) => {
                    let replacement = store.replace(&op, draft)?;
                    debug!(
                        local_id = replacement.local_id,
                        from = ?op.kind,
                        kind = ?replacement.kind,
                        "migrated legacy operation"
                    );
                    report.migrated += 1;
                }
                Migration::Discarded(reason) => {
                    store.remove_all(std::slice::from_ref(&op))?;
                    warn!(local_id = op.local_id, kind = ?op.kind, %reason, "discarding legacy operation");
                    report.discarded += 1;
                }
            }
        }

        let ops = store.list_all()?;
        let creations_in_log: HashSet<LocalPlaylistId> = ops
            .iter()
            .filter(|op| op.kind == OpKind::CreatePlaylist)
            .filter_map(|op| op.params.local_playlist_id.clone())
            .collect();
        let (dependents, independents): (Vec<Operation>, Vec<Operation>) =
            ops.into_iter().partition(Operation::is_dependent);

        for op in independents {
            if self.tracker.is_in_flight(op.local_id) {
                report.in_flight += 1;
                continue;
            }
            if let Some(sent) = self.begin(&*store, op)? {
                effects.dispatch.push(sent);
            }
        }

        for mut op in dependents {
            if self.tracker.is_in_flight(op.local_id) {
                report.in_flight += 1;
                continue;
            }
            if self.resolver.is_queued(op.local_id) {
                report.queued += 1;
                continue;
            }
            match self.resolver.classify(&op, &*store, &creations_in_log)? {
                Readiness::Ready(remote) => {
                    if let Some(remote) = remote {
                        if let Err(err) = inject_remote_id(&mut op, &remote) {
                            warn!(local_id = op.local_id, error = %err, "dropping operation whose body cannot take a playlist id");
                            self.remove(store, std::slice::from_ref(&op))?;
                            report.discarded += 1;
                            continue;
                        }
                    }
                    if let Some(sent) = self.begin(&*store, op)? {
                        effects.dispatch.push(sent);
                    }
                }
                Readiness::Blocked => {
                    debug!(
                        local_id = op.local_id,
                        local_playlist_id = ?op.params.local_playlist_id,
                        "waiting on playlist creation"
                    );
                    self.resolver.enqueue(op);
                    report.queued += 1;
                }
                Readiness::Orphaned => {
                    debug!(
                        local_id = op.local_id,
                        local_playlist_id = ?op.params.local_playlist_id,
                        "dropping dependent with no playlist to resolve against"
                    );
                    self.remove(store, std::slice::from_ref(&op))?;
                    report.discarded += 1;
                }
            }
        }

        report.dispatched = effects.dispatch.len();
        self.check_emptied(&*store, &mut effects.events)?;
        Ok(Drained { report, effects })
    }

    /// Applies the combined outcome of `request_id`. Unknown or stale ids
    /// produce no effects.
    pub fn acknowledge<S: LogStore + ?Sized>(
        &mut self,
        store: &mut S,
        request_id: RequestId,
        outcome: Outcome,
    ) -> PersistResult<Effects> {
        let mut effects = Effects::default();
        let Some(op) = self.tracker.complete(&request_id) else {
            debug!(%request_id, "ignoring acknowledgement for unknown request");
            return Ok(effects);
        };

        let success = if op.local_id == UNLOGGED_LOCAL_ID {
            if let Outcome::Failed(reason) | Outcome::Rejected(reason) = &outcome {
                debug!(%request_id, kind = ?op.kind, %reason, "unlogged dispatch not delivered");
            }
            outcome.is_success()
        } else {
            self.settle(store, &op, outcome, &mut effects)?
        };

        effects.events.push(SyncEvent::OperationResult {
            request_id,
            local_id: op.local_id,
            kind: op.kind,
            success,
        });
        self.check_emptied(&*store, &mut effects.events)?;
        Ok(effects)
    }

    /// Tracks a dispatch that is never written to the log.
    pub fn begin_unlogged(&mut self, draft: OpDraft) -> Option<Operation> {
        match self
            .tracker
            .try_begin_dispatch(Operation::from_draft(UNLOGGED_LOCAL_ID, draft))
        {
            DispatchStart::Accepted(op) => Some(op),
            DispatchStart::AlreadyInFlight => None,
        }
    }

    /// Gives up on creating `local_playlist_id`: drops its queued dependents
    /// and every idle creation or dependent for it still in the log.
    pub fn creation_failed<S: LogStore + ?Sized>(
        &mut self,
        store: &mut S,
        local_playlist_id: &str,
    ) -> PersistResult<Vec<SyncEvent>> {
        let mut events = Vec::new();
        self.abandon_playlist(store, local_playlist_id)?;
        self.check_emptied(&*store, &mut events)?;
        Ok(events)
    }

    /// Outstanding dispatches.
    pub fn in_flight_len(&self) -> usize {
        self.tracker.in_flight_len()
    }

    /// Dependents parked behind a playlist creation.
    pub fn queued_len(&self) -> usize {
        self.resolver.queued_len()
    }

    fn settle<S: LogStore + ?Sized>(
        &mut self,
        store: &mut S,
        op: &Operation,
        outcome: Outcome,
        effects: &mut Effects,
    ) -> PersistResult<bool> {
        let creation = match op.kind {
            OpKind::CreatePlaylist => op.params.local_playlist_id.clone(),
            _ => None,
        };

        match outcome {
            Outcome::Acknowledged(payload) => {
                let Some(local) = creation else {
                    self.remove(store, std::slice::from_ref(op))?;
                    return Ok(true);
                };
                let Some(remote) = payload.as_ref().and_then(remote_id_from_creation_ack) else {
                    warn!(
                        local_id = op.local_id,
                        local_playlist_id = %local,
                        "creation acknowledged without a playlist id, will retry"
                    );
                    self.resolver.creation_interrupted(&local);
                    return Ok(false);
                };

                store.record_remote_id(&local, &remote)?;
                self.remove(store, std::slice::from_ref(op))?;
                info!(local_playlist_id = %local, remote_id = %remote, "playlist created remotely");

                // In-flight creations stay in the log until settled, so this
                // covers both dispatched and idle ones.
                let another_creation = store.list_all()?.iter().any(|other| {
                    other.kind == OpKind::CreatePlaylist && other.local_playlist_id() == Some(local.as_str())
                });
                if another_creation {
                    debug!(local_playlist_id = %local, "holding dependents for another creation");
                    self.resolver.creation_interrupted(&local);
                    return Ok(true);
                }

                let release = self.resolver.on_creation_acknowledged(&local, &remote);
                if !release.unsendable.is_empty() {
                    warn!(
                        count = release.unsendable.len(),
                        local_playlist_id = %local,
                        "dropping dependents whose body cannot take a playlist id"
                    );
                    self.remove(store, &release.unsendable)?;
                }
                for ready in release.ready {
                    if let Some(sent) = self.begin(&*store, ready)? {
                        effects.dispatch.push(sent);
                    }
                }
                Ok(true)
            }
            Outcome::Failed(reason) => {
                warn!(local_id = op.local_id, kind = ?op.kind, %reason, "dispatch failed, keeping operation");
                if let Some(local) = creation {
                    self.resolver.creation_interrupted(&local);
                }
                Ok(false)
            }
            Outcome::Rejected(reason) => {
                warn!(local_id = op.local_id, kind = ?op.kind, %reason, "operation rejected, dropping it");
                self.remove(store, std::slice::from_ref(op))?;
                if let Some(local) = creation {
                    self.abandon_playlist(store, &local)?;
                }
                Ok(false)
            }
        }
    }

    fn begin<S: LogStore + ?Sized>(
        &mut self,
        store: &S,
        mut op: Operation,
    ) -> PersistResult<Option<Operation>> {
        if op.kind == OpKind::DeletePlaylistEntry && op.params.remote_playlist_id.is_none() {
            let remote = match op.local_playlist_id() {
                Some(local) => store.lookup_remote_id(local)?,
                None => None,
            };
            op.params.remote_playlist_id = remote;
        }
        let creation = match op.kind {
            OpKind::CreatePlaylist => op.params.local_playlist_id.clone(),
            _ => None,
        };

        match self.tracker.try_begin_dispatch(op) {
            DispatchStart::Accepted(op) => {
                if let Some(local) = creation {
                    self.resolver.creation_dispatched(&local);
                }
                debug!(local_id = op.local_id, request_id = ?op.request_id, kind = ?op.kind, "dispatching");
                Ok(Some(op))
            }
            DispatchStart::AlreadyInFlight => Ok(None),
        }
    }

    fn abandon_playlist<S: LogStore + ?Sized>(
        &mut self,
        store: &mut S,
        local_playlist_id: &str,
    ) -> PersistResult<()> {
        let mut doomed = self.resolver.on_creation_failed_permanently(local_playlist_id);
        for op in store.list_all()? {
            if op.local_playlist_id() != Some(local_playlist_id) || self.tracker.is_in_flight(op.local_id) {
                continue;
            }
            let governed = op.is_dependent() || op.kind == OpKind::CreatePlaylist;
            if governed && !doomed.iter().any(|d| d.local_id == op.local_id) {
                doomed.push(op);
            }
        }
        if doomed.is_empty() {
            return Ok(());
        }
        debug!(
            count = doomed.len(),
            local_playlist_id,
            "dropping operations for a playlist that will never be created"
        );
        self.remove(store, &doomed)?;
        Ok(())
    }

    fn remove<S: LogStore + ?Sized>(&mut self, store: &mut S, ops: &[Operation]) -> PersistResult<usize> {
        let removed = store.remove_all(ops)?;
        for op in ops {
            self.touched_kinds.insert(op.kind);
            if let Some(local) = &op.params.local_playlist_id {
                self.touched_playlists.insert(local.clone());
            }
        }
        Ok(removed)
    }

    fn check_emptied<S: LogStore + ?Sized>(
        &mut self,
        store: &S,
        events: &mut Vec<SyncEvent>,
    ) -> PersistResult<()> {
        if self.touched_kinds.is_empty() || store.count()? != 0 {
            return Ok(());
        }
        let kinds = std::mem::take(&mut self.touched_kinds);
        let playlist_ids = std::mem::take(&mut self.touched_playlists);
        info!(kinds = kinds.len(), playlists = playlist_ids.len(), "operation log drained");
        events.push(SyncEvent::LogEmptied { kinds, playlist_ids });
        Ok(())
    }
}
