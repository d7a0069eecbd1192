//! In-memory [`LogStore`] whose clones share one log.

use std::sync::{Arc, Mutex, MutexGuard};

use hashbrown::{HashMap, HashSet};

use crate::{
    op::{OpDraft, Operation},
    types::{LocalId, RemoteId},
};

use super::{LogStore, PersistError, PersistResult};

#[derive(Debug, Default)]
struct Inner {
    ops: Vec<Operation>,
    remote_ids: HashMap<String, RemoteId>,
    next_local_id: LocalId,
}

/// Volatile store. Cloning yields another handle onto the same log, so a test
/// can hand one clone to the engine and inspect the other.
#[derive(Debug, Clone)]
pub struct MemoryLogStore {
    inner: Arc<Mutex<Inner>>,
}

impl Default for MemoryLogStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLogStore {
    /// Empty store; the first append gets local id 1.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                next_local_id: 1,
                ..Inner::default()
            })),
        }
    }

    /// Inserts an operation verbatim, as an older writer would have left it.
    /// The local id counter moves past `op.local_id`.
    pub fn seed(&self, op: Operation) -> PersistResult<()> {
        let mut inner = self.lock()?;
        if inner.ops.iter().any(|o| o.local_id == op.local_id) {
            return Err(PersistError::Message(format!(
                "local id {} already present",
                op.local_id
            )));
        }
        inner.next_local_id = inner.next_local_id.max(op.local_id.saturating_add(1));
        let pos = inner.ops.partition_point(|o| o.local_id < op.local_id);
        inner.ops.insert(pos, op);
        Ok(())
    }

    fn lock(&self) -> PersistResult<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| PersistError::Message("memory store lock poisoned".to_string()))
    }
}

impl LogStore for MemoryLogStore {
    fn append(&mut self, draft: OpDraft) -> PersistResult<Operation> {
        let mut inner = self.lock()?;
        let local_id = inner.next_local_id;
        inner.next_local_id += 1;
        let op = Operation::from_draft(local_id, draft);
        inner.ops.push(op.clone());
        Ok(op)
    }

    fn remove_all(&mut self, ops: &[Operation]) -> PersistResult<usize> {
        let ids: HashSet<LocalId> = ops.iter().map(|o| o.local_id).collect();
        let mut inner = self.lock()?;
        let before = inner.ops.len();
        inner.ops.retain(|o| !ids.contains(&o.local_id));
        Ok(before - inner.ops.len())
    }

    fn replace(&mut self, old: &Operation, draft: OpDraft) -> PersistResult<Operation> {
        let mut inner = self.lock()?;
        let Some(slot) = inner.ops.iter_mut().find(|o| o.local_id == old.local_id) else {
            return Err(PersistError::Message(format!(
                "local id {} is not in the log",
                old.local_id
            )));
        };
        *slot = Operation::from_draft(old.local_id, draft);
        Ok(slot.clone())
    }

    fn list_all(&self) -> PersistResult<Vec<Operation>> {
        Ok(self.lock()?.ops.clone())
    }

    fn count(&self) -> PersistResult<usize> {
        Ok(self.lock()?.ops.len())
    }

    fn record_remote_id(&mut self, local_playlist_id: &str, remote_id: &str) -> PersistResult<()> {
        self.lock()?
            .remote_ids
            .insert(local_playlist_id.to_string(), remote_id.to_string());
        Ok(())
    }

    fn lookup_remote_id(&self, local_playlist_id: &str) -> PersistResult<Option<RemoteId>> {
        Ok(self.lock()?.remote_ids.get(local_playlist_id).cloned())
    }
}
