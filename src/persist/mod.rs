//! Durable log abstraction and its implementations.

/// Shared in-memory store.
pub mod memory;
/// SQLite-backed durable store.
pub mod sqlite;

use crate::{
    op::{OpDraft, Operation},
    types::RemoteId,
};

/// Failure reported by a [`LogStore`].
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    /// SQLite failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Row payload could not be encoded or decoded.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    /// Anything else.
    #[error("{0}")]
    Message(String),
}

/// Result alias for store calls.
pub type PersistResult<T> = Result<T, PersistError>;

/// Crash-durable log of pending operations plus the playlist id mapping.
///
/// Only the sync engine calls into a store; observers never do.
pub trait LogStore: Send {
    /// Appends `draft`, assigning the next unused local id.
    fn append(&mut self, draft: OpDraft) -> PersistResult<Operation>;

    /// Removes every listed operation by local id. Missing ids are ignored.
    fn remove_all(&mut self, ops: &[Operation]) -> PersistResult<usize>;

    /// All pending operations in ascending local id order.
    fn list_all(&self) -> PersistResult<Vec<Operation>>;

    /// Number of pending operations.
    fn count(&self) -> PersistResult<usize>;

    /// Stores the remote id of a local playlist, replacing any previous one.
    fn record_remote_id(&mut self, local_playlist_id: &str, remote_id: &str) -> PersistResult<()>;

    /// Remote id of a local playlist, if one was recorded.
    fn lookup_remote_id(&self, local_playlist_id: &str) -> PersistResult<Option<RemoteId>>;

    /// Atomically removes `old` and writes `draft` in its place under the
    /// same local id, so the rewrite keeps its position in the log.
    fn replace(&mut self, old: &Operation, draft: OpDraft) -> PersistResult<Operation>;

    /// Forces buffered writes to disk.
    fn flush(&mut self) -> PersistResult<()> {
        Ok(())
    }
}

impl<S: LogStore + ?Sized> LogStore for Box<S> {
    fn append(&mut self, draft: OpDraft) -> PersistResult<Operation> {
        (**self).append(draft)
    }

    fn remove_all(&mut self, ops: &[Operation]) -> PersistResult<usize> {
        (**self).remove_all(ops)
    }

    fn list_all(&self) -> PersistResult<Vec<Operation>> {
        (**self).list_all()
    }

    fn count(&self) -> PersistResult<usize> {
        (**self).count()
    }

    fn record_remote_id(&mut self, local_playlist_id: &str, remote_id: &str) -> PersistResult<()> {
        (**self).record_remote_id(local_playlist_id, remote_id)
    }

    fn lookup_remote_id(&self, local_playlist_id: &str) -> PersistResult<Option<RemoteId>> {
        (**self).lookup_remote_id(local_playlist_id)
    }

    fn replace(&mut self, old: &Operation, draft: OpDraft) -> PersistResult<Operation> {
        (**self).replace(old, draft)
    }

    fn flush(&mut self) -> PersistResult<()> {
        (**self).flush()
    }
}
