//! SQLite-backed durable operation log.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, Transaction, params};
use tracing::warn;

use crate::{
    op::{OP_FORMAT_VERSION, OpDraft, Operation, StoredOpEnvelope},
    types::{LocalId, RemoteId},
};

use super::{LogStore, PersistError, PersistResult};

/// SQLite implementation of [`crate::persist::LogStore`].
///
/// Row ids come from `AUTOINCREMENT`, so a removed local id is never handed
/// out again, even across restarts.
pub struct SqliteLogStore {
    conn: Connection,
}

impl SqliteLogStore {
    /// Opens or creates a SQLite-backed log at `path`.
    ///
    /// Enables WAL mode and sets `synchronous=NORMAL`.
    pub fn open(path: impl AsRef<Path>) -> PersistResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_connection(conn)
    }

    /// Opens an in-memory SQLite log.
    pub fn open_in_memory() -> PersistResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(conn)
    }

    fn init_connection(conn: Connection) -> PersistResult<Self> {
        conn.execute_batch(include_str!("schema.sql"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(Self { conn })
    }

    /// Inserts `draft` under `local_id`, or under the next row id when `None`.
    fn insert_row(tx: &Transaction<'_>, local_id: Option<LocalId>, draft: OpDraft) -> PersistResult<Operation> {
        // The envelope's local id is a placeholder; the row id is authoritative.
        let placeholder = Operation::from_draft(0, draft);
        let payload = serde_json::to_vec(&StoredOpEnvelope::new(placeholder.clone()))?;
        tx.execute(
            "INSERT INTO oplog(local_id, kind, created_at, payload) VALUES (?1, ?2, ?3, ?4)",
            params![
                local_id.map(|id| id as i64),
                format!("{:?}", placeholder.kind),
                placeholder.created_at_epoch_secs as i64,
                payload,
            ],
        )?;
        let local_id = tx.last_insert_rowid() as LocalId;
        Ok(Operation {
            local_id,
            ..placeholder
        })
    }

    fn delete_rows(tx: &Transaction<'_>, ops: &[Operation]) -> PersistResult<usize> {
        let mut stmt = tx.prepare_cached("DELETE FROM oplog WHERE local_id = ?1")?;
        let mut removed = 0;
        for op in ops {
            removed += stmt.execute(params![op.local_id as i64])?;
        }
        Ok(removed)
    }
}

impl LogStore for SqliteLogStore {
    fn append(&mut self, draft: OpDraft) -> PersistResult<Operation> {
        let tx = self.conn.transaction()?;
        let op = Self::insert_row(&tx, None, draft)?;
        tx.commit()?;
        Ok(op)
    }

    fn remove_all(&mut self, ops: &[Operation]) -> PersistResult<usize> {
        if ops.is_empty() {
            return Ok(0);
        }
        let tx = self.conn.transaction()?;
        let removed = Self::delete_rows(&tx, ops)?;
        tx.commit()?;
        Ok(removed)
    }

    /// Rows that no longer decode are deleted here: nothing downstream could
    /// ever dispatch them. Rows from a newer format version are skipped but
    /// kept for the writer that understands them.
    fn list_all(&self) -> PersistResult<Vec<Operation>> {
        let raw: Vec<(LocalId, Vec<u8>)> = {
            let mut stmt = self
                .conn
                .prepare("SELECT local_id, payload FROM oplog ORDER BY local_id ASC")?;
            let rows = stmt.query_map([], |row| {
                let local_id: i64 = row.get(0)?;
                let payload: Vec<u8> = row.get(1)?;
                Ok((local_id as LocalId, payload))
            })?;
            rows.collect::<Result<_, _>>()?
        };

        let mut out = Vec::new();
        let mut undecodable = Vec::new();
        for (local_id, payload) in raw {
            match decode_operation_payload(&payload) {
                Ok(Decoded::Current(mut op)) => {
                    op.local_id = local_id;
                    out.push(op);
                }
                Ok(Decoded::Newer(format_version)) => {
                    warn!(local_id, format_version, "skipping oplog row from a newer format version");
                }
                Err(err) => {
                    warn!(local_id, %err, "discarding undecodable oplog row");
                    undecodable.push(local_id);
                }
            }
        }

        for local_id in undecodable {
            self.conn
                .execute("DELETE FROM oplog WHERE local_id = ?1", params![local_id as i64])?;
        }
        Ok(out)
    }

    fn count(&self) -> PersistResult<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM oplog", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    fn record_remote_id(&mut self, local_playlist_id: &str, remote_id: &str) -> PersistResult<()> {
        self.conn.execute(
            "INSERT INTO playlist_remote_ids(local_playlist_id, remote_id) VALUES (?1, ?2)
             ON CONFLICT(local_playlist_id) DO UPDATE SET remote_id = excluded.remote_id",
            params![local_playlist_id, remote_id],
        )?;
        Ok(())
    }

    fn lookup_remote_id(&self, local_playlist_id: &str) -> PersistResult<Option<RemoteId>> {
        let remote: Option<String> = self
            .conn
            .query_row(
                "SELECT remote_id FROM playlist_remote_ids WHERE local_playlist_id = ?1",
                params![local_playlist_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(remote)
    }

    fn replace(&mut self, old: &Operation, draft: OpDraft) -> PersistResult<Operation> {
        let tx = self.conn.transaction()?;
        if Self::delete_rows(&tx, std::slice::from_ref(old))? == 0 {
            return Err(PersistError::Message(format!(
                "local id {} is not in the log",
                old.local_id
            )));
        }
        let op = Self::insert_row(&tx, Some(old.local_id), draft)?;
        tx.commit()?;
        Ok(op)
    }

    fn flush(&mut self) -> PersistResult<()> {
        self.conn.execute_batch("PRAGMA wal_checkpoint(PASSIVE);")?;
        Ok(())
    }
}

enum Decoded {
    Current(Operation),
    Newer(u16),
}

#[derive(serde::Deserialize)]
struct VersionProbe {
    format_version: u16,
}

fn decode_operation_payload(payload: &[u8]) -> Result<Decoded, PersistError> {
    // A newer writer may have changed the op layout, so look at the version
    // before decoding the body.
    if let Ok(VersionProbe { format_version }) = serde_json::from_slice::<VersionProbe>(payload) {
        if format_version > OP_FORMAT_VERSION {
            return Ok(Decoded::Newer(format_version));
        }
    }
    if let Ok(envelope) = serde_json::from_slice::<StoredOpEnvelope>(payload) {
        return Ok(Decoded::Current(envelope.op));
    }

    // Backward-compatible path for rows that stored a bare Operation.
    Ok(Decoded::Current(serde_json::from_slice::<Operation>(payload)?))
}
