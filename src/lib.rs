//! Offline mutation queue and synchronization engine for a music client.
//!
//! Mutations are appended to a durable log before any network attempt and
//! replayed to the remote service once credentials and connectivity are
//! available. Entries added to a playlist wait until the playlist's creation
//! has been acknowledged and its remote id is known.
//!
//! # Examples
//!
//! Driving [`engine::drain::SyncCore`] by hand over an in-memory log:
//! ```
//! use opsync::{
//!     engine::{drain::SyncCore, traits::Outcome},
//!     op::OpDraft,
//!     persist::{LogStore, memory::MemoryLogStore},
//! };
//! use serde_json::json;
//!
//! let mut store = MemoryLogStore::new();
//! store.append(OpDraft::create_playlist("L1", "Mix").expect("draft")).expect("append");
//!
//! let mut core = SyncCore::new();
//! let drained = core.drain(&mut store).expect("drain");
//! let request_id = drained.effects.dispatch[0].request_id.expect("request id");
//!
//! let ack = Outcome::Acknowledged(Some(json!({"playlists": [{"id": "R1"}]})));
//! core.acknowledge(&mut store, request_id, ack).expect("ack");
//! assert_eq!(store.lookup_remote_id("L1").expect("lookup").as_deref(), Some("R1"));
//! assert_eq!(store.count().expect("count"), 0);
//! ```
//!
//! Runtime usage with the SQLite log:
//! ```no_run
//! use std::sync::Arc;
//!
//! use opsync::{
//!     engine::traits::{Credentials, Outcome, RemoteChannel},
//!     op::Operation,
//!     persist::sqlite::SqliteLogStore,
//!     runtime::{config::SyncConfig, handle::spawn_sync_engine},
//! };
//!
//! struct Offline;
//!
//! #[async_trait::async_trait]
//! impl RemoteChannel for Offline {
//!     fn name(&self) -> &str {
//!         "offline"
//!     }
//!
//!     async fn send(&self, _op: &Operation, _credentials: &Credentials) -> Outcome {
//!         Outcome::Failed("no network".to_string())
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let store = SqliteLogStore::open("oplog.db").expect("open sqlite");
//! let channel: Arc<dyn RemoteChannel> = Arc::new(Offline);
//! let handle = spawn_sync_engine(Box::new(store), vec![channel], SyncConfig::default());
//! handle.create_playlist("L1", "Mix").await.expect("create");
//! handle.trigger_drain(Credentials::bearer("token")).await.expect("drain");
//! handle.shutdown().await.expect("shutdown");
//! # }
//! ```
#![deny(missing_docs)]

/// Migration, dependency resolution and dispatch bookkeeping.
pub mod core;
/// Remote channel seam and the drain state machine.
pub mod engine;
/// Operation model and stored envelope.
pub mod op;
/// Log store abstraction with memory and SQLite implementations.
pub mod persist;
/// Request bodies and draft builders.
pub mod request;
/// Single-writer runtime handle, config and events.
pub mod runtime;
/// Shared identifier aliases and protocol enums.
pub mod types;
