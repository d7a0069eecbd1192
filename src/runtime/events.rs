//! Completion events and the notifier that fans them out.

use hashbrown::HashSet;
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::warn;

use crate::{
    op::OpKind,
    types::{LocalId, LocalPlaylistId, RequestId},
};

/// Events emitted by the sync engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// One dispatch settled.
    OperationResult {
        /// Correlation id of the settled dispatch.
        request_id: RequestId,
        /// Log id, `0` for unlogged dispatches.
        local_id: LocalId,
        /// Kind of the settled operation.
        kind: OpKind,
        /// Whether the service acknowledged it.
        success: bool,
    },
    /// The log just became empty.
    LogEmptied {
        /// Kinds removed since the previous `LogEmptied`.
        kinds: HashSet<OpKind>,
        /// Local playlist ids touched since the previous `LogEmptied`.
        playlist_ids: HashSet<LocalPlaylistId>,
    },
}

/// Fire-and-forget broadcast of [`SyncEvent`]s. A subscriber that lags
/// behind loses the oldest events.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<SyncEvent>,
}

impl Notifier {
    /// Notifier buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publishes `event`; having no subscribers is not an error.
    pub fn publish(&self, event: SyncEvent) {
        let _ = self.tx.send(event);
    }

    /// New receiver that sees every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    /// Runs `handler` on a spawned task for every event. The handler runs on
    /// the runtime and must not block. Must be called from within a tokio
    /// runtime.
    pub fn subscribe_with<F>(&self, mut handler: F) -> JoinHandle<()>
    where
        F: FnMut(SyncEvent) + Send + 'static,
    {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => handler(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
