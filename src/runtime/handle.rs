use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::{
    sync::{Mutex, broadcast, mpsc, oneshot},
    task::{JoinHandle, JoinSet},
    time::{Duration, MissedTickBehavior},
};
use tracing::{debug, warn};

use crate::{
    engine::{
        drain::{DrainReport, Effects, SyncCore},
        traits::{Credentials, Outcome, RemoteChannel, combine_outcomes},
    },
    op::{OpDraft, Operation},
    persist::{LogStore, PersistError, PersistResult},
    request::{RelationshipTarget, TrackRef},
    types::{RemoteId, RequestId},
};

use super::{
    config::SyncConfig,
    events::{Notifier, SyncEvent},
};

/// Failure reported by a [`SyncHandle`] call.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The log store failed.
    #[error(transparent)]
    Persist(#[from] PersistError),
    /// The engine task has stopped.
    #[error("sync engine is not running")]
    ChannelClosed,
    /// A blocking store call panicked or was cancelled.
    #[error("store task failed: {0}")]
    Join(String),
}

/// Snapshot of the queue for "sync pending" indicators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStatus {
    /// Operations in the log.
    pub pending: usize,
    /// Dispatches awaiting an outcome, unlogged ones included.
    pub in_flight: usize,
    /// Dependents parked behind a playlist creation.
    pub queued: usize,
}

/// Cloneable front end to the engine task.
#[derive(Clone)]
pub struct SyncHandle {
    cmd_tx: mpsc::Sender<Command>,
    notifier: Notifier,
}

enum Command {
    Drain {
        credentials: Credentials,
        resp: oneshot::Sender<Result<DrainReport, RuntimeError>>,
    },
    Append {
        draft: OpDraft,
        resp: oneshot::Sender<Result<Operation, RuntimeError>>,
    },
    NowPlaying {
        track: TrackRef,
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
    RecordRemoteId {
        local_playlist_id: String,
        remote_id: RemoteId,
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
    LookupRemoteId {
        local_playlist_id: String,
        resp: oneshot::Sender<Result<Option<RemoteId>, RuntimeError>>,
    },
    CreationFailed {
        local_playlist_id: String,
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
    ListAll {
        resp: oneshot::Sender<Result<Vec<Operation>, RuntimeError>>,
    },
    Status {
        resp: oneshot::Sender<Result<SyncStatus, RuntimeError>>,
    },
    Completed {
        request_id: RequestId,
        outcome: Outcome,
    },
    Shutdown {
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
}

struct Engine {
    core: SyncCore,
    store: Box<dyn LogStore>,
}

type SharedEngine = Arc<Mutex<Engine>>;

struct Actor {
    engine: SharedEngine,
    channels: Arc<[Arc<dyn RemoteChannel>]>,
    notifier: Notifier,
    credentials: Option<Credentials>,
    now_playing: Option<(TrackRef, DateTime<Utc>)>,
    dispatch_timeout: Duration,
    cmd_tx: mpsc::WeakSender<Command>,
}

/// Starts the engine task over `store`, dispatching to every channel in
/// `channels`. Must be called from within a tokio runtime.
///
/// Nothing is sent until credentials arrive through
/// [`SyncHandle::trigger_drain`].
pub fn spawn_sync_engine(
    store: Box<dyn LogStore>,
    channels: Vec<Arc<dyn RemoteChannel>>,
    config: SyncConfig,
) -> SyncHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(config.command_queue_bound.max(1));
    let notifier = Notifier::new(config.event_capacity);

    let mut actor = Actor {
        engine: Arc::new(Mutex::new(Engine {
            core: SyncCore::new(),
            store,
        })),
        channels: channels.into(),
        notifier: notifier.clone(),
        credentials: None,
        now_playing: None,
        dispatch_timeout: Duration::from_millis(config.dispatch_timeout_ms),
        cmd_tx: cmd_tx.downgrade(),
    };

    tokio::spawn(async move {
        let mut ticker = (config.drain_interval_ms > 0).then(|| {
            let mut ticker = tokio::time::interval(Duration::from_millis(config.drain_interval_ms));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker
        });

        loop {
            let cmd = match ticker.as_mut() {
                Some(ticker) => tokio::select! {
                    cmd = cmd_rx.recv() => cmd,
                    _ = ticker.tick() => {
                        if let Err(err) = actor.drain().await {
                            warn!(error = %err, "periodic drain failed");
                        }
                        continue;
                    }
                },
                None => cmd_rx.recv().await,
            };
            let Some(cmd) = cmd else {
                break;
            };
            if actor.handle_command(cmd).await {
                break;
            }
        }
    });

    SyncHandle { cmd_tx, notifier }
}

impl SyncHandle {
    /// Receiver for every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.notifier.subscribe()
    }

    /// Runs `handler` for every event on a spawned task.
    pub fn subscribe_with<F>(&self, handler: F) -> JoinHandle<()>
    where
        F: FnMut(SyncEvent) + Send + 'static,
    {
        self.notifier.subscribe_with(handler)
    }

    /// Stores `credentials` for later drains and runs one drain cycle now.
    pub async fn trigger_drain(&self, credentials: Credentials) -> Result<DrainReport, RuntimeError> {
        self.request(|resp| Command::Drain { credentials, resp }).await
    }

    /// Logs `draft` and drains. The returned operation is durable even when
    /// the drain that follows fails.
    pub async fn log_operation(&self, draft: OpDraft) -> Result<Operation, RuntimeError> {
        self.request(|resp| Command::Append { draft, resp }).await
    }

    /// Logs the creation of local playlist `local_playlist_id`.
    pub async fn create_playlist(
        &self,
        local_playlist_id: impl Into<String>,
        title: impl Into<String>,
    ) -> Result<Operation, RuntimeError> {
        self.log_operation(encoded(OpDraft::create_playlist(local_playlist_id, title))?)
            .await
    }

    /// Appends `tracks` to a playlist, in order. Sent once the playlist
    /// exists remotely.
    pub async fn add_playlist_entries(
        &self,
        local_playlist_id: impl Into<String>,
        tracks: &[TrackRef],
    ) -> Result<Operation, RuntimeError> {
        self.log_operation(encoded(OpDraft::add_playlist_entries(local_playlist_id, tracks))?)
            .await
    }

    /// Deletes a playlist.
    pub async fn delete_playlist(&self, local_playlist_id: impl Into<String>) -> Result<Operation, RuntimeError> {
        self.log_operation(OpDraft::delete_playlist(local_playlist_id)).await
    }

    /// Removes one entry from a playlist.
    pub async fn delete_playlist_entry(
        &self,
        local_playlist_id: impl Into<String>,
        entry_id: impl Into<String>,
    ) -> Result<Operation, RuntimeError> {
        self.log_operation(OpDraft::delete_playlist_entry(local_playlist_id, entry_id))
            .await
    }

    /// Loves a track, artist or album. A [`RelationshipTarget::User`] target
    /// is a follow.
    pub async fn love(&self, target: RelationshipTarget) -> Result<Operation, RuntimeError> {
        self.log_operation(encoded(OpDraft::post_relationship(target))?).await
    }

    /// Follows `user`.
    pub async fn follow(&self, user: impl Into<String>) -> Result<Operation, RuntimeError> {
        self.love(RelationshipTarget::User(user.into())).await
    }

    /// Removes a love or follow by its remote relationship id.
    pub async fn delete_relationship(&self, relationship_id: impl Into<String>) -> Result<Operation, RuntimeError> {
        self.log_operation(OpDraft::delete_relationship(relationship_id)).await
    }

    /// Scrobbles `track` as played now.
    pub async fn scrobble(&self, track: &TrackRef) -> Result<Operation, RuntimeError> {
        self.log_operation(encoded(OpDraft::playback_record(track, Utc::now()))?)
            .await
    }

    /// Announces `track` without logging it. When it replaces a different
    /// track, that one is scrobbled.
    pub async fn now_playing(&self, track: TrackRef) -> Result<(), RuntimeError> {
        self.request(|resp| Command::NowPlaying { track, resp }).await
    }

    /// Registers a known mapping, e.g. for playlists fetched from the server.
    pub async fn record_remote_id(
        &self,
        local_playlist_id: impl Into<String>,
        remote_id: impl Into<RemoteId>,
    ) -> Result<(), RuntimeError> {
        let local_playlist_id = local_playlist_id.into();
        let remote_id = remote_id.into();
        self.request(|resp| Command::RecordRemoteId {
            local_playlist_id,
            remote_id,
            resp,
        })
        .await
    }

    /// Remote id recorded for `local_playlist_id`, if any.
    pub async fn lookup_remote_id(&self, local_playlist_id: impl Into<String>) -> Result<Option<RemoteId>, RuntimeError> {
        let local_playlist_id = local_playlist_id.into();
        self.request(|resp| Command::LookupRemoteId { local_playlist_id, resp })
            .await
    }

    /// Declares that `local_playlist_id` will never be created remotely. Its
    /// pending entries and deletions are dropped.
    pub async fn creation_failed(&self, local_playlist_id: impl Into<String>) -> Result<(), RuntimeError> {
        let local_playlist_id = local_playlist_id.into();
        self.request(|resp| Command::CreationFailed { local_playlist_id, resp })
            .await
    }

    /// Every operation still in the log, oldest first.
    pub async fn list_all(&self) -> Result<Vec<Operation>, RuntimeError> {
        self.request(|resp| Command::ListAll { resp }).await
    }

    /// Number of operations still in the log.
    pub async fn count(&self) -> Result<usize, RuntimeError> {
        Ok(self.status().await?.pending)
    }

    /// Pending, in-flight and queued counts.
    pub async fn status(&self) -> Result<SyncStatus, RuntimeError> {
        self.request(|resp| Command::Status { resp }).await
    }

    /// Flushes the store and stops the engine task. Outstanding dispatches
    /// are sent again after the next start.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        self.request(|resp| Command::Shutdown { resp }).await
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, RuntimeError>>) -> Command,
    ) -> Result<T, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }
}

fn encoded(draft: Result<OpDraft, serde_json::Error>) -> Result<OpDraft, RuntimeError> {
    draft.map_err(|err| RuntimeError::Persist(err.into()))
}

impl Actor {
    async fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Drain { credentials, resp } => {
                self.credentials = Some(credentials);
                let _ = resp.send(self.drain().await);
            }
            Command::Append { draft, resp } => {
                let _ = resp.send(self.append_and_drain(draft).await);
            }
            Command::NowPlaying { track, resp } => {
                let _ = resp.send(self.now_playing(track).await);
            }
            Command::RecordRemoteId {
                local_playlist_id,
                remote_id,
                resp,
            } => {
                let res = self
                    .with_engine(move |engine| engine.store.record_remote_id(&local_playlist_id, &remote_id))
                    .await;
                let _ = resp.send(res);
            }
            Command::LookupRemoteId { local_playlist_id, resp } => {
                let res = self
                    .with_engine(move |engine| engine.store.lookup_remote_id(&local_playlist_id))
                    .await;
                let _ = resp.send(res);
            }
            Command::CreationFailed { local_playlist_id, resp } => {
                let res = self
                    .with_engine(move |engine| {
                        let Engine { core, store } = engine;
                        core.creation_failed(store, &local_playlist_id)
                    })
                    .await
                    .map(|events| {
                        for event in events {
                            self.notifier.publish(event);
                        }
                    });
                let _ = resp.send(res);
            }
            Command::ListAll { resp } => {
                let _ = resp.send(self.with_engine(|engine| engine.store.list_all()).await);
            }
            Command::Status { resp } => {
                let res = self
                    .with_engine(|engine| {
                        Ok(SyncStatus {
                            pending: engine.store.count()?,
                            in_flight: engine.core.in_flight_len(),
                            queued: engine.core.queued_len(),
                        })
                    })
                    .await;
                let _ = resp.send(res);
            }
            Command::Completed { request_id, outcome } => {
                let res = self
                    .with_engine(move |engine| {
                        let Engine { core, store } = engine;
                        core.acknowledge(store, request_id, outcome)
                    })
                    .await;
                match res {
                    Ok(effects) => self.apply(effects),
                    Err(err) => warn!(%request_id, error = %err, "failed to apply outcome"),
                }
            }
            Command::Shutdown { resp } => {
                let res = self.with_engine(|engine| engine.store.flush()).await;
                let _ = resp.send(res);
                return true;
            }
        }

        false
    }

    async fn drain(&mut self) -> Result<DrainReport, RuntimeError> {
        if self.credentials.is_none() {
            debug!("no credentials yet, skipping drain");
            return Ok(DrainReport::default());
        }
        let drained = self
            .with_engine(|engine| {
                let Engine { core, store } = engine;
                core.drain(store)
            })
            .await?;
        self.apply(drained.effects);
        Ok(drained.report)
    }

    async fn append_and_drain(&mut self, draft: OpDraft) -> Result<Operation, RuntimeError> {
        let op = self.with_engine(move |engine| engine.store.append(draft)).await?;
        debug!(local_id = op.local_id, kind = ?op.kind, "logged operation");
        if let Err(err) = self.drain().await {
            warn!(error = %err, "drain after append failed");
        }
        Ok(op)
    }

    async fn now_playing(&mut self, track: TrackRef) -> Result<(), RuntimeError> {
        let now = Utc::now();
        let previous = match self.now_playing.take() {
            Some((previous, started_at)) if previous == track => {
                self.now_playing = Some((previous, started_at));
                None
            }
            Some(previous) => {
                self.now_playing = Some((track.clone(), now));
                Some(previous)
            }
            None => {
                self.now_playing = Some((track.clone(), now));
                None
            }
        };

        if let Some((previous, started_at)) = previous {
            self.append_and_drain(encoded(OpDraft::playback_record(&previous, started_at))?)
                .await?;
        }

        if self.credentials.is_none() {
            debug!("no credentials yet, not announcing now playing");
            return Ok(());
        }
        let draft = encoded(OpDraft::now_playing(&track, now))?;
        let op = self
            .with_engine(move |engine| Ok(engine.core.begin_unlogged(draft)))
            .await?;
        if let Some(op) = op {
            self.spawn_dispatch(op);
        }
        Ok(())
    }

    fn apply(&self, effects: Effects) {
        for op in effects.dispatch {
            self.spawn_dispatch(op);
        }
        for event in effects.events {
            self.notifier.publish(event);
        }
    }

    fn spawn_dispatch(&self, op: Operation) {
        let Some(request_id) = op.request_id else {
            return;
        };
        let Some(cmd_tx) = self.cmd_tx.upgrade() else {
            return;
        };
        let channels = Arc::clone(&self.channels);
        let credentials = self.credentials.clone().unwrap_or_default();
        let timeout = self.dispatch_timeout;

        tokio::spawn(async move {
            let op = Arc::new(op);
            let mut calls = JoinSet::new();
            for (index, channel) in channels.iter().enumerate() {
                let channel = Arc::clone(channel);
                let op = Arc::clone(&op);
                let credentials = credentials.clone();
                calls.spawn(async move {
                    let outcome = match tokio::time::timeout(timeout, channel.send(&op, &credentials)).await {
                        Ok(outcome) => outcome,
                        Err(_) => {
                            warn!(channel = channel.name(), local_id = op.local_id, "dispatch timed out");
                            Outcome::Failed(format!("{} timed out", channel.name()))
                        }
                    };
                    (index, outcome)
                });
            }

            let mut outcomes = Vec::with_capacity(channels.len());
            while let Some(joined) = calls.join_next().await {
                match joined {
                    Ok(pair) => outcomes.push(pair),
                    Err(err) => outcomes.push((usize::MAX, Outcome::Failed(format!("channel task failed: {err}")))),
                }
            }
            outcomes.sort_by_key(|(index, _)| *index);
            let outcome = combine_outcomes(outcomes.into_iter().map(|(_, outcome)| outcome));
            let _ = cmd_tx.send(Command::Completed { request_id, outcome }).await;
        });
    }

    async fn with_engine<T, F>(&self, f: F) -> Result<T, RuntimeError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Engine) -> PersistResult<T> + Send + 'static,
    {
        let engine = Arc::clone(&self.engine);
        tokio::task::spawn_blocking(move || {
            let mut engine = engine.blocking_lock();
            f(&mut *engine)
        })
        .await
        .map_err(|err| RuntimeError::Join(err.to_string()))?
        .map_err(RuntimeError::from)
    }
}
