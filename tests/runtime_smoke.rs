use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::broadcast;

use opsync::{
    engine::traits::{Credentials, Outcome, RemoteChannel},
    op::Operation,
    persist::memory::MemoryLogStore,
    request::TrackRef,
    runtime::{
        config::SyncConfig,
        events::SyncEvent,
        handle::{RuntimeError, SyncHandle, spawn_sync_engine},
    },
    types::LocalId,
};

struct FlakyChannel {
    online: AtomicBool,
    delay: Duration,
    sends: Mutex<Vec<LocalId>>,
}

impl FlakyChannel {
    fn new(online: bool, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            online: AtomicBool::new(online),
            delay,
            sends: Mutex::new(Vec::new()),
        })
    }

    fn sends(&self) -> Vec<LocalId> {
        self.sends.lock().expect("lock").clone()
    }
}

#[async_trait]
impl RemoteChannel for FlakyChannel {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn send(&self, op: &Operation, credentials: &Credentials) -> Outcome {
        tokio::time::sleep(self.delay).await;
        self.sends.lock().expect("lock").push(op.local_id);
        if credentials.access_token.is_none() || !self.online.load(Ordering::SeqCst) {
            return Outcome::Failed("offline".to_string());
        }
        Outcome::Acknowledged(None)
    }
}

fn spawn(store: &MemoryLogStore, channel: &Arc<FlakyChannel>, config: SyncConfig) -> SyncHandle {
    let channel: Arc<dyn RemoteChannel> = channel.clone();
    spawn_sync_engine(Box::new(store.clone()), vec![channel], config)
}

fn track(n: u32) -> TrackRef {
    TrackRef::new(format!("Song {n}"), "Band", "Record")
}

async fn wait_for_emptied(rx: &mut broadcast::Receiver<SyncEvent>) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let SyncEvent::LogEmptied { .. } = rx.recv().await.expect("event") {
                return;
            }
        }
    })
    .await
    .expect("log emptied in time");
}

#[tokio::test]
async fn concurrent_triggers_never_duplicate_a_dispatch() {
    let store = MemoryLogStore::new();
    let channel = FlakyChannel::new(true, Duration::from_millis(50));
    let handle = spawn(&store, &channel, SyncConfig::default());
    let mut rx = handle.subscribe();

    for n in 0..5 {
        handle.scrobble(&track(n)).await.expect("scrobble");
    }

    let mut triggers = Vec::new();
    for _ in 0..10 {
        let handle = handle.clone();
        triggers.push(tokio::spawn(async move {
            handle.trigger_drain(Credentials::bearer("token")).await
        }));
    }
    for trigger in triggers {
        trigger.await.expect("join").expect("drain");
    }

    wait_for_emptied(&mut rx).await;
    let mut sends = channel.sends();
    assert_eq!(sends.len(), 5);
    sends.sort_unstable();
    sends.dedup();
    assert_eq!(sends.len(), 5);
    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn failed_sends_stay_logged_until_a_later_drain() {
    let store = MemoryLogStore::new();
    let channel = FlakyChannel::new(false, Duration::ZERO);
    let handle = spawn(&store, &channel, SyncConfig::default());
    let mut rx = handle.subscribe();

    handle.trigger_drain(Credentials::bearer("token")).await.expect("drain");
    let op = handle.follow("user-1").await.expect("follow");

    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("event in time")
        .expect("event");
    assert!(matches!(
        event,
        SyncEvent::OperationResult { success: false, local_id, .. } if local_id == op.local_id
    ));
    assert_eq!(handle.count().await.expect("count"), 1);

    channel.online.store(true, Ordering::SeqCst);
    handle.trigger_drain(Credentials::bearer("token")).await.expect("drain");
    wait_for_emptied(&mut rx).await;
    assert_eq!(channel.sends(), vec![op.local_id, op.local_id]);
    assert_eq!(handle.count().await.expect("count"), 0);
    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn periodic_drain_delivers_without_another_trigger() {
    let store = MemoryLogStore::new();
    let channel = FlakyChannel::new(false, Duration::ZERO);
    let config = SyncConfig {
        drain_interval_ms: 20,
        ..SyncConfig::default()
    };
    let handle = spawn(&store, &channel, config);
    let mut rx = handle.subscribe();

    handle.trigger_drain(Credentials::bearer("token")).await.expect("drain");
    handle.delete_relationship("rel-9").await.expect("delete");
    channel.online.store(true, Ordering::SeqCst);

    wait_for_emptied(&mut rx).await;
    assert_eq!(handle.count().await.expect("count"), 0);
    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn slow_channel_times_out_and_keeps_the_operation() {
    let store = MemoryLogStore::new();
    let channel = FlakyChannel::new(true, Duration::from_secs(2));
    let config = SyncConfig {
        dispatch_timeout_ms: 20,
        ..SyncConfig::default()
    };
    let handle = spawn(&store, &channel, config);
    let mut rx = handle.subscribe();

    handle.trigger_drain(Credentials::bearer("token")).await.expect("drain");
    handle.scrobble(&track(1)).await.expect("scrobble");

    let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("event in time")
        .expect("event");
    assert!(matches!(event, SyncEvent::OperationResult { success: false, .. }));
    let status = handle.status().await.expect("status");
    assert_eq!(status.pending, 1);
    assert_eq!(status.in_flight, 0);
    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn handler_subscription_sees_results() {
    let store = MemoryLogStore::new();
    let channel = FlakyChannel::new(true, Duration::ZERO);
    let handle = spawn(&store, &channel, SyncConfig::default());
    let mut rx = handle.subscribe();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _task = handle.subscribe_with(move |event| {
        if let SyncEvent::OperationResult { success, .. } = event {
            sink.lock().expect("lock").push(success);
        }
    });

    handle.trigger_drain(Credentials::bearer("token")).await.expect("drain");
    handle.scrobble(&track(1)).await.expect("scrobble");
    wait_for_emptied(&mut rx).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(*seen.lock().expect("lock"), vec![true]);
    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn nothing_is_sent_before_credentials_arrive() {
    let store = MemoryLogStore::new();
    let channel = FlakyChannel::new(true, Duration::ZERO);
    let handle = spawn(&store, &channel, SyncConfig::default());

    handle.scrobble(&track(1)).await.expect("scrobble");
    handle.now_playing(track(2)).await.expect("now playing");
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(channel.sends().is_empty());
    assert_eq!(handle.count().await.expect("count"), 1);
    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn calls_after_shutdown_report_closed_channel() {
    let store = MemoryLogStore::new();
    let channel = FlakyChannel::new(true, Duration::ZERO);
    let handle = spawn(&store, &channel, SyncConfig::default());

    handle.shutdown().await.expect("shutdown");
    assert!(matches!(handle.count().await, Err(RuntimeError::ChannelClosed)));
}
