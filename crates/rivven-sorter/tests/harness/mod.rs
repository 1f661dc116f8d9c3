//! Test harness for sorter stage integration tests
//!
//! Provides a channel-backed mounter, event builders and helpers to collect
//! what a stage forwards in either dispatch mode.

#![allow(dead_code)]

use rivven_sorter::{
    ControlMessage, EventRef, FlowControlConfig, Mounter, NodeContext, PipelineMessage,
    PolymorphicEvent, RawKvEntry, SortEngine, SorterConfig, SorterError, SorterNode,
    TableMemoryFlowController, Ts,
};
use std::collections::HashMap;
use std::sync::{Arc, Once};
use std::time::Duration;
use parking_lot::Mutex;
use tokio::sync::mpsc;

static INIT: Once = Once::new();

/// Initialize test logging (idempotent)
pub fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive("rivven_sorter=debug".parse().unwrap()),
            )
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Default wait for anything the stage should produce
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Mounter that marks every event finished and counts deliveries per key.
pub struct CountingMounter {
    tx: mpsc::Sender<EventRef>,
    seen: Arc<Mutex<HashMap<(Vec<u8>, Ts), usize>>>,
}

impl CountingMounter {
    pub fn spawn() -> Arc<Self> {
        let (tx, mut rx) = mpsc::channel::<EventRef>(1024);
        let seen = Arc::new(Mutex::new(HashMap::new()));
        let counts = seen.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                *counts
                    .lock()
                    .entry((event.raw.key.to_vec(), event.commit_ts))
                    .or_insert(0) += 1;
                event.mark_finished();
            }
        });
        Arc::new(Self { tx, seen })
    }

    /// Deliveries per (key, commit ts).
    pub fn counts(&self) -> HashMap<(Vec<u8>, Ts), usize> {
        self.seen.lock().clone()
    }

    /// Total deliveries.
    pub fn total(&self) -> usize {
        self.seen.lock().values().sum()
    }

    /// Wait until `n` deliveries have been counted.
    pub async fn wait_for_total(&self, n: usize) {
        tokio::time::timeout(RECV_TIMEOUT, async {
            while self.total() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for mounter deliveries");
    }
}

impl Mounter for CountingMounter {
    fn input(&self) -> mpsc::Sender<EventRef> {
        self.tx.clone()
    }
}

/// Row event whose payload is `size` bytes in total.
pub fn put(key: &str, commit_ts: Ts, size: usize) -> PipelineMessage {
    let value = "v".repeat(size.saturating_sub(key.len()));
    let raw = RawKvEntry::put(key.to_string(), value, commit_ts.saturating_sub(1), commit_ts);
    PipelineMessage::event(PolymorphicEvent::new(raw).into_ref())
}

/// Resolved marker.
pub fn resolved(ts: Ts) -> PipelineMessage {
    PipelineMessage::event(PolymorphicEvent::resolved(ts).into_ref())
}

/// What a stage forwarded, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Forwarded {
    Row(String, Ts),
    Resolved(Ts),
    Other,
}

impl Forwarded {
    pub fn from_message(msg: &PipelineMessage) -> Self {
        match msg.as_event() {
            Some(e) if e.is_resolved() => Forwarded::Resolved(e.commit_ts),
            Some(e) => Forwarded::Row(String::from_utf8_lossy(&e.raw.key).into_owned(), e.commit_ts),
            None => Forwarded::Other,
        }
    }

    pub fn resolved_ts(&self) -> Option<Ts> {
        match self {
            Forwarded::Resolved(ts) => Some(*ts),
            _ => None,
        }
    }
}

/// Sorter config for tests.
pub fn test_config(engine: SortEngine) -> SorterConfig {
    SorterConfig::builder()
        .sort_engine(engine)
        .sort_dir(std::env::temp_dir().join("rivven_sorter_tests"))
        .changefeed_id(format!("test-{}", std::process::id()))
        .metrics_flush_interval(Duration::from_millis(50))
        .build()
}

/// A started legacy-mode stage and its pipeline channels.
pub struct LegacyStage {
    pub node: SorterNode,
    pub flow: Arc<TableMemoryFlowController>,
    pub mounter: Arc<CountingMounter>,
    pub next: mpsc::Receiver<PipelineMessage>,
    pub errors: mpsc::UnboundedReceiver<SorterError>,
}

impl LegacyStage {
    pub fn start(table_id: i64, config: SorterConfig, quota: u64) -> Self {
        let flow = Arc::new(
            TableMemoryFlowController::from_config(&FlowControlConfig::with_quota(quota)).unwrap(),
        );
        let mounter = CountingMounter::spawn();
        let node = SorterNode::new(
            format!("test.t{}", table_id),
            table_id,
            0,
            flow.clone(),
            mounter.clone(),
            config,
        );
        let (next_tx, next) = mpsc::channel(1024);
        let (err_tx, errors) = mpsc::unbounded_channel();
        node.start_legacy(NodeContext::new(next_tx, err_tx)).unwrap();
        Self {
            node,
            flow,
            mounter,
            next,
            errors,
        }
    }

    /// Receive the next forwarded message.
    pub async fn recv(&mut self) -> Forwarded {
        let msg = tokio::time::timeout(RECV_TIMEOUT, self.next.recv())
            .await
            .expect("timed out waiting for forwarded message")
            .expect("next node channel closed");
        Forwarded::from_message(&msg)
    }

    /// Receive until a resolved marker >= `ts` has been forwarded.
    pub async fn recv_until_resolved(&mut self, ts: Ts) -> Vec<Forwarded> {
        let mut out = Vec::new();
        loop {
            let f = self.recv().await;
            let done = matches!(f.resolved_ts(), Some(r) if r >= ts);
            out.push(f);
            if done {
                return out;
            }
        }
    }
}

/// Drain actor-mode output on every tick until a resolved marker >= `ts`.
pub async fn drain_actor_until_resolved(
    node: &SorterNode,
    mailbox: &mut mpsc::Receiver<ControlMessage>,
    ts: Ts,
) -> (Vec<Forwarded>, Vec<ControlMessage>) {
    let mut out = Vec::new();
    let mut controls = Vec::new();
    loop {
        while let Some(msg) = node.try_recv_processed() {
            let f = Forwarded::from_message(&msg);
            let done = matches!(f.resolved_ts(), Some(r) if r >= ts);
            out.push(f);
            if done {
                return (out, controls);
            }
        }
        let msg = tokio::time::timeout(RECV_TIMEOUT, mailbox.recv())
            .await
            .expect("timed out waiting for actor message")
            .expect("mailbox closed");
        controls.push(msg);
    }
}

/// Check that forwarded resolved markers never go backwards and every row
/// precedes the resolved marker covering it.
pub fn assert_resolved_order(forwarded: &[Forwarded]) {
    let mut last_resolved = 0;
    for f in forwarded {
        match f {
            Forwarded::Resolved(ts) => {
                assert!(
                    *ts >= last_resolved,
                    "resolved ts went backwards: {} after {} in {:?}",
                    ts,
                    last_resolved,
                    forwarded
                );
                last_resolved = *ts;
            }
            Forwarded::Row(key, commit_ts) => assert!(
                *commit_ts > last_resolved,
                "row {}@{} forwarded after resolved {} in {:?}",
                key,
                commit_ts,
                last_resolved,
                forwarded
            ),
            Forwarded::Other => {}
        }
    }
}
