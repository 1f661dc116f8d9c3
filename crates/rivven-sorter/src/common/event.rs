//! Change event representation
//!
//! A table's raw change stream is a sequence of [`PolymorphicEvent`]s: either
//! a row change (put/delete) carrying its commit timestamp, or a resolved
//! marker meaning "no event with commit-ts <= T will arrive later".
//!
//! Events are shared as [`EventRef`] (`Arc<PolymorphicEvent>`): the sorter
//! stage hands the same event to the mounter for decoding and to the next
//! pipeline node, which can wait for decoding via [`PolymorphicEvent::wait_finished`].

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Timestamp issued by the source cluster (commit ts, start ts, resolved ts).
pub type Ts = u64;

/// Source table identifier.
pub type TableId = i64;

/// Shared handle to an event flowing through the pipeline.
pub type EventRef = Arc<PolymorphicEvent>;

/// Raw operation type of a change entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpType {
    /// Row written (insert or update)
    Put,
    /// Row deleted
    Delete,
    /// Resolved marker
    Resolved,
}

impl std::fmt::Display for OpType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpType::Put => write!(f, "PUT"),
            OpType::Delete => write!(f, "DELETE"),
            OpType::Resolved => write!(f, "RESOLVED"),
        }
    }
}

/// Undecoded key/value change as pulled from the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawKvEntry {
    /// Operation type
    pub op_type: OpType,
    /// Encoded row key
    #[serde(default)]
    pub key: Bytes,
    /// Encoded row value (empty for deletes)
    #[serde(default)]
    pub value: Bytes,
    /// Previous encoded value, if the source provides it
    #[serde(default)]
    pub old_value: Bytes,
    /// Start timestamp of the writing transaction
    pub start_ts: Ts,
    /// Commit timestamp of the writing transaction (resolved ts for markers)
    pub commit_ts: Ts,
}

impl RawKvEntry {
    /// Create a put entry.
    pub fn put(key: impl Into<Bytes>, value: impl Into<Bytes>, start_ts: Ts, commit_ts: Ts) -> Self {
        Self {
            op_type: OpType::Put,
            key: key.into(),
            value: value.into(),
            old_value: Bytes::new(),
            start_ts,
            commit_ts,
        }
    }

    /// Create a delete entry.
    pub fn delete(key: impl Into<Bytes>, start_ts: Ts, commit_ts: Ts) -> Self {
        Self {
            op_type: OpType::Delete,
            key: key.into(),
            value: Bytes::new(),
            old_value: Bytes::new(),
            start_ts,
            commit_ts,
        }
    }

    /// Create a resolved marker entry.
    pub fn resolved(ts: Ts) -> Self {
        Self {
            op_type: OpType::Resolved,
            key: Bytes::new(),
            value: Bytes::new(),
            old_value: Bytes::new(),
            start_ts: 0,
            commit_ts: ts,
        }
    }

    /// Attach the previous value.
    pub fn with_old_value(mut self, old_value: impl Into<Bytes>) -> Self {
        self.old_value = old_value.into();
        self
    }

    /// Approximate in-memory size, used for flow-control accounting.
    pub fn approximate_size(&self) -> usize {
        self.key.len() + self.value.len() + self.old_value.len()
    }
}

/// A raw change or a resolved marker, plus its mount (decode) status.
#[derive(Debug)]
pub struct PolymorphicEvent {
    /// Start timestamp
    pub start_ts: Ts,
    /// Commit timestamp; the resolved ts for markers
    pub commit_ts: Ts,
    /// Raw entry
    pub raw: RawKvEntry,
    finished: FinishSignal,
}

impl PolymorphicEvent {
    /// Wrap a raw entry.
    pub fn new(raw: RawKvEntry) -> Self {
        Self {
            start_ts: raw.start_ts,
            commit_ts: raw.commit_ts,
            raw,
            finished: FinishSignal::default(),
        }
    }

    /// Create a resolved marker event.
    pub fn resolved(ts: Ts) -> Self {
        Self::new(RawKvEntry::resolved(ts))
    }

    /// Convenience for building a shared event.
    pub fn into_ref(self) -> EventRef {
        Arc::new(self)
    }

    /// Check if this is a resolved marker.
    pub fn is_resolved(&self) -> bool {
        self.raw.op_type == OpType::Resolved
    }

    /// Approximate size of the raw payload.
    pub fn approximate_size(&self) -> usize {
        self.raw.approximate_size()
    }

    /// Arm the finish signal before handing the event to the mounter.
    ///
    /// Until armed, [`wait_finished`](Self::wait_finished) returns at once.
    pub fn set_up_finished(&self) {
        self.finished.done.store(false, Ordering::Release);
        self.finished.armed.store(true, Ordering::Release);
    }

    /// Called by the mounter once the event is decoded.
    pub fn mark_finished(&self) {
        self.finished.done.store(true, Ordering::Release);
        self.finished.notify.notify_waiters();
    }

    /// Check whether the mounter has finished with this event.
    pub fn is_finished(&self) -> bool {
        !self.finished.armed.load(Ordering::Acquire) || self.finished.done.load(Ordering::Acquire)
    }

    /// Wait until the mounter has finished decoding this event.
    pub async fn wait_finished(&self) {
        loop {
            let notified = self.finished.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_finished() {
                return;
            }
            notified.await;
        }
    }
}

#[derive(Debug, Default)]
struct FinishSignal {
    armed: AtomicBool,
    done: AtomicBool,
    notify: Notify,
}

/// Message exchanged between pipeline nodes.
#[derive(Debug, Clone)]
pub enum PipelineMessage {
    /// A row change or resolved marker
    Event(EventRef),
    /// Barrier: downstream must not advance past this ts
    Barrier(Ts),
    /// Periodic tick
    Tick,
}

impl PipelineMessage {
    /// Wrap an event.
    pub fn event(event: EventRef) -> Self {
        Self::Event(event)
    }

    /// Get the wrapped event, if any.
    pub fn as_event(&self) -> Option<&EventRef> {
        match self {
            Self::Event(e) => Some(e),
            _ => None,
        }
    }

    /// Get the resolved ts if this message is a resolved marker.
    pub fn resolved_ts(&self) -> Option<Ts> {
        self.as_event()
            .filter(|e| e.is_resolved())
            .map(|e| e.commit_ts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_put_entry() {
        let raw = RawKvEntry::put("k1", "value", 10, 20);
        assert_eq!(raw.op_type, OpType::Put);
        assert_eq!(raw.approximate_size(), 7);

        let event = PolymorphicEvent::new(raw);
        assert_eq!(event.start_ts, 10);
        assert_eq!(event.commit_ts, 20);
        assert!(!event.is_resolved());
    }

    #[test]
    fn test_old_value_counts_towards_size() {
        let raw = RawKvEntry::put("k", "new", 1, 2).with_old_value("older");
        assert_eq!(raw.approximate_size(), 1 + 3 + 5);
    }

    #[test]
    fn test_resolved_event() {
        let event = PolymorphicEvent::resolved(42);
        assert!(event.is_resolved());
        assert_eq!(event.commit_ts, 42);
        assert_eq!(event.approximate_size(), 0);

        let msg = PipelineMessage::event(event.into_ref());
        assert_eq!(msg.resolved_ts(), Some(42));
        assert_eq!(PipelineMessage::Barrier(3).resolved_ts(), None);
    }

    #[test]
    fn test_raw_entry_serialization() {
        let raw = RawKvEntry::delete("key", 5, 6);
        let json = serde_json::to_string(&raw).unwrap();
        assert!(json.contains("delete"));
        let parsed: RawKvEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, raw);
    }

    #[tokio::test]
    async fn test_unarmed_event_is_finished() {
        let event = PolymorphicEvent::new(RawKvEntry::put("k", "v", 1, 2));
        assert!(event.is_finished());
        event.wait_finished().await;
    }

    #[tokio::test]
    async fn test_wait_finished() {
        let event = PolymorphicEvent::new(RawKvEntry::put("k", "v", 1, 2)).into_ref();
        event.set_up_finished();
        assert!(!event.is_finished());

        let waiter = {
            let event = event.clone();
            tokio::spawn(async move { event.wait_finished().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        event.mark_finished();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(event.is_finished());
    }
}
