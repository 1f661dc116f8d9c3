//! # Sort engines
//!
//! An [`EventSorter`] accepts a table's events in arrival order and emits
//! them in commit order. Every resolved marker flushes the buffered events
//! it covers, followed by the marker itself.
//!
//! | Engine    | Storage                                             |
//! |-----------|-----------------------------------------------------|
//! | `memory`  | in-memory heap                                      |
//! | `unified` | in-memory heap, spills sorted runs into `sort_dir`  |
//! | `file`    | deprecated alias of `unified`                       |

mod memory;
mod unified;

pub use memory::MemorySorter;
pub use unified::{check_dir, UnifiedSorter};

use crate::common::{EventRef, OpType, Result, SortEngine, SorterConfig, TableId, Ts};
use async_trait::async_trait;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Event sorting capability consumed by the sorter stage.
#[async_trait]
pub trait EventSorter: Send + Sync {
    /// Run the sort loop until `cancel` fires or the input closes.
    async fn run(&self, cancel: CancellationToken) -> Result<()>;

    /// Add an event, waiting for input capacity.
    async fn add_entry(&self, event: EventRef) -> Result<()>;

    /// Add an event without waiting; returns false if the input is full.
    fn try_add_entry(&self, event: EventRef) -> Result<bool>;

    /// Take the sorted output (can only be called once).
    fn take_output(&self) -> Option<mpsc::Receiver<EventRef>>;
}

/// Build the sorter configured for a table.
///
/// Fails fast on an unknown engine or an unusable sort dir.
pub fn build_sorter(
    config: &SorterConfig,
    table_id: TableId,
    table_name: &str,
) -> Result<Arc<dyn EventSorter>> {
    let engine = config.engine()?;
    let sorter: Arc<dyn EventSorter> = match engine {
        SortEngine::Memory => Arc::new(MemorySorter::new(
            config.input_channel_size,
            config.output_channel_size,
        )),
        SortEngine::Unified | SortEngine::File => {
            if engine == SortEngine::File {
                warn!(
                    changefeed = %config.changefeed_id,
                    table_name,
                    "file sorter is obsolete and replaced by unified sorter, please revise the changefeed settings"
                );
            }
            check_dir(&config.sort_dir)?;
            let dir = config
                .sort_dir
                .join(format!("{}-{}", config.changefeed_id, table_id));
            Arc::new(UnifiedSorter::new(
                dir,
                config.unified_spill_threshold_bytes,
                config.input_channel_size,
                config.output_channel_size,
            )?)
        }
    };
    info!(table_id, table_name, engine = %engine, "sorter created");
    Ok(sorter)
}

fn op_rank(op: OpType) -> u8 {
    match op {
        OpType::Delete => 0,
        OpType::Put => 1,
        OpType::Resolved => 2,
    }
}

/// Buffered event ordered by commit ts; deletes first within one commit ts,
/// then arrival order.
#[derive(Debug)]
pub(crate) struct SortItem {
    pub(crate) seq: u64,
    pub(crate) event: EventRef,
}

impl SortItem {
    fn key(&self) -> (Ts, u8, u64) {
        (self.event.commit_ts, op_rank(self.event.raw.op_type), self.seq)
    }
}

impl PartialEq for SortItem {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for SortItem {}

impl PartialOrd for SortItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// Min-heap of buffered row events.
#[derive(Debug, Default)]
pub(crate) struct SortBuffer {
    heap: BinaryHeap<Reverse<SortItem>>,
    next_seq: u64,
    bytes: usize,
}

impl SortBuffer {
    pub(crate) fn push(&mut self, event: EventRef) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.push_with_seq(seq, event);
    }

    pub(crate) fn push_with_seq(&mut self, seq: u64, event: EventRef) {
        self.next_seq = self.next_seq.max(seq + 1);
        self.bytes += event.approximate_size();
        self.heap.push(Reverse(SortItem { seq, event }));
    }

    /// Pop every event with commit ts <= `resolved_ts`, in order.
    pub(crate) fn drain_until(&mut self, resolved_ts: Ts) -> Vec<EventRef> {
        let mut out = Vec::new();
        while let Some(Reverse(top)) = self.heap.peek() {
            if top.event.commit_ts > resolved_ts {
                break;
            }
            if let Some(Reverse(item)) = self.heap.pop() {
                self.bytes -= item.event.approximate_size();
                out.push(item.event);
            }
        }
        out
    }

    /// Pop everything, in order, keeping sequence numbers.
    pub(crate) fn drain_all(&mut self) -> Vec<SortItem> {
        let mut out = Vec::with_capacity(self.heap.len());
        while let Some(Reverse(item)) = self.heap.pop() {
            out.push(item);
        }
        self.bytes = 0;
        out
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn bytes(&self) -> usize {
        self.bytes
    }
}

/// Send `event` to `tx` unless cancelled; false if cancelled or closed.
pub(crate) async fn send_or_cancel(
    tx: &mpsc::Sender<EventRef>,
    cancel: &CancellationToken,
    event: EventRef,
) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        res = tx.send(event) => res.is_ok(),
    }
}
