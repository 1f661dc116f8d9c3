//! In-memory heap sorter

use super::{send_or_cancel, EventSorter, SortBuffer};
use crate::common::{EventRef, Result, SorterError};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Sorter keeping every pending event in a heap.
pub struct MemorySorter {
    input_tx: mpsc::Sender<EventRef>,
    input_rx: Mutex<Option<mpsc::Receiver<EventRef>>>,
    output_tx: mpsc::Sender<EventRef>,
    output_rx: Mutex<Option<mpsc::Receiver<EventRef>>>,
}

impl MemorySorter {
    /// Create a sorter with the given channel capacities.
    pub fn new(input_capacity: usize, output_capacity: usize) -> Self {
        let (input_tx, input_rx) = mpsc::channel(input_capacity);
        let (output_tx, output_rx) = mpsc::channel(output_capacity);
        Self {
            input_tx,
            input_rx: Mutex::new(Some(input_rx)),
            output_tx,
            output_rx: Mutex::new(Some(output_rx)),
        }
    }
}

#[async_trait]
impl EventSorter for MemorySorter {
    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let mut input = self
            .input_rx
            .lock()
            .take()
            .ok_or_else(|| SorterError::invalid_state("memory sorter is already running"))?;
        let mut buffer = SortBuffer::default();

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                event = input.recv() => event,
            };
            let Some(event) = event else {
                debug!(pending = buffer.len(), "memory sorter input closed");
                return Ok(());
            };

            if !event.is_resolved() {
                buffer.push(event);
                continue;
            }

            for ready in buffer.drain_until(event.commit_ts) {
                if !send_or_cancel(&self.output_tx, &cancel, ready).await {
                    return Ok(());
                }
            }
            if !send_or_cancel(&self.output_tx, &cancel, event).await {
                return Ok(());
            }
        }
    }

    async fn add_entry(&self, event: EventRef) -> Result<()> {
        self.input_tx
            .send(event)
            .await
            .map_err(|_| SorterError::channel_closed("memory sorter input"))
    }

    fn try_add_entry(&self, event: EventRef) -> Result<bool> {
        match self.input_tx.try_send(event) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(_)) => Ok(false),
            Err(TrySendError::Closed(_)) => Err(SorterError::channel_closed("memory sorter input")),
        }
    }

    fn take_output(&self) -> Option<mpsc::Receiver<EventRef>> {
        self.output_rx.lock().take()
    }
}
