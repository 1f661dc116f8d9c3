//! Unified sorter: heap sorter that spills to disk
//!
//! When the buffered bytes exceed the spill threshold, the buffer is written
//! as one sorted run (JSON lines of sequence number + raw entry) into the
//! table's sort dir. On each resolved marker only the prefix of every run
//! covered by the resolved ts is read back; each run keeps a read offset, so
//! entries above the resolved ts stay on disk. Run files are removed once
//! fully read and when the sorter stops.

use super::{send_or_cancel, EventSorter, SortBuffer};
use crate::common::{EventRef, PolymorphicEvent, RawKvEntry, Result, SorterError, Ts};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const PROBE_FILE: &str = ".rivven_sorter_probe";

/// Check that `dir` exists (creating it if needed) and is writable.
pub fn check_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .map_err(|e| SorterError::sort_dir(format!("{}: {}", dir.display(), e)))?;
    let meta = std::fs::metadata(dir)
        .map_err(|e| SorterError::sort_dir(format!("{}: {}", dir.display(), e)))?;
    if !meta.is_dir() {
        return Err(SorterError::sort_dir(format!(
            "{} is not a directory",
            dir.display()
        )));
    }
    let probe = dir.join(PROBE_FILE);
    std::fs::write(&probe, b"probe")
        .map_err(|e| SorterError::sort_dir(format!("{} is not writable: {}", dir.display(), e)))?;
    std::fs::remove_file(&probe)
        .map_err(|e| SorterError::sort_dir(format!("{}: {}", dir.display(), e)))?;
    Ok(())
}

#[derive(Serialize, Deserialize)]
struct SpilledEntry {
    seq: u64,
    raw: RawKvEntry,
}

/// Sorter that bounds its memory by spilling sorted runs to disk.
pub struct UnifiedSorter {
    dir: PathBuf,
    spill_threshold: usize,
    input_tx: mpsc::Sender<EventRef>,
    input_rx: Mutex<Option<mpsc::Receiver<EventRef>>>,
    output_tx: mpsc::Sender<EventRef>,
    output_rx: Mutex<Option<mpsc::Receiver<EventRef>>>,
}

impl UnifiedSorter {
    /// Create a sorter working in `dir`.
    pub fn new(
        dir: impl Into<PathBuf>,
        spill_threshold: usize,
        input_capacity: usize,
        output_capacity: usize,
    ) -> Result<Self> {
        let dir = dir.into();
        check_dir(&dir)?;
        let (input_tx, input_rx) = mpsc::channel(input_capacity);
        let (output_tx, output_rx) = mpsc::channel(output_capacity);
        Ok(Self {
            dir,
            spill_threshold,
            input_tx,
            input_rx: Mutex::new(Some(input_rx)),
            output_tx,
            output_rx: Mutex::new(Some(output_rx)),
        })
    }

    /// Working directory of this sorter.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// A sorted run on disk and how far it has been read.
struct SpilledRun {
    path: PathBuf,
    offset: u64,
}

impl SpilledRun {
    /// Push entries with commit ts <= `resolved_ts` into `buffer`.
    ///
    /// Returns true once the run is exhausted.
    async fn load_until(&mut self, buffer: &mut SortBuffer, resolved_ts: Ts) -> Result<bool> {
        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(self.offset)).await?;
        let mut reader = BufReader::new(file);
        let mut line = String::new();
        loop {
            line.clear();
            let n = reader.read_line(&mut line).await?;
            if n == 0 {
                return Ok(true);
            }
            let entry: SpilledEntry = serde_json::from_str(line.trim_end())?;
            if entry.raw.commit_ts > resolved_ts {
                return Ok(false);
            }
            self.offset += n as u64;
            buffer.push_with_seq(entry.seq, Arc::new(PolymorphicEvent::new(entry.raw)));
        }
    }
}

struct SpillState {
    dir: PathBuf,
    runs: Vec<SpilledRun>,
    next_run: u64,
}

impl SpillState {
    async fn spill(&mut self, buffer: &mut SortBuffer) -> Result<()> {
        let items = buffer.drain_all();
        let mut data = Vec::with_capacity(items.len() * 64);
        for item in &items {
            let entry = SpilledEntry {
                seq: item.seq,
                raw: item.event.raw.clone(),
            };
            serde_json::to_writer(&mut data, &entry)?;
            data.push(b'\n');
        }

        let path = self.dir.join(format!("run-{:08}.jsonl", self.next_run));
        self.next_run += 1;
        tokio::fs::write(&path, data).await?;
        debug!(path = %path.display(), entries = items.len(), "spilled sorted run");
        self.runs.push(SpilledRun { path, offset: 0 });
        Ok(())
    }

    /// Load the part of every run covered by `resolved_ts`.
    async fn merge_into(&mut self, buffer: &mut SortBuffer, resolved_ts: Ts) -> Result<()> {
        let mut i = 0;
        while i < self.runs.len() {
            if self.runs[i].load_until(buffer, resolved_ts).await? {
                let run = self.runs.remove(i);
                tokio::fs::remove_file(&run.path).await?;
            } else {
                i += 1;
            }
        }
        Ok(())
    }

    fn cleanup(&mut self) {
        for run in self.runs.drain(..) {
            if let Err(e) = std::fs::remove_file(&run.path) {
                warn!(path = %run.path.display(), error = %e, "failed to remove sorted run");
            }
        }
    }
}

impl Drop for SpillState {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[async_trait]
impl EventSorter for UnifiedSorter {
    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let mut input = self
            .input_rx
            .lock()
            .take()
            .ok_or_else(|| SorterError::invalid_state("unified sorter is already running"))?;
        let mut buffer = SortBuffer::default();
        let mut spill = SpillState {
            dir: self.dir.clone(),
            runs: Vec::new(),
            next_run: 0,
        };

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                event = input.recv() => event,
            };
            let Some(event) = event else {
                return Ok(());
            };

            if !event.is_resolved() {
                buffer.push(event);
                if buffer.bytes() > self.spill_threshold {
                    spill.spill(&mut buffer).await?;
                }
                continue;
            }

            let resolved_ts: Ts = event.commit_ts;
            spill.merge_into(&mut buffer, resolved_ts).await?;
            for ready in buffer.drain_until(resolved_ts) {
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
            .map_err(|_| SorterError::channel_closed("unified sorter input"))
    }

    fn try_add_entry(&self, event: EventRef) -> Result<bool> {
        match self.input_tx.try_send(event) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(_)) => Ok(false),
            Err(TrySendError::Closed(_)) => Err(SorterError::channel_closed("unified sorter input")),
        }
    }

    fn take_output(&self) -> Option<mpsc::Receiver<EventRef>> {
        self.output_rx.lock().take()
    }
}
