//! # Sorter pipeline stage
//!
//! [`SorterNode`] owns the sort engine of one table and moves its sorted
//! output through flow control to the mounter and downstream.
//!
//! ## Dispatch modes
//!
//! | Mode   | Start with                     | Output                                         | Fatal errors                  |
//! |--------|--------------------------------|------------------------------------------------|-------------------------------|
//! | legacy | [`SorterNode::start_legacy`]   | pushed into the next node's channel            | sent on the pipeline's error channel |
//! | actor  | [`SorterNode::start_actor`]    | queued, polled via [`SorterNode::try_recv_processed`], `Tick` to the actor | `Stop` to the table actor |
//!
//! ## Tasks
//!
//! `start` spawns four tasks tied to one cancellation token: the sort engine,
//! a watcher aborting the flow controller on cancellation, the dispatch loop
//! and a metrics tick. [`SorterNode::stop`] cancels and joins them.
//!
//! ```rust,ignore
//! let node = SorterNode::new("db.orders", 42, start_ts, flow, mounter, config);
//! node.start_legacy(NodeContext::new(next_tx, errors_tx))?;
//!
//! node.submit(PipelineMessage::event(event)).await?;
//! node.stop().await;
//! ```

mod dispatch;

use crate::actor::{ActorId, ActorRouter};
use crate::common::{
    Mounter, PipelineMessage, Result, SorterConfig, SorterError, TableId, TableSorterMetrics, Ts,
};
use crate::engine::{build_sorter, EventSorter};
use crate::flow_control::TableFlowController;
use dispatch::{DispatchLoop, ForwardTarget, Forwarder};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Channels of the enclosing legacy pipeline.
#[derive(Debug, Clone)]
pub struct NodeContext {
    /// Input of the next node
    pub next: mpsc::Sender<PipelineMessage>,
    /// Errors thrown to the pipeline
    pub errors: mpsc::UnboundedSender<SorterError>,
}

impl NodeContext {
    /// Create a context.
    pub fn new(
        next: mpsc::Sender<PipelineMessage>,
        errors: mpsc::UnboundedSender<SorterError>,
    ) -> Self {
        Self { next, errors }
    }
}

struct Running {
    sorter: Arc<dyn EventSorter>,
    forwarder: Arc<Forwarder>,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// Per-table sorter stage.
pub struct SorterNode {
    table_name: String,
    table_id: TableId,
    flow_controller: Arc<dyn TableFlowController>,
    mounter: Arc<dyn Mounter>,
    config: SorterConfig,
    resolved_ts: AtomicU64,
    metrics: TableSorterMetrics,
    output_tx: mpsc::Sender<PipelineMessage>,
    output_rx: Mutex<mpsc::Receiver<PipelineMessage>>,
    running: Mutex<Option<Running>>,
}

impl SorterNode {
    /// Create a stage for `table_id`; `start_ts` is its initial resolved ts.
    pub fn new(
        table_name: impl Into<String>,
        table_id: TableId,
        start_ts: Ts,
        flow_controller: Arc<dyn TableFlowController>,
        mounter: Arc<dyn Mounter>,
        config: SorterConfig,
    ) -> Self {
        let (output_tx, output_rx) = mpsc::channel(config.output_channel_size.max(1));
        let metrics = TableSorterMetrics::new(&config.changefeed_id, &config.capture_addr, table_id);
        Self {
            table_name: table_name.into(),
            table_id,
            flow_controller,
            mounter,
            config,
            resolved_ts: AtomicU64::new(start_ts),
            metrics,
            output_tx,
            output_rx: Mutex::new(output_rx),
            running: Mutex::new(None),
        }
    }

    /// Table name.
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Table id.
    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    /// Start in legacy mode, pushing output into `ctx.next`.
    pub fn start_legacy(&self, ctx: NodeContext) -> Result<()> {
        self.start(|_| ForwardTarget::Legacy {
            next: ctx.next,
            errors: ctx.errors,
        })
    }

    /// Start in actor mode, queueing output and notifying `actor_id`.
    pub fn start_actor(&self, router: Arc<dyn ActorRouter>, actor_id: ActorId) -> Result<()> {
        self.start(|output| ForwardTarget::Actor {
            output,
            router,
            actor_id,
        })
    }

    fn start<F>(&self, target: F) -> Result<()>
    where
        F: FnOnce(mpsc::Sender<PipelineMessage>) -> ForwardTarget,
    {
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(SorterError::invalid_state(format!(
                "sorter stage of table {} already started",
                self.table_id
            )));
        }

        self.config.validate()?;
        let sorter = build_sorter(&self.config, self.table_id, &self.table_name)?;
        let output = sorter
            .take_output()
            .ok_or_else(|| SorterError::invalid_state("sorter output already taken"))?;

        let cancel = CancellationToken::new();
        let forwarder = Arc::new(Forwarder::new(
            self.table_id,
            target(self.output_tx.clone()),
            cancel.clone(),
        ));
        let mut handles = Vec::with_capacity(4);

        // sort engine
        {
            let sorter = sorter.clone();
            let forwarder = forwarder.clone();
            let cancel = cancel.clone();
            let table_id = self.table_id;
            handles.push(tokio::spawn(async move {
                let res = sorter.run(cancel.clone()).await;
                if cancel.is_cancelled() {
                    if let Err(e) = res {
                        info!(table_id, error = %e, "sorter exited during shutdown");
                    }
                    return;
                }
                let err = match res {
                    Ok(()) => SorterError::sorter("sort engine exited unexpectedly"),
                    Err(e) => e,
                };
                forwarder.fail(err).await;
            }));
        }

        // flow control watcher
        {
            let flow = self.flow_controller.clone();
            let cancel = cancel.clone();
            let table_id = self.table_id;
            handles.push(tokio::spawn(async move {
                cancel.cancelled().await;
                flow.abort();
                info!(table_id, "flow controller aborted");
            }));
        }

        // dispatch loop
        handles.push(tokio::spawn(
            DispatchLoop {
                table_id: self.table_id,
                output,
                flow: self.flow_controller.clone(),
                mounter: self.mounter.clone(),
                forwarder: forwarder.clone(),
                metrics: self.metrics.clone(),
                interpolate_interval: self.config.resolved_ts_interpolate_interval(),
                cancel: cancel.clone(),
            }
            .run(),
        ));

        // metrics tick
        {
            let flow = self.flow_controller.clone();
            let metrics = self.metrics.clone();
            let cancel = cancel.clone();
            let period = self.config.metrics_flush_interval();
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = ticker.tick() => metrics.observe_memory_consumption(flow.consumption()),
                    }
                }
            }));
        }

        info!(
            table_id = self.table_id,
            table_name = %self.table_name,
            actor_mode = forwarder.is_actor(),
            "sorter stage started"
        );
        *running = Some(Running {
            sorter,
            forwarder,
            cancel,
            handles,
        });
        Ok(())
    }

    fn handles(&self) -> Result<(Arc<dyn EventSorter>, Arc<Forwarder>)> {
        self.running
            .lock()
            .as_ref()
            .map(|r| (r.sorter.clone(), r.forwarder.clone()))
            .ok_or_else(|| {
                SorterError::invalid_state(format!(
                    "sorter stage of table {} is not running",
                    self.table_id
                ))
            })
    }

    fn observe_resolved(&self, msg: &PipelineMessage) {
        let Some(resolved_ts) = msg.resolved_ts() else {
            return;
        };
        let old_resolved_ts = self.resolved_ts.swap(resolved_ts, Ordering::AcqRel);
        if resolved_ts < old_resolved_ts {
            error!(
                table_id = self.table_id,
                resolved_ts,
                old_resolved_ts,
                "resolved ts regression"
            );
            panic!(
                "resolved ts regression: table_id {}, resolved_ts {}, old_resolved_ts {}",
                self.table_id, resolved_ts, old_resolved_ts
            );
        }
        self.metrics.set_input_resolved_ts(resolved_ts);
    }

    /// Submit a message, waiting for capacity.
    ///
    /// Events go to the sort engine; any other message is forwarded as is.
    ///
    /// # Panics
    ///
    /// Panics if a resolved marker regresses below the current resolved ts.
    pub async fn submit(&self, msg: PipelineMessage) -> Result<()> {
        let (sorter, forwarder) = self.handles()?;
        self.observe_resolved(&msg);
        match msg {
            PipelineMessage::Event(event) => sorter.add_entry(event).await,
            other => forwarder.pass_through(other).await.map(|_| ()),
        }
    }

    /// Submit a message without waiting; returns false if the target is full.
    ///
    /// # Panics
    ///
    /// Panics if a resolved marker regresses below the current resolved ts.
    pub fn try_submit(&self, msg: PipelineMessage) -> Result<bool> {
        let (sorter, forwarder) = self.handles()?;
        self.observe_resolved(&msg);
        match msg {
            PipelineMessage::Event(event) => sorter.try_add_entry(event),
            other => forwarder.try_pass_through(other),
        }
    }

    /// Latest resolved ts received from upstream.
    pub fn resolved_ts(&self) -> Ts {
        self.resolved_ts.load(Ordering::Acquire)
    }

    /// Pop a processed message from the actor-mode output queue.
    pub fn try_recv_processed(&self) -> Option<PipelineMessage> {
        self.output_rx.lock().try_recv().ok()
    }

    /// Check if the stage has been started and not yet stopped.
    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Cancel the stage and wait for all its tasks.
    pub async fn stop(&self) {
        let running = self.running.lock().take();
        let Some(running) = running else {
            return;
        };
        running.cancel.cancel();
        for handle in running.handles {
            if let Err(e) = handle.await {
                error!(table_id = self.table_id, error = %e, "sorter stage task failed");
            }
        }
        info!(table_id = self.table_id, "sorter stage stopped");
    }
}

impl Drop for SorterNode {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.cancel.cancel();
        }
    }
}
