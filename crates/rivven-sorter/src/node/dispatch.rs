//! Dispatch loop and forwarding strategies of the sorter stage

use crate::actor::{ActorId, ActorRouter, ControlMessage};
use crate::common::{
    EventRef, Mounter, PipelineMessage, PolymorphicEvent, Result, SorterError, TableId,
    TableSorterMetrics, Ts,
};
use crate::flow_control::TableFlowController;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Where forwarded messages go.
pub(crate) enum ForwardTarget {
    /// Push straight into the next pipeline node; errors are thrown to the
    /// enclosing pipeline.
    Legacy {
        next: mpsc::Sender<PipelineMessage>,
        errors: mpsc::UnboundedSender<SorterError>,
    },
    /// Queue on the stage output and nudge the table actor.
    Actor {
        output: mpsc::Sender<PipelineMessage>,
        router: Arc<dyn ActorRouter>,
        actor_id: ActorId,
    },
}

/// Forwards events of one table according to its dispatch mode.
pub(crate) struct Forwarder {
    table_id: TableId,
    target: ForwardTarget,
    cancel: CancellationToken,
}

impl Forwarder {
    pub(crate) fn new(table_id: TableId, target: ForwardTarget, cancel: CancellationToken) -> Self {
        Self {
            table_id,
            target,
            cancel,
        }
    }

    pub(crate) fn is_actor(&self) -> bool {
        matches!(self.target, ForwardTarget::Actor { .. })
    }

    /// Emit a resolved ts generated by the stage itself.
    ///
    /// Legacy mode sends a resolved marker to the next node. Actor mode sends
    /// a barrier to the table actor; a failed barrier is only logged since a
    /// later one supersedes it.
    pub(crate) async fn send_resolved(&self, ts: Ts) -> Result<()> {
        match &self.target {
            ForwardTarget::Legacy { next, .. } => {
                let msg = PipelineMessage::event(PolymorphicEvent::resolved(ts).into_ref());
                self.send_next(next, msg).await.map(|_| ())
            }
            ForwardTarget::Actor {
                router, actor_id, ..
            } => {
                if let Err(e) = router.send(*actor_id, ControlMessage::Barrier(ts)) {
                    warn!(table_id = self.table_id, resolved_ts = ts, error = %e, "failed to send barrier");
                }
                Ok(())
            }
        }
    }

    /// Forward a sorted event or resolved marker.
    ///
    /// Returns `Ok(false)` if the stage was cancelled before the hand-off.
    pub(crate) async fn forward(&self, event: EventRef) -> Result<bool> {
        self.pass_through(PipelineMessage::event(event)).await
    }

    /// Forward any pipeline message, waiting for capacity.
    pub(crate) async fn pass_through(&self, msg: PipelineMessage) -> Result<bool> {
        match &self.target {
            ForwardTarget::Legacy { next, .. } => self.send_next(next, msg).await,
            ForwardTarget::Actor { output, .. } => {
                if !self.send_next(output, msg).await? {
                    return Ok(false);
                }
                self.tick();
                Ok(true)
            }
        }
    }

    /// Forward any pipeline message without waiting; false if full.
    pub(crate) fn try_pass_through(&self, msg: PipelineMessage) -> Result<bool> {
        let tx = match &self.target {
            ForwardTarget::Legacy { next, .. } => next,
            ForwardTarget::Actor { output, .. } => output,
        };
        match tx.try_send(msg) {
            Ok(()) => {
                self.tick();
                Ok(true)
            }
            Err(TrySendError::Full(_)) => Ok(false),
            Err(TrySendError::Closed(_)) => Err(SorterError::channel_closed("sorter output")),
        }
    }

    /// Report a fatal error to the supervisor of the table.
    pub(crate) async fn fail(&self, err: SorterError) {
        match &self.target {
            ForwardTarget::Legacy { errors, .. } => {
                error!(table_id = self.table_id, error = %err, "sorter stage failed");
                if errors.send(err).is_err() {
                    warn!(table_id = self.table_id, "pipeline error channel closed");
                }
            }
            ForwardTarget::Actor {
                router, actor_id, ..
            } => {
                error!(
                    table_id = self.table_id,
                    actor = %actor_id,
                    error = %err,
                    "sorter stage failed, stopping table actor"
                );
                if let Err(e) = router
                    .send_blocking(&self.cancel, *actor_id, ControlMessage::Stop)
                    .await
                {
                    warn!(table_id = self.table_id, error = %e, "failed to send stop message");
                }
            }
        }
    }

    fn tick(&self) {
        if let ForwardTarget::Actor {
            router, actor_id, ..
        } = &self.target
        {
            // a full mailbox already holds a pending tick
            if let Err(e) = router.send(*actor_id, ControlMessage::Tick) {
                debug!(table_id = self.table_id, error = %e, "tick not delivered");
            }
        }
    }

    async fn send_next(&self, tx: &mpsc::Sender<PipelineMessage>, msg: PipelineMessage) -> Result<bool> {
        tokio::select! {
            _ = self.cancel.cancelled() => Ok(false),
            res = tx.send(msg) => res
                .map(|_| true)
                .map_err(|_| SorterError::channel_closed("next node")),
        }
    }
}

/// Sort state of one table, owned by the dispatch loop.
#[derive(Debug)]
pub(crate) struct TableSortState {
    pub(crate) last_sent_resolved_ts: Ts,
    pub(crate) last_sent_resolved_at: Instant,
    pub(crate) last_crts: Ts,
}

impl TableSortState {
    pub(crate) fn new() -> Self {
        Self {
            last_sent_resolved_ts: 0,
            last_sent_resolved_at: Instant::now(),
            last_crts: 0,
        }
    }

    fn mark_resolved_sent(&mut self, ts: Ts) {
        self.last_sent_resolved_ts = ts;
        self.last_sent_resolved_at = Instant::now();
    }
}

/// Moves sorted events through flow control to the mounter and onwards.
pub(crate) struct DispatchLoop {
    pub(crate) table_id: TableId,
    pub(crate) output: mpsc::Receiver<EventRef>,
    pub(crate) flow: Arc<dyn TableFlowController>,
    pub(crate) mounter: Arc<dyn Mounter>,
    pub(crate) forwarder: Arc<Forwarder>,
    pub(crate) metrics: TableSorterMetrics,
    pub(crate) interpolate_interval: Duration,
    pub(crate) cancel: CancellationToken,
}

impl DispatchLoop {
    pub(crate) async fn run(mut self) {
        let mut state = TableSortState::new();
        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => return,
                event = self.output.recv() => event,
            };
            let Some(event) = event else {
                debug!(table_id = self.table_id, "sorter output closed");
                return;
            };

            match self.dispatch(&mut state, event).await {
                Ok(true) => {}
                Ok(false) => return,
                Err(e) if e.is_aborted() => {
                    info!(table_id = self.table_id, "flow control cancelled");
                    return;
                }
                Err(e) => {
                    self.forwarder.fail(e).await;
                    return;
                }
            }
        }
    }

    /// Handle one sorted item; `Ok(false)` once the stage is cancelled.
    async fn dispatch(&self, state: &mut TableSortState, event: EventRef) -> Result<bool> {
        if event.is_resolved() {
            let resolved_ts = event.commit_ts;
            if resolved_ts < state.last_sent_resolved_ts {
                return Ok(true);
            }
            state.mark_resolved_sent(resolved_ts);
            let forwarded = self.forwarder.forward(event).await?;
            if forwarded {
                self.metrics.record_forwarded();
            }
            return Ok(forwarded);
        }

        let commit_ts = event.commit_ts;
        let size = event.approximate_size() as u64;

        if state.last_sent_resolved_at.elapsed() > self.interpolate_interval
            && state.last_crts > state.last_sent_resolved_ts
            && commit_ts > state.last_crts
        {
            let ts = state.last_crts;
            state.mark_resolved_sent(ts);
            self.metrics.record_interpolated();
            debug!(table_id = self.table_id, resolved_ts = ts, "interpolated resolved ts");
            self.forwarder.send_resolved(ts).await?;
        }

        {
            let st = &mut *state;
            let forwarder = &self.forwarder;
            let table_id = self.table_id;
            let on_block: BoxFuture<'_, Result<()>> = Box::pin(async move {
                if st.last_crts > st.last_sent_resolved_ts {
                    let ts = st.last_crts;
                    st.mark_resolved_sent(ts);
                    debug!(table_id, resolved_ts = ts, "flow control blocked, sending resolved ts");
                    forwarder.send_resolved(ts).await?;
                }
                Ok(())
            });
            self.flow.consume(commit_ts, size, on_block).await?;
        }
        state.last_crts = commit_ts;

        event.set_up_finished();
        let mounter = self.mounter.input();
        let mounted = tokio::select! {
            _ = self.cancel.cancelled() => false,
            res = mounter.send(event.clone()) => {
                res.map_err(|_| SorterError::channel_closed("mounter input"))?;
                true
            }
        };
        if !mounted {
            return Ok(false);
        }

        let forwarded = self.forwarder.forward(event).await?;
        if forwarded {
            self.metrics.record_forwarded();
        }
        Ok(forwarded)
    }
}
