//! Causality relay task
//!
//! Sits in front of the apply workers' job queue. Every row change is tagged
//! with the root of its causal group as dispatch key; when a job would merge
//! two groups, a conflict barrier is emitted first and the relation table
//! starts over. Flush jobs also start it over.

use crate::config::CausalityConfig;
use crate::detector::Causality;
use crate::error::{CausalityError, Result};
use crate::job::{Job, JobType};
use crate::metrics::CausalityMetrics;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Relay state owned by its task.
pub struct CausalityRelay {
    causality: Causality,
    disable_detect: bool,
    metrics: CausalityMetrics,
    task: String,
}

impl CausalityRelay {
    pub fn new(config: &CausalityConfig) -> Self {
        Self {
            causality: Causality::new(),
            disable_detect: config.disable_detect,
            metrics: CausalityMetrics::new(&config.task, &config.source),
            task: config.task.clone(),
        }
    }

    /// Process one job, returning what to forward in order.
    pub fn process(&mut self, mut job: Job) -> Vec<Job> {
        match job.tp {
            JobType::Flush => {
                self.causality.reset();
                return vec![job];
            }
            JobType::Conflict => return vec![job],
            JobType::Insert | JobType::Update | JobType::Delete => {}
        }

        let keys = job.keys();
        if self.disable_detect {
            job.dispatch_key = keys.into_iter().next();
            return vec![job];
        }

        let started = Instant::now();
        let mut out = Vec::with_capacity(2);
        if self.causality.detect_conflict(&keys) {
            debug!(task = %self.task, keys = ?keys, "causality conflict detected");
            self.metrics.record_conflict();
            out.push(Job::conflict());
            self.causality.reset();
        }
        job.dispatch_key = self.causality.add(&keys);
        self.metrics.observe_detect_duration(started.elapsed());
        debug!(task = %self.task, tp = %job.tp, dispatch_key = ?job.dispatch_key, "job dispatched");

        out.push(job);
        out
    }

    /// Relation table.
    pub fn causality(&self) -> &Causality {
        &self.causality
    }

    /// Run until `inbound` closes, forwarding to `outbound`.
    pub async fn run(mut self, mut inbound: mpsc::Receiver<Job>, outbound: mpsc::Sender<Job>) -> Result<()> {
        while let Some(job) = inbound.recv().await {
            self.metrics.set_input_queue_size(inbound.len());
            for out in self.process(job) {
                outbound
                    .send(out)
                    .await
                    .map_err(|_| CausalityError::channel_closed("causality output"))?;
            }
        }
        info!(task = %self.task, "causality relay input closed");
        Ok(())
    }
}

/// Spawn a relay reading `inbound`; returns its outbound queue and task.
///
/// The outbound queue closes once `inbound` is closed and drained.
pub fn causality_wrap(
    inbound: mpsc::Receiver<Job>,
    config: &CausalityConfig,
) -> Result<(mpsc::Receiver<Job>, JoinHandle<Result<()>>)> {
    config.validate()?;
    let (tx, rx) = mpsc::channel(config.queue_size);
    let relay = CausalityRelay::new(config);
    info!(
        task = %config.task,
        source = %config.source,
        disable_detect = config.disable_detect,
        "causality relay started"
    );
    let handle = tokio::spawn(relay.run(inbound, tx));
    Ok((rx, handle))
}
