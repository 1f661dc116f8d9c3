//! # Per-table flow control
//!
//! Memory-quota gate keyed by commit timestamp. The sorter stage consumes
//! quota for every row event before forwarding it; the sink releases quota
//! once it has flushed everything up to a resolved ts.
//!
//! ## Blocking and abort
//!
//! [`TableFlowController::consume`] waits until enough quota is released.
//! Before it starts waiting it runs the caller's `on_block` future once, so
//! the caller can emit a resolved ts and let the sink flush; otherwise the
//! sink would never release anything and the table would deadlock.
//!
//! Waiting is not tied to any cancellation token: shutdown goes through
//! [`TableFlowController::abort`], which wakes every waiter with
//! [`SorterError::FlowControllerAborted`].
//!
//! ## Transactions
//!
//! Events sharing the previous event's commit ts belong to the same
//! transaction and are force-consumed, so the stream never stalls in the
//! middle of a transaction.

use crate::common::{FlowControlConfig, Result, SorterError, Ts};
use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;
use tracing::{debug, error};

/// Flow control capability consumed by the sorter stage.
#[async_trait]
pub trait TableFlowController: Send + Sync {
    /// Consume `size` bytes of quota for an event committed at `commit_ts`.
    ///
    /// `on_block` is awaited once, before waiting, if the quota is exhausted.
    /// It is dropped unpolled otherwise.
    async fn consume<'a>(
        &'a self,
        commit_ts: Ts,
        size: u64,
        on_block: BoxFuture<'a, Result<()>>,
    ) -> Result<()>;

    /// Release the quota of every event with commit ts <= `resolved_ts`.
    fn release(&self, resolved_ts: Ts);

    /// Abort all current and future waits.
    fn abort(&self);

    /// Bytes currently consumed.
    fn consumption(&self) -> u64;
}

#[derive(Debug, Default)]
struct QuotaState {
    consumed: u64,
    aborted: bool,
}

/// Byte quota with abortable blocking acquisition.
#[derive(Debug)]
pub struct MemoryQuota {
    quota: u64,
    state: Mutex<QuotaState>,
    released: Notify,
}

impl MemoryQuota {
    /// Create a quota of `quota` bytes.
    pub fn new(quota: u64) -> Self {
        Self {
            quota,
            state: Mutex::new(QuotaState::default()),
            released: Notify::new(),
        }
    }

    /// Total quota in bytes.
    pub fn quota(&self) -> u64 {
        self.quota
    }

    /// Consume `n` bytes, waiting for releases if the quota is exhausted.
    pub async fn consume_with_blocking(&self, n: u64, on_block: BoxFuture<'_, Result<()>>) -> Result<()> {
        if n >= self.quota {
            return Err(SorterError::EventLargerThanQuota {
                size: n,
                quota: self.quota,
            });
        }

        let must_block = {
            let state = self.state.lock();
            state.consumed + n >= self.quota
        };
        if must_block {
            on_block.await?;
        }

        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();
            {
                let mut state = self.state.lock();
                if state.aborted {
                    return Err(SorterError::FlowControllerAborted);
                }
                if state.consumed + n < self.quota {
                    state.consumed += n;
                    return Ok(());
                }
            }
            released.await;
        }
    }

    /// Consume `n` bytes without waiting, possibly exceeding the quota.
    pub fn force_consume(&self, n: u64) -> Result<()> {
        let mut state = self.state.lock();
        if state.aborted {
            return Err(SorterError::FlowControllerAborted);
        }
        state.consumed += n;
        Ok(())
    }

    /// Return `n` bytes to the quota.
    pub fn release(&self, n: u64) {
        if n == 0 {
            return;
        }
        {
            let mut state = self.state.lock();
            if state.consumed < n {
                error!(
                    consumed = state.consumed,
                    release = n,
                    "memory quota released more than consumed"
                );
                panic!(
                    "memory quota released more than consumed: consumed {}, release {}",
                    state.consumed, n
                );
            }
            state.consumed -= n;
        }
        self.released.notify_waiters();
    }

    /// Abort: every current and future blocking consume fails.
    pub fn abort(&self) {
        self.state.lock().aborted = true;
        self.released.notify_waiters();
    }

    /// Check if the quota was aborted.
    pub fn is_aborted(&self) -> bool {
        self.state.lock().aborted
    }

    /// Bytes currently consumed.
    pub fn consumed(&self) -> u64 {
        self.state.lock().consumed
    }
}

#[derive(Debug, Clone, Copy)]
struct CommitTsSize {
    commit_ts: Ts,
    size: u64,
}

/// [`TableFlowController`] backed by a [`MemoryQuota`].
#[derive(Debug)]
pub struct TableMemoryFlowController {
    quota: MemoryQuota,
    last_commit_ts: AtomicU64,
    queue: Mutex<VecDeque<CommitTsSize>>,
}

impl TableMemoryFlowController {
    /// Create a controller with a quota of `quota` bytes.
    pub fn new(quota: u64) -> Self {
        Self {
            quota: MemoryQuota::new(quota),
            last_commit_ts: AtomicU64::new(0),
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Create a controller from config.
    pub fn from_config(config: &FlowControlConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(config.memory_quota_bytes))
    }

    /// Total quota in bytes.
    pub fn quota(&self) -> u64 {
        self.quota.quota()
    }

    /// Number of consumed entries not yet released.
    pub fn pending_entries(&self) -> usize {
        self.queue.lock().len()
    }
}

#[async_trait]
impl TableFlowController for TableMemoryFlowController {
    async fn consume<'a>(
        &'a self,
        commit_ts: Ts,
        size: u64,
        on_block: BoxFuture<'a, Result<()>>,
    ) -> Result<()> {
        let last_commit_ts = self.last_commit_ts.load(Ordering::Acquire);
        if commit_ts < last_commit_ts {
            error!(
                commit_ts,
                last_commit_ts, "commit ts regressed in flow controller"
            );
            panic!(
                "commit ts regressed in flow controller: commit_ts {}, last_commit_ts {}",
                commit_ts, last_commit_ts
            );
        }

        if commit_ts > last_commit_ts {
            self.last_commit_ts.store(commit_ts, Ordering::Release);
            self.quota.consume_with_blocking(size, on_block).await?;
        } else {
            // same transaction as the previous event
            self.quota.force_consume(size)?;
        }

        self.queue.lock().push_back(CommitTsSize { commit_ts, size });
        Ok(())
    }

    fn release(&self, resolved_ts: Ts) {
        let mut to_release = 0u64;
        {
            let mut queue = self.queue.lock();
            while let Some(front) = queue.front() {
                if front.commit_ts > resolved_ts {
                    break;
                }
                to_release += front.size;
                queue.pop_front();
            }
        }
        debug!(resolved_ts, bytes = to_release, "releasing flow control quota");
        self.quota.release(to_release);
    }

    fn abort(&self) {
        self.quota.abort();
    }

    fn consumption(&self) -> u64 {
        self.quota.consumed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Duration;

    fn noop() -> BoxFuture<'static, Result<()>> {
        async { Ok(()) }.boxed()
    }

    #[tokio::test]
    async fn test_consume_within_quota() {
        let fc = TableMemoryFlowController::new(100);
        fc.consume(1, 10, noop()).await.unwrap();
        fc.consume(2, 20, noop()).await.unwrap();
        assert_eq!(fc.consumption(), 30);
        assert_eq!(fc.pending_entries(), 2);
    }

    #[tokio::test]
    async fn test_event_larger_than_quota() {
        let fc = TableMemoryFlowController::new(100);
        let err = fc.consume(1, 100, noop()).await.unwrap_err();
        assert!(matches!(
            err,
            SorterError::EventLargerThanQuota {
                size: 100,
                quota: 100
            }
        ));
    }

    #[tokio::test]
    async fn test_release_by_resolved_ts() {
        let fc = TableMemoryFlowController::new(100);
        fc.consume(1, 10, noop()).await.unwrap();
        fc.consume(2, 20, noop()).await.unwrap();
        fc.consume(3, 30, noop()).await.unwrap();

        fc.release(2);
        assert_eq!(fc.consumption(), 30);
        assert_eq!(fc.pending_entries(), 1);

        fc.release(10);
        assert_eq!(fc.consumption(), 0);
        assert_eq!(fc.pending_entries(), 0);
    }

    #[tokio::test]
    async fn test_same_transaction_is_force_consumed() {
        let fc = TableMemoryFlowController::new(100);
        fc.consume(5, 90, noop()).await.unwrap();

        // same commit ts: may exceed the quota without blocking
        let blocked = Arc::new(AtomicUsize::new(0));
        let counter = blocked.clone();
        fc.consume(
            5,
            50,
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed(),
        )
        .await
        .unwrap();

        assert_eq!(fc.consumption(), 140);
        assert_eq!(blocked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_blocking_consume_runs_callback_and_waits_for_release() {
        let fc = Arc::new(TableMemoryFlowController::new(100));
        fc.consume(1, 60, noop()).await.unwrap();

        let blocked = Arc::new(AtomicUsize::new(0));
        let task = {
            let fc = fc.clone();
            let blocked = blocked.clone();
            tokio::spawn(async move {
                fc.consume(
                    2,
                    60,
                    async move {
                        blocked.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                    .boxed(),
                )
                .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());
        assert_eq!(blocked.load(Ordering::SeqCst), 1);

        fc.release(1);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(fc.consumption(), 60);
    }

    #[tokio::test]
    async fn test_callback_error_is_returned() {
        let fc = TableMemoryFlowController::new(100);
        fc.consume(1, 90, noop()).await.unwrap();

        let err = fc
            .consume(2, 20, async { Err(SorterError::other("sink gone")) }.boxed())
            .await
            .unwrap_err();
        assert!(matches!(err, SorterError::Other(_)));
    }

    #[tokio::test]
    async fn test_abort_wakes_waiter() {
        let fc = Arc::new(TableMemoryFlowController::new(100));
        fc.consume(1, 90, noop()).await.unwrap();

        let task = {
            let fc = fc.clone();
            tokio::spawn(async move { fc.consume(2, 20, noop()).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        fc.abort();

        let err = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert!(err.is_aborted());

        // force consumption is refused after abort as well
        assert!(fc.consume(2, 1, noop()).await.unwrap_err().is_aborted());
    }

    #[tokio::test]
    #[should_panic(expected = "commit ts regressed")]
    async fn test_commit_ts_regression_panics() {
        let fc = TableMemoryFlowController::new(100);
        fc.consume(10, 1, noop()).await.unwrap();
        let _ = fc.consume(9, 1, noop()).await;
    }

    #[test]
    fn test_from_config() {
        let fc = TableMemoryFlowController::from_config(&FlowControlConfig::with_quota(1024)).unwrap();
        assert_eq!(fc.quota(), 1024);
        assert!(TableMemoryFlowController::from_config(&FlowControlConfig::with_quota(0)).is_err());
    }

    #[test]
    #[should_panic(expected = "released more than consumed")]
    fn test_over_release_panics() {
        let quota = MemoryQuota::new(10);
        quota.force_consume(1).unwrap();
        quota.release(2);
    }
}
