//! # rivven-sorter - Per-table sort stage for Rivven CDC
//!
//! Orders a table's raw change stream by commit timestamp, gates it with a
//! per-table memory quota and forwards a monotonic resolved-ts signal, either
//! to the next node of a channel pipeline or through an actor mailbox.
//!
//! ## Architecture
//!
//! ```text
//!  raw events ──► ┌─────────────┐   sorted   ┌──────────────┐
//!                 │ EventSorter │ ─────────► │ dispatch loop│
//!                 │memory/unified│            └──────┬───────┘
//!                 └─────────────┘                   │ consume(commit_ts, size)
//!                                                   ▼
//!                                         ┌───────────────────┐
//!                                         │TableFlowController│
//!                                         └─────────┬─────────┘
//!                                                   │
//!                          ┌────────────────────────┼──────────────────┐
//!                          ▼                        ▼                  ▼
//!                     ┌─────────┐        legacy: next node    actor: output queue
//!                     │ Mounter │                                  + Tick / Barrier
//!                     └─────────┘
//! ```
//!
//! ## Guarantees
//!
//! - Resolved markers forwarded for a table never go backwards.
//! - Every row event precedes the resolved marker covering it.
//! - If the sorter produces no resolved ts for a while, the stage
//!   interpolates one at the last completed commit ts so the sink can flush
//!   and release quota.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # async fn example(
//! #     mounter: std::sync::Arc<dyn rivven_sorter::Mounter>,
//! #     next: tokio::sync::mpsc::Sender<rivven_sorter::PipelineMessage>,
//! # ) -> rivven_sorter::Result<()> {
//! use rivven_sorter::{
//!     NodeContext, PipelineMessage, PolymorphicEvent, RawKvEntry, SortEngine, SorterConfig,
//!     SorterNode, TableMemoryFlowController,
//! };
//! use std::sync::Arc;
//!
//! let config = SorterConfig::builder().sort_engine(SortEngine::Memory).build();
//! let flow = Arc::new(TableMemoryFlowController::new(64 * 1024 * 1024));
//! let node = SorterNode::new("db.orders", 42, 0, flow, mounter, config);
//!
//! let (errors, _errors_rx) = tokio::sync::mpsc::unbounded_channel();
//! node.start_legacy(NodeContext::new(next, errors))?;
//!
//! let raw = RawKvEntry::put("key", "value", 1, 2);
//! node.submit(PipelineMessage::event(PolymorphicEvent::new(raw).into_ref())).await?;
//! node.submit(PipelineMessage::event(PolymorphicEvent::resolved(2).into_ref())).await?;
//!
//! node.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod actor;
pub mod common;
pub mod engine;
pub mod flow_control;
pub mod node;

pub use actor::{ActorId, ActorRouter, ControlMessage, MailboxRouter};
pub use common::{
    ErrorCategory, EventRef, FlowControlConfig, Mounter, OpType, PipelineMessage,
    PolymorphicEvent, RawKvEntry, Result, SortEngine, SorterConfig, SorterError, TableId, Ts,
};
pub use engine::{build_sorter, EventSorter};
pub use flow_control::{MemoryQuota, TableFlowController, TableMemoryFlowController};
pub use node::{NodeContext, SorterNode};
