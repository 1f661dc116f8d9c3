//! # rivven-causality - Conflict detection for parallel DML apply
//!
//! Replicated row changes are applied by several workers in parallel. Two
//! changes touching the same row (through any primary or unique key) must be
//! applied in their original order; unrelated changes need not be.
//!
//! The [`relay`] task tags each DML [`Job`] with the root key of its causal
//! group, so workers can route a group to one worker. When a job links two
//! groups that may already be in flight on different workers, the relay
//! first emits a [`JobType::Conflict`] barrier and starts a fresh relation
//! table.
//!
//! ```text
//!  DML jobs ──► ┌─────────────────┐ ──► insert(k1) ──► update(k1) ──► CONFLICT ──► insert(k1,k2) ──► workers
//!               │ causality relay │
//!               └─────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use rivven_causality::{Causality, gen_multiple_keys, TableInfo};
//! use serde_json::json;
//!
//! let table = TableInfo::builder("test", "tb")
//!     .column("a")
//!     .column("b")
//!     .primary_key(["a"])
//!     .unique_key("b", ["b"])
//!     .build()
//!     .unwrap();
//!
//! let mut causality = Causality::new();
//! let keys = gen_multiple_keys(&table, &[json!(1), json!(2)]);
//! assert!(!causality.detect_conflict(&keys));
//! assert_eq!(causality.add(&keys).as_deref(), Some("1.a."));
//! ```

pub mod config;
pub mod detector;
pub mod error;
pub mod job;
pub mod keys;
pub mod metrics;
pub mod relay;
pub mod schema;

pub use config::CausalityConfig;
pub use detector::Causality;
pub use error::{CausalityError, ErrorCategory, Result};
pub use job::{DmlChange, Job, JobType};
pub use keys::{column_value, gen_multiple_keys};
pub use relay::{causality_wrap, CausalityRelay};
pub use schema::{IndexPart, TableInfo};
