//! # Common sorter types
//!
//! - [`PolymorphicEvent`] - Row change or resolved marker
//! - [`PipelineMessage`] - Message between pipeline nodes
//! - [`SorterError`] - Error type with classification
//! - [`SorterConfig`] / [`FlowControlConfig`] - Stage configuration
//! - [`Mounter`] - Row decoder fed by the stage
//! - [`TableSorterMetrics`] - Metrics facade handles

mod config;
mod error;
mod event;
mod metrics;
mod traits;

pub use config::*;
pub use error::*;
pub use event::*;
pub use metrics::*;
pub use traits::*;
