//! DML jobs flowing through the causality relay

use crate::keys::gen_multiple_keys;
use crate::schema::TableInfo;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Kind of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Insert,
    Update,
    Delete,
    /// Flush everything queued so far; resets causality
    Flush,
    /// Barrier: workers must drain before applying later jobs
    Conflict,
}

impl JobType {
    /// Check if this is a row change.
    pub fn is_dml(&self) -> bool {
        matches!(self, JobType::Insert | JobType::Update | JobType::Delete)
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobType::Insert => write!(f, "insert"),
            JobType::Update => write!(f, "update"),
            JobType::Delete => write!(f, "delete"),
            JobType::Flush => write!(f, "flush"),
            JobType::Conflict => write!(f, "conflict"),
        }
    }
}

/// Row change of a DML job.
#[derive(Debug, Clone, PartialEq)]
pub struct DmlChange {
    pub table: Arc<TableInfo>,
    /// Row before the change (update, delete)
    pub old_values: Option<Vec<Value>>,
    /// Row after the change (insert, update)
    pub values: Option<Vec<Value>>,
}

impl DmlChange {
    /// Keys touched by the change: old row keys, then new row keys.
    pub fn identify_keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        if let Some(old) = &self.old_values {
            keys.extend(gen_multiple_keys(&self.table, old));
        }
        if let Some(new) = &self.values {
            keys.extend(gen_multiple_keys(&self.table, new));
        }
        keys
    }
}

/// Unit of work for the apply workers.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub tp: JobType,
    pub dml: Option<DmlChange>,
    /// Causal root of the job's keys; workers hash jobs of one group together
    pub dispatch_key: Option<String>,
}

impl Job {
    fn dml(tp: JobType, dml: DmlChange) -> Self {
        Self {
            tp,
            dml: Some(dml),
            dispatch_key: None,
        }
    }

    /// Insert of `values`.
    pub fn insert(table: Arc<TableInfo>, values: Vec<Value>) -> Self {
        Self::dml(
            JobType::Insert,
            DmlChange {
                table,
                old_values: None,
                values: Some(values),
            },
        )
    }

    /// Update from `old_values` to `values`.
    pub fn update(table: Arc<TableInfo>, old_values: Vec<Value>, values: Vec<Value>) -> Self {
        Self::dml(
            JobType::Update,
            DmlChange {
                table,
                old_values: Some(old_values),
                values: Some(values),
            },
        )
    }

    /// Delete of the row `old_values`.
    pub fn delete(table: Arc<TableInfo>, old_values: Vec<Value>) -> Self {
        Self::dml(
            JobType::Delete,
            DmlChange {
                table,
                old_values: Some(old_values),
                values: None,
            },
        )
    }

    /// Flush marker.
    pub fn flush() -> Self {
        Self {
            tp: JobType::Flush,
            dml: None,
            dispatch_key: None,
        }
    }

    /// Conflict barrier.
    pub fn conflict() -> Self {
        Self {
            tp: JobType::Conflict,
            dml: None,
            dispatch_key: None,
        }
    }

    /// Keys touched by the job; empty for markers.
    pub fn keys(&self) -> Vec<String> {
        self.dml
            .as_ref()
            .map(DmlChange::identify_keys)
            .unwrap_or_default()
    }
}
