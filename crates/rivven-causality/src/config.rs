//! Causality relay configuration

use crate::error::{CausalityError, Result};
use serde::{Deserialize, Serialize};

/// Configuration of a causality relay, part of a sync task's settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CausalityConfig {
    /// Capacity of the relay's outbound job queue
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    /// Forward jobs without conflict detection
    #[serde(default)]
    pub disable_detect: bool,

    /// Task name, used for metric labels
    #[serde(default)]
    pub task: String,

    /// Upstream source id, used for metric labels
    #[serde(default)]
    pub source: String,
}

fn default_queue_size() -> usize {
    1024
}

impl Default for CausalityConfig {
    fn default() -> Self {
        Self {
            queue_size: default_queue_size(),
            disable_detect: false,
            task: String::new(),
            source: String::new(),
        }
    }
}

impl CausalityConfig {
    /// Create a new builder.
    pub fn builder() -> CausalityConfigBuilder {
        CausalityConfigBuilder::default()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.queue_size == 0 {
            return Err(CausalityError::config("queue-size must be > 0"));
        }
        Ok(())
    }
}

/// Builder for CausalityConfig.
#[derive(Default)]
pub struct CausalityConfigBuilder {
    config: CausalityConfig,
}

impl CausalityConfigBuilder {
    pub fn queue_size(mut self, size: usize) -> Self {
        self.config.queue_size = size;
        self
    }

    pub fn disable_detect(mut self, disable: bool) -> Self {
        self.config.disable_detect = disable;
        self
    }

    pub fn task(mut self, task: impl Into<String>) -> Self {
        self.config.task = task.into();
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.config.source = source.into();
        self
    }

    pub fn build(self) -> CausalityConfig {
        self.config
    }
}
