//! Sorter stage configuration
//!
//! ```rust
//! use rivven_sorter::common::{SortEngine, SorterConfig};
//!
//! let config = SorterConfig::builder()
//!     .sort_engine(SortEngine::Memory)
//!     .output_channel_size(128)
//!     .build();
//!
//! assert!(config.validate().is_ok());
//! ```

use crate::common::{Result, SorterError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Sort engine implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortEngine {
    /// Heap sorter, everything in memory
    Memory,
    /// Memory sorter that spills sorted runs into the sort dir
    Unified,
    /// Deprecated alias of `Unified`
    File,
}

impl SortEngine {
    /// Get the configuration name of the engine.
    pub fn as_str(&self) -> &'static str {
        match self {
            SortEngine::Memory => "memory",
            SortEngine::Unified => "unified",
            SortEngine::File => "file",
        }
    }

    /// Check if the engine needs a sort dir.
    pub fn uses_sort_dir(&self) -> bool {
        matches!(self, SortEngine::Unified | SortEngine::File)
    }
}

impl FromStr for SortEngine {
    type Err = SorterError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(SortEngine::Memory),
            "unified" => Ok(SortEngine::Unified),
            "file" => Ok(SortEngine::File),
            _ => Err(SorterError::unknown_sort_engine(s)),
        }
    }
}

impl std::fmt::Display for SortEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for a table's sorter stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SorterConfig {
    /// Sort engine name: `memory`, `unified` or `file`
    ///
    /// Kept as a string so an unknown engine surfaces as a table error at
    /// start time rather than as a deserialization failure of the whole task.
    #[serde(default = "default_sort_engine")]
    pub sort_engine: String,

    /// Working directory of the unified sorter
    #[serde(default = "default_sort_dir")]
    pub sort_dir: PathBuf,

    /// Capacity of the sorter input channel
    #[serde(default = "default_input_channel_size")]
    pub input_channel_size: usize,

    /// Capacity of the sorter and stage output channels
    #[serde(default = "default_output_channel_size")]
    pub output_channel_size: usize,

    /// Interpolate a resolved ts if none was sent for this long
    #[serde(default = "default_resolved_ts_interpolate_interval_ms")]
    pub resolved_ts_interpolate_interval_ms: u64,

    /// How often the table memory consumption is sampled
    #[serde(default = "default_metrics_flush_interval_ms")]
    pub metrics_flush_interval_ms: u64,

    /// Buffered bytes after which the unified sorter spills a run to disk
    #[serde(default = "default_unified_spill_threshold_bytes")]
    pub unified_spill_threshold_bytes: usize,

    /// Owning changefeed, used for metric labels and sort dir names
    #[serde(default = "default_changefeed_id")]
    pub changefeed_id: String,

    /// Advertised address of this capture, used for metric labels
    #[serde(default)]
    pub capture_addr: String,
}

fn default_sort_engine() -> String {
    SortEngine::Unified.as_str().to_string()
}

fn default_sort_dir() -> PathBuf {
    std::env::temp_dir().join("rivven_sorter")
}

fn default_input_channel_size() -> usize {
    128
}

fn default_output_channel_size() -> usize {
    64
}

fn default_resolved_ts_interpolate_interval_ms() -> u64 {
    200
}

fn default_metrics_flush_interval_ms() -> u64 {
    5_000
}

fn default_unified_spill_threshold_bytes() -> usize {
    64 * 1024 * 1024
}

fn default_changefeed_id() -> String {
    "default".to_string()
}

impl Default for SorterConfig {
    fn default() -> Self {
        Self {
            sort_engine: default_sort_engine(),
            sort_dir: default_sort_dir(),
            input_channel_size: default_input_channel_size(),
            output_channel_size: default_output_channel_size(),
            resolved_ts_interpolate_interval_ms: default_resolved_ts_interpolate_interval_ms(),
            metrics_flush_interval_ms: default_metrics_flush_interval_ms(),
            unified_spill_threshold_bytes: default_unified_spill_threshold_bytes(),
            changefeed_id: default_changefeed_id(),
            capture_addr: String::new(),
        }
    }
}

impl SorterConfig {
    /// Create a new builder.
    pub fn builder() -> SorterConfigBuilder {
        SorterConfigBuilder::default()
    }

    /// Parse the configured sort engine.
    pub fn engine(&self) -> Result<SortEngine> {
        self.sort_engine.parse()
    }

    /// Resolved-ts interpolation interval.
    pub fn resolved_ts_interpolate_interval(&self) -> Duration {
        Duration::from_millis(self.resolved_ts_interpolate_interval_ms)
    }

    /// Metrics sampling interval.
    pub fn metrics_flush_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_flush_interval_ms)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        let engine = self.engine()?;
        if engine.uses_sort_dir() && self.sort_dir.as_os_str().is_empty() {
            return Err(SorterError::config(format!(
                "sort_dir must be set for the {} sort engine",
                engine
            )));
        }
        if self.input_channel_size == 0 {
            return Err(SorterError::config("input_channel_size must be > 0"));
        }
        if self.output_channel_size == 0 {
            return Err(SorterError::config("output_channel_size must be > 0"));
        }
        if self.metrics_flush_interval_ms == 0 {
            return Err(SorterError::config("metrics_flush_interval_ms must be > 0"));
        }
        if self.unified_spill_threshold_bytes == 0 {
            return Err(SorterError::config(
                "unified_spill_threshold_bytes must be > 0",
            ));
        }
        Ok(())
    }
}

/// Builder for SorterConfig.
#[derive(Default)]
pub struct SorterConfigBuilder {
    config: SorterConfig,
}

impl SorterConfigBuilder {
    /// Set the sort engine.
    pub fn sort_engine(mut self, engine: SortEngine) -> Self {
        self.config.sort_engine = engine.as_str().to_string();
        self
    }

    /// Set the sort engine by name (validated at start).
    pub fn sort_engine_name(mut self, name: impl Into<String>) -> Self {
        self.config.sort_engine = name.into();
        self
    }

    /// Set the unified sorter working directory.
    pub fn sort_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.sort_dir = dir.into();
        self
    }

    /// Set the sorter input channel capacity.
    pub fn input_channel_size(mut self, size: usize) -> Self {
        self.config.input_channel_size = size;
        self
    }

    /// Set the output channel capacity.
    pub fn output_channel_size(mut self, size: usize) -> Self {
        self.config.output_channel_size = size;
        self
    }

    /// Set the resolved-ts interpolation interval.
    pub fn resolved_ts_interpolate_interval(mut self, interval: Duration) -> Self {
        self.config.resolved_ts_interpolate_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the metrics sampling interval.
    pub fn metrics_flush_interval(mut self, interval: Duration) -> Self {
        self.config.metrics_flush_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the unified sorter spill threshold.
    pub fn unified_spill_threshold_bytes(mut self, bytes: usize) -> Self {
        self.config.unified_spill_threshold_bytes = bytes;
        self
    }

    /// Set the changefeed id.
    pub fn changefeed_id(mut self, id: impl Into<String>) -> Self {
        self.config.changefeed_id = id.into();
        self
    }

    /// Set the capture address.
    pub fn capture_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.capture_addr = addr.into();
        self
    }

    /// Build the configuration.
    pub fn build(self) -> SorterConfig {
        self.config
    }
}

/// Per-table memory quota configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowControlConfig {
    /// Bytes of unflushed row data a table may hold
    #[serde(default = "default_memory_quota_bytes")]
    pub memory_quota_bytes: u64,
}

fn default_memory_quota_bytes() -> u64 {
    10 * 1024 * 1024
}

impl Default for FlowControlConfig {
    fn default() -> Self {
        Self {
            memory_quota_bytes: default_memory_quota_bytes(),
        }
    }
}

impl FlowControlConfig {
    /// Create a config with the given quota.
    pub fn with_quota(memory_quota_bytes: u64) -> Self {
        Self { memory_quota_bytes }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.memory_quota_bytes == 0 {
            return Err(SorterError::config("memory_quota_bytes must be > 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_engine_parse() {
        assert_eq!("memory".parse::<SortEngine>().unwrap(), SortEngine::Memory);
        assert_eq!("Unified".parse::<SortEngine>().unwrap(), SortEngine::Unified);
        assert_eq!("file".parse::<SortEngine>().unwrap(), SortEngine::File);

        let err = "leveldb".parse::<SortEngine>().unwrap_err();
        assert!(matches!(err, SorterError::UnknownSortEngine(ref e) if e == "leveldb"));
    }

    #[test]
    fn test_default_config() {
        let config = SorterConfig::default();
        assert_eq!(config.engine().unwrap(), SortEngine::Unified);
        assert_eq!(config.output_channel_size, 64);
        assert_eq!(
            config.resolved_ts_interpolate_interval(),
            Duration::from_millis(200)
        );
        assert_eq!(config.metrics_flush_interval(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = SorterConfig::builder()
            .sort_engine(SortEngine::Memory)
            .input_channel_size(16)
            .output_channel_size(8)
            .resolved_ts_interpolate_interval(Duration::from_millis(50))
            .changefeed_id("cf-1")
            .capture_addr("127.0.0.1:8300")
            .build();

        assert_eq!(config.sort_engine, "memory");
        assert_eq!(config.input_channel_size, 16);
        assert_eq!(config.output_channel_size, 8);
        assert_eq!(config.resolved_ts_interpolate_interval_ms, 50);
        assert_eq!(config.changefeed_id, "cf-1");
        assert_eq!(config.capture_addr, "127.0.0.1:8300");
    }

    #[test]
    fn test_config_validation() {
        let config = SorterConfig::builder().sort_engine_name("rocksdb").build();
        assert!(matches!(
            config.validate(),
            Err(SorterError::UnknownSortEngine(_))
        ));

        let config = SorterConfig::builder()
            .sort_engine(SortEngine::Unified)
            .sort_dir("")
            .build();
        assert!(matches!(config.validate(), Err(SorterError::Config(_))));

        let config = SorterConfig::builder()
            .sort_engine(SortEngine::Memory)
            .sort_dir("")
            .build();
        assert!(config.validate().is_ok());

        let config = SorterConfig::builder().output_channel_size(0).build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_deserialize_defaults() {
        let config: SorterConfig = serde_json::from_str(r#"{"sort_engine": "memory"}"#).unwrap();
        assert_eq!(config.engine().unwrap(), SortEngine::Memory);
        assert_eq!(config.input_channel_size, 128);
        assert_eq!(config.unified_spill_threshold_bytes, 64 * 1024 * 1024);
        assert_eq!(config.changefeed_id, "default");
    }

    #[test]
    fn test_flow_control_config() {
        assert_eq!(
            FlowControlConfig::default().memory_quota_bytes,
            10 * 1024 * 1024
        );
        assert!(FlowControlConfig::with_quota(1).validate().is_ok());
        assert!(FlowControlConfig::with_quota(0).validate().is_err());
    }
}
