//! Transfer tuning knobs.

use crate::error::TransferError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Entries admitted concurrently by default.
pub const DEFAULT_MAX_PARALLEL: usize = 20;

/// Files at least this large are streamed instead of buffered (1 MiB).
pub const DEFAULT_STREAM_THRESHOLD: u64 = 1024 * 1024;

/// Largest file the whole-blob download fallback reads into memory (32 MiB).
pub const DEFAULT_MAX_BLOB_SIZE: u64 = 32 * 1024 * 1024;

/// Minimum spacing between intermediate progress reports.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// How an upload confirms replacing existing top-level entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverwritePrompt {
    /// One question per colliding entry.
    #[default]
    Each,
    /// One question listing every colliding entry; the answer applies to
    /// all of them.
    Batch,
}

/// Configuration shared by uploads and downloads.
///
/// Deserializes from a TOML table; missing keys take their defaults.
///
/// ```toml
/// max_parallel = 8
/// stream_threshold = 4194304
/// progress_interval = "500ms"
/// overwrite_prompt = "batch"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Maximum entries in flight at once.
    pub max_parallel: usize,
    /// Size in bytes from which file content is streamed.
    pub stream_threshold: u64,
    /// Size ceiling in bytes of the whole-blob download fallback.
    pub max_blob_size: u64,
    /// Trailing-edge window of the progress aggregator.
    #[serde(with = "humantime_serde")]
    pub progress_interval: Duration,
    pub overwrite_prompt: OverwritePrompt,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_parallel: DEFAULT_MAX_PARALLEL,
            stream_threshold: DEFAULT_STREAM_THRESHOLD,
            max_blob_size: DEFAULT_MAX_BLOB_SIZE,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            overwrite_prompt: OverwritePrompt::Each,
        }
    }
}

impl TransferConfig {
    /// Parse a TOML document holding the transfer table's keys.
    pub fn from_toml_str(s: &str) -> Result<Self, TransferError> {
        let config: Self = toml::from_str(s).map_err(|e| TransferError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<(), TransferError> {
        if self.max_parallel == 0 {
            return Err(TransferError::Config(
                "max_parallel must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether a file of `size` bytes takes the streamed path.
    pub fn is_streamed(&self, size: u64) -> bool {
        size >= self.stream_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TransferConfig::default();
        assert_eq!(config.max_parallel, 20);
        assert_eq!(config.stream_threshold, 1024 * 1024);
        assert_eq!(config.max_blob_size, 32 * 1024 * 1024);
        assert_eq!(config.progress_interval, Duration::from_secs(1));
        assert_eq!(config.overwrite_prompt, OverwritePrompt::Each);
    }

    #[test]
    fn test_overwrite_prompt_from_toml() {
        let config = TransferConfig::from_toml_str(r#"overwrite_prompt = "batch""#).unwrap();
        assert_eq!(config.overwrite_prompt, OverwritePrompt::Batch);
        assert!(TransferConfig::from_toml_str(r#"overwrite_prompt = "never""#).is_err());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = TransferConfig::from_toml_str(
            r#"
            max_parallel = 4
            progress_interval = "250ms"
            "#,
        )
        .unwrap();
        assert_eq!(config.max_parallel, 4);
        assert_eq!(config.progress_interval, Duration::from_millis(250));
        assert_eq!(config.stream_threshold, DEFAULT_STREAM_THRESHOLD);
    }

    #[test]
    fn test_zero_parallelism_rejected() {
        let err = TransferConfig::from_toml_str("max_parallel = 0").unwrap_err();
        assert!(matches!(err, TransferError::Config(_)));
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let config = TransferConfig::default();
        assert!(!config.is_streamed(DEFAULT_STREAM_THRESHOLD - 1));
        assert!(config.is_streamed(DEFAULT_STREAM_THRESHOLD));
    }
}
