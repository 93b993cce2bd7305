//! Ingestion configuration.
//!
//! Every field has a default, so an empty JSON object is a valid config.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::pipeline::PipelineConfig;
use crate::retry::RetryPolicy;

/// Settings for one ingestion run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Worker pool settings.
    pub pipeline: PipelineConfig,
    /// Policy for uniqueness races and duplicate resolution in the store.
    pub contention_retry: RetryPolicy,
    /// Raw lines per bulk write when staging.
    pub staging_chunk_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            contention_retry: RetryPolicy::unbounded(),
            staging_chunk_size: 1000,
        }
    }
}

impl IngestConfig {
    /// Parses and validates a JSON config.
    ///
    /// # Examples
    ///
    /// ```
    /// use ownergraph::config::IngestConfig;
    ///
    /// let config = IngestConfig::from_json_str(r#"{"pipeline": {"workers": 8}}"#).unwrap();
    /// assert_eq!(config.pipeline.workers, 8);
    /// assert_eq!(config.pipeline.queue_capacity, 100);
    /// ```
    pub fn from_json_str(raw: &str) -> Result<Self, ValidationError> {
        let config: Self = serde_json::from_str(raw).map_err(|e| ValidationError::InvalidConfig {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ValidationError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| ValidationError::InvalidConfig {
            reason: format!("cannot read {}: {e}", path.display()),
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.pipeline.validate()?;
        if self.staging_chunk_size == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "staging_chunk_size must be at least 1".to_string(),
            });
        }
        if self.contention_retry.max_attempts == Some(0) {
            return Err(ValidationError::InvalidConfig {
                reason: "contention_retry.max_attempts must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
