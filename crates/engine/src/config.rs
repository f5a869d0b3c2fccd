//! Federation configuration via `cohort.toml`
//!
//! On first start a commented default `cohort.toml` can be written next to
//! the process; edit it and restart to change settings.

use cohort_core::{CohortError, CohortResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Config file name
pub const CONFIG_FILE_NAME: &str = "cohort.toml";

/// Federation configuration loaded from `cohort.toml`.
///
/// # Example
///
/// ```toml
/// max_wait_ms = 30000
/// worker_threads = 8
/// max_queue_depth = 4096
/// max_detached_calls = 64
/// parallel_queries = true
/// augment_query_classifications = true
/// # local_metadata_collection_id = "repo-1"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederationConfig {
    /// How long a parallel request waits for members, in milliseconds
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
    /// Number of worker threads issuing member requests
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Maximum queued member requests before submission is refused
    #[serde(default = "default_max_queue_depth")]
    pub max_queue_depth: usize,
    /// Abandoned member calls that may hold a worker at once while a
    /// replacement worker takes their place; 0 disables replacements
    #[serde(default = "default_max_detached_calls")]
    pub max_detached_calls: usize,
    /// Member tried first for creates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_metadata_collection_id: Option<String>,
    /// Ask members concurrently for queries and retrievals
    #[serde(default = "default_true")]
    pub parallel_queries: bool,
    /// Add classifications homed at non-contributing members to entity query results
    #[serde(default = "default_true")]
    pub augment_query_classifications: bool,
}

fn default_max_wait_ms() -> u64 {
    30_000
}

fn default_worker_threads() -> usize {
    8
}

fn default_max_queue_depth() -> usize {
    4096
}

fn default_max_detached_calls() -> usize {
    64
}

fn default_true() -> bool {
    true
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            max_wait_ms: default_max_wait_ms(),
            worker_threads: default_worker_threads(),
            max_queue_depth: default_max_queue_depth(),
            max_detached_calls: default_max_detached_calls(),
            local_metadata_collection_id: None,
            parallel_queries: true,
            augment_query_classifications: true,
        }
    }
}

impl FederationConfig {
    /// Wait budget for one parallel request
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> CohortResult<()> {
        if self.worker_threads == 0 {
            return Err(CohortError::invalid_parameter(
                "worker_threads in cohort.toml must be at least 1",
            ));
        }
        if self.max_queue_depth == 0 {
            return Err(CohortError::invalid_parameter(
                "max_queue_depth in cohort.toml must be at least 1",
            ));
        }
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Cohort federation configuration
#
# How long a parallel request waits for members, in milliseconds.
# Members that have not answered by then are reported as timed out.
max_wait_ms = 30000

# Worker threads issuing member requests
worker_threads = 8

# Maximum queued member requests before new requests are refused
max_queue_depth = 4096

# Member calls still running after their request gave up on them keep their
# worker until the member returns. Up to this many such calls are covered
# by a replacement worker; 0 disables replacements.
max_detached_calls = 64

# Ask members concurrently for queries and retrievals (default: true).
# When false every member is asked in turn on the calling thread.
parallel_queries = true

# Add classifications homed at members that did not return an entity to
# entity query results (default: true)
augment_query_classifications = true

# Member tried first when creating entities and relationships
# local_metadata_collection_id = "repo-1"
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> CohortResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CohortError::repository_error(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: FederationConfig = toml::from_str(&content).map_err(|e| {
            CohortError::invalid_parameter(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> CohortResult<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                CohortError::repository_error(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> CohortResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| {
            CohortError::repository_error(format!("Failed to serialize config: {}", e))
        })?;
        std::fs::write(path, content).map_err(|e| {
            CohortError::repository_error(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}
