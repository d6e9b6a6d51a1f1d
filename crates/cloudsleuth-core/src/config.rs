//! Run configuration, loadable from a TOML file.
//!
//! Every field has a default, so an empty file (or no file) is valid.
//! Command-line flags override loaded values in the binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CrawlError;
use crate::inspect::links::DEFAULT_LINK_PATTERN;
use crate::progress::DEFAULT_RECENT_WINDOW;

/// Upper bound on the default worker count; content inspection is
/// network-bound, not CPU-bound.
pub const MAX_DEFAULT_CONCURRENCY: usize = 8;

/// Folder depths exported when no limit is given.
pub const DEFAULT_MAX_LEVEL: u32 = 999;

/// Bytes of document content a worker reads per leaf.
pub const DEFAULT_MAX_INSPECT_BYTES: u64 = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// Directory for report artifacts.
    pub output_dir: PathBuf,
    /// Directory for checkpoint artifacts.
    pub session_dir: PathBuf,
    /// Deepest folder level written to a folders report.
    pub max_level: u32,
    /// Look up revision history for each leaf to find its creation time.
    pub resolve_revisions: bool,
    pub progress_interval_ms: u64,
    pub recent_window: usize,
    pub inspect: InspectConfig,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            session_dir: PathBuf::from("session"),
            max_level: DEFAULT_MAX_LEVEL,
            resolve_revisions: true,
            progress_interval_ms: 1_000,
            recent_window: DEFAULT_RECENT_WINDOW,
            inspect: InspectConfig::default(),
        }
    }
}

impl CrawlConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, CrawlError> {
        let config: Self = toml::from_str(text).map_err(|e| CrawlError::InvalidConfig {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, CrawlError> {
        let text = std::fs::read_to_string(path).map_err(|e| CrawlError::io(path, e))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), CrawlError> {
        if self.inspect.concurrency == 0 {
            return Err(CrawlError::InvalidConfig {
                message: "inspect.concurrency must be at least 1".into(),
            });
        }
        if self.inspect.max_inspect_bytes == 0 {
            return Err(CrawlError::InvalidConfig {
                message: "inspect.max_inspect_bytes must be at least 1".into(),
            });
        }
        if self.recent_window == 0 {
            return Err(CrawlError::InvalidConfig {
                message: "recent_window must be at least 1".into(),
            });
        }
        Ok(())
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms.max(50))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InspectConfig {
    pub enabled: bool,
    /// Maximum concurrent inspection workers.
    pub concurrency: usize,
    /// Extensions (without the dot) eligible for inspection.
    pub extensions: Vec<String>,
    /// Regex matching links back into the storage system.
    pub link_pattern: String,
    /// Where scratch downloads go; the system temp dir when unset.
    pub scratch_dir: Option<PathBuf>,
    /// Cap on the text read from one leaf, summed over archive parts.
    pub max_inspect_bytes: u64,
}

impl Default for InspectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            concurrency: num_cpus::get().clamp(1, MAX_DEFAULT_CONCURRENCY),
            extensions: ["docx", "xlsx", "pptx", "txt", "md", "csv"]
                .into_iter()
                .map(String::from)
                .collect(),
            link_pattern: DEFAULT_LINK_PATTERN.to_string(),
            scratch_dir: None,
            max_inspect_bytes: DEFAULT_MAX_INSPECT_BYTES,
        }
    }
}
