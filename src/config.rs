//! Configuration for the screening pipeline.
//!
//! All process-wide tunables (archive root, cache location and TTL, retry
//! and concurrency knobs) live in an explicit [`Settings`] struct passed to
//! the components at construction. Defaults match the documented behavior;
//! a JSON settings file can override any field.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ============================================================================
// Settings
// ============================================================================

/// Top-level settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Per-stock data source configuration
    #[serde(default)]
    pub data: DataConfig,

    /// Universe provider configuration
    #[serde(default)]
    pub universe: UniverseConfig,

    /// Batch fetch configuration
    #[serde(default)]
    pub fetch: FetchConfig,
}

impl Settings {
    /// Load settings from a JSON file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Load from a JSON file if it exists, otherwise use defaults.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        match path {
            Some(p) if p.exists() => Self::load(p).unwrap_or_else(|e| {
                tracing::warn!(path = %p.display(), error = %e, "Failed to load settings, using defaults");
                Self::default()
            }),
            _ => Self::default(),
        }
    }
}

// ============================================================================
// Data Source Configuration
// ============================================================================

/// Configuration for [`crate::data::DailyBarSource`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Root of the local binary day-bar archive (e.g. a TDX `vipdoc`
    /// directory). When unset, the local archive is skipped and every
    /// fetch goes straight to the remote API.
    #[serde(default)]
    pub archive_root: Option<PathBuf>,

    /// Timeout for each remote request, in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            archive_root: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_request_timeout_secs() -> u64 {
    30
}

// ============================================================================
// Universe Configuration
// ============================================================================

/// Configuration for [`crate::data::UniverseProvider`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniverseConfig {
    /// Location of the universe cache file
    #[serde(default = "default_cache_path")]
    pub cache_path: PathBuf,

    /// Cache freshness window in hours
    #[serde(default = "default_cache_ttl_hours")]
    pub cache_ttl_hours: i64,

    /// Polite delay between per-industry constituent calls, in milliseconds
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
}

impl Default for UniverseConfig {
    fn default() -> Self {
        Self {
            cache_path: default_cache_path(),
            cache_ttl_hours: default_cache_ttl_hours(),
            request_delay_ms: default_request_delay_ms(),
        }
    }
}

fn default_cache_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ashare-screener")
        .join("universe.json")
}

fn default_cache_ttl_hours() -> i64 {
    24
}

fn default_request_delay_ms() -> u64 {
    500
}

// ============================================================================
// Fetch Configuration
// ============================================================================

/// Retry and concurrency configuration for the batch fetch stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Maximum retries per stock after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial retry delay in seconds; doubles after every failed attempt
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: u64,

    /// Width of the concurrent fetch pool
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_secs: default_initial_delay_secs(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_secs() -> u64 {
    2
}

fn default_concurrency() -> usize {
    10
}

// ============================================================================
// Tests
// ============================================================================
