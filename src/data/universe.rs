//! Stock universe provider with a time-boxed disk cache.
//!
//! The universe is fetched through a two-tier fallback chain: the primary
//! tier enumerates industry boards and their constituents (yielding an
//! industry label per stock), the secondary tier is a flat all-codes lookup
//! with industry "unknown". Successful fetches are persisted as JSON with
//! a fetch timestamp; the cache is served while younger than the TTL.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::config::UniverseConfig;
use crate::error::SourceError;

use super::eastmoney::IndustryBoard;

/// Industry label assigned when no classification is available.
pub const UNKNOWN_INDUSTRY: &str = "unknown";

// ============================================================================
// Universe Types
// ============================================================================

/// One tradable instrument in the scan universe.
///
/// Persisted with the origin's Chinese field labels so existing cache
/// files remain readable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniverseEntry {
    /// 6-digit stock code
    #[serde(rename = "代码")]
    pub code: String,
    /// Display name
    #[serde(rename = "名称")]
    pub name: String,
    /// Industry label, [`UNKNOWN_INDUSTRY`] when unclassified
    #[serde(rename = "所属行业")]
    pub industry: String,
}

/// On-disk cache payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniverseCache {
    /// When the universe was fetched
    #[serde(rename = "date")]
    pub fetched_at: DateTime<Utc>,
    /// The cached entries
    pub data: Vec<UniverseEntry>,
}

// ============================================================================
// Source Trait
// ============================================================================

/// Remote source seam for the universe provider.
#[async_trait]
pub trait UniverseSource: Send + Sync {
    /// Enumerate industry boards (primary tier).
    async fn industry_boards(&self) -> Result<Vec<IndustryBoard>, SourceError>;

    /// List (code, name) constituents of one board (primary tier).
    async fn board_members(&self, board: &IndustryBoard) -> Result<Vec<(String, String)>, SourceError>;

    /// Flat (code, name) list of every stock (secondary tier).
    async fn all_stocks(&self) -> Result<Vec<(String, String)>, SourceError>;
}

// ============================================================================
// Provider
// ============================================================================

/// Cached universe provider.
pub struct UniverseProvider<S> {
    source: S,
    config: UniverseConfig,
}

impl<S: UniverseSource> UniverseProvider<S> {
    pub fn new(source: S, config: UniverseConfig) -> Self {
        Self { source, config }
    }

    /// Get the scan universe.
    ///
    /// Serves the disk cache while fresh unless `force_refresh` is set.
    /// Returns an empty list when every source fails; the caller decides
    /// whether that is terminal.
    pub async fn get_universe(&self, force_refresh: bool) -> Vec<UniverseEntry> {
        if !force_refresh {
            if let Some(cached) = self.read_cache() {
                info!(count = cached.len(), "Serving universe from cache");
                return cached;
            }
        }

        let entries = self.fetch_universe().await;
        if !entries.is_empty() {
            self.write_cache(&entries);
        }
        entries
    }

    async fn fetch_universe(&self) -> Vec<UniverseEntry> {
        match self.fetch_classified().await {
            Ok(entries) if !entries.is_empty() => {
                info!(count = entries.len(), "Fetched industry-classified universe");
                return entries;
            }
            Ok(_) => warn!("Industry classification returned no stocks, trying flat lookup"),
            Err(e) => warn!(error = %e, "Industry classification failed, trying flat lookup"),
        }

        match self.source.all_stocks().await {
            Ok(rows) if !rows.is_empty() => {
                info!(count = rows.len(), "Fetched flat universe without industries");
                rows.into_iter()
                    .map(|(code, name)| UniverseEntry {
                        code,
                        name,
                        industry: UNKNOWN_INDUSTRY.to_string(),
                    })
                    .collect()
            }
            Ok(_) => {
                warn!("Flat stock lookup returned nothing");
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "Flat stock lookup failed, universe unavailable");
                Vec::new()
            }
        }
    }

    /// Primary tier: per-industry constituent enumeration.
    ///
    /// A stock listed under several boards keeps the classification from the
    /// last board that mentioned it (last-write-wins).
    async fn fetch_classified(&self) -> Result<Vec<UniverseEntry>, SourceError> {
        let boards = self.source.industry_boards().await?;
        debug!(boards = boards.len(), "Enumerated industry boards");

        let delay = std::time::Duration::from_millis(self.config.request_delay_ms);
        let mut by_code: HashMap<String, UniverseEntry> = HashMap::new();

        for board in &boards {
            match self.source.board_members(board).await {
                Ok(members) => {
                    for (code, name) in members {
                        by_code.insert(
                            code.clone(),
                            UniverseEntry {
                                code,
                                name,
                                industry: board.name.clone(),
                            },
                        );
                    }
                }
                Err(e) => {
                    warn!(board = %board.name, error = %e, "Board constituent lookup failed, skipping board");
                }
            }

            // Keep the per-board request rate polite.
            tokio::time::sleep(delay).await;
        }

        let mut entries: Vec<UniverseEntry> = by_code.into_values().collect();
        entries.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(entries)
    }

    // ========================================================================
    // Cache I/O
    // ========================================================================

    fn read_cache(&self) -> Option<Vec<UniverseEntry>> {
        let raw = std::fs::read_to_string(&self.config.cache_path).ok()?;
        let cache: UniverseCache = match serde_json::from_str(&raw) {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "Universe cache unreadable, refetching");
                return None;
            }
        };

        let age = Utc::now() - cache.fetched_at;
        if age > Duration::hours(self.config.cache_ttl_hours) {
            debug!(age_hours = age.num_hours(), "Universe cache expired");
            return None;
        }
        Some(cache.data)
    }

    /// Persist atomically: write a sibling temp file, then rename over the
    /// target so concurrent readers never observe a partial cache.
    fn write_cache(&self, entries: &[UniverseEntry]) {
        let cache = UniverseCache {
            fetched_at: Utc::now(),
            data: entries.to_vec(),
        };

        let path = &self.config.cache_path;
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(error = %e, "Cannot create cache directory");
                return;
            }
        }

        let tmp = path.with_extension("json.tmp");
        let result = serde_json::to_vec_pretty(&cache)
            .map_err(|e| e.to_string())
            .and_then(|raw| std::fs::write(&tmp, raw).map_err(|e| e.to_string()))
            .and_then(|_| std::fs::rename(&tmp, path).map_err(|e| e.to_string()));

        match result {
            Ok(_) => debug!(path = %path.display(), count = entries.len(), "Universe cache written"),
            Err(e) => warn!(error = %e, "Failed to write universe cache"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
