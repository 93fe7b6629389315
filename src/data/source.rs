//! Per-stock daily bar source with a local-first fallback chain.
//!
//! Resolution order: local binary archive (when configured and the code
//! classifies to a market), then the remote eastmoney history API. Any
//! failure along the chain degrades to the next step; the final fallback
//! is an empty series. Retry policy belongs to the caller, not here.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::DataConfig;

use super::{BarSeries, EastmoneyClient, Market, TdxArchive};

/// Fetch seam for the batch pipeline.
///
/// Implementations never fail: "no data" is an empty series.
#[async_trait]
pub trait BarFetcher: Send + Sync {
    /// Fetch daily bars for `code` within `[start, end]` inclusive.
    async fn fetch(&self, code: &str, start: NaiveDate, end: NaiveDate) -> BarSeries;
}

/// Daily bar source combining the local archive and the remote API.
pub struct DailyBarSource {
    archive: Option<TdxArchive>,
    remote: EastmoneyClient,
}

impl DailyBarSource {
    /// Build a source from configuration.
    pub fn new(config: &DataConfig) -> Self {
        Self {
            archive: config.archive_root.as_ref().map(TdxArchive::new),
            remote: EastmoneyClient::new(config.request_timeout_secs),
        }
    }

    /// Build a source around an existing remote client.
    pub fn with_client(config: &DataConfig, remote: EastmoneyClient) -> Self {
        Self {
            archive: config.archive_root.as_ref().map(TdxArchive::new),
            remote,
        }
    }

    fn read_local(&self, code: &str, start: NaiveDate, end: NaiveDate) -> BarSeries {
        let archive = match &self.archive {
            Some(a) => a,
            None => return BarSeries::empty(code),
        };
        // Codes outside the known prefixes have no archive path.
        let market = match Market::classify(code) {
            Some(m) => m,
            None => {
                debug!(code, "Unclassifiable code, skipping local archive");
                return BarSeries::empty(code);
            }
        };

        match archive.read(market, code, start, end) {
            Ok(series) => series,
            Err(e) => {
                warn!(code, error = %e, "Local archive unreadable");
                BarSeries::empty(code)
            }
        }
    }
}

#[async_trait]
impl BarFetcher for DailyBarSource {
    async fn fetch(&self, code: &str, start: NaiveDate, end: NaiveDate) -> BarSeries {
        let local = self.read_local(code, start, end);
        if !local.is_empty() {
            debug!(code, bars = local.len(), "Served from local archive");
            return local;
        }

        match self.remote.daily_history(code, start, end).await {
            Ok(series) if !series.is_empty() => {
                debug!(code, bars = series.len(), "Served from remote API");
                series
            }
            Ok(_) => {
                debug!(code, "Remote API returned no rows");
                BarSeries::empty(code)
            }
            Err(e) => {
                warn!(code, error = %e, "Remote fetch failed");
                BarSeries::empty(code)
            }
        }
    }
}

#[async_trait]
impl<F: BarFetcher + ?Sized> BarFetcher for Arc<F> {
    async fn fetch(&self, code: &str, start: NaiveDate, end: NaiveDate) -> BarSeries {
        (**self).fetch(code, start, end).await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DayRecord;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[tokio::test]
    async fn test_local_archive_preferred() {
        let dir = tempfile::tempdir().unwrap();
        let archive = TdxArchive::new(dir.path());
        let path = archive.path_for(Market::Shenzhen, "000001");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();

        let record = DayRecord {
            date: 20240102,
            open: 1050,
            high: 1080,
            low: 1040,
            close: 1070,
            amount: 1.0e7,
            volume: 1_000_000,
            reserved: 0,
        };
        std::fs::write(&path, record.encode()).unwrap();

        let config = DataConfig {
            archive_root: Some(dir.path().to_path_buf()),
            request_timeout_secs: 1,
        };
        let source = DailyBarSource::new(&config);

        let series = source.fetch("000001", d(2024, 1, 1), d(2024, 1, 31)).await;
        assert_eq!(series.len(), 1);
        assert_eq!(series.bars[0].close, 10.70);
    }

    #[tokio::test]
    async fn test_unclassifiable_code_skips_archive() {
        let dir = tempfile::tempdir().unwrap();
        let config = DataConfig {
            archive_root: Some(dir.path().to_path_buf()),
            request_timeout_secs: 1,
        };
        let source = DailyBarSource::new(&config);
        // ETF code: no archive path and (in tests, offline) no remote data.
        let series = source.read_local("510300", d(2024, 1, 1), d(2024, 1, 31));
        assert!(series.is_empty());
    }
}
