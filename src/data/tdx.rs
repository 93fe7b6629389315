//! Local binary day-bar archive reader.
//!
//! The archive stores one file per stock under `<root>/{sh,sz}/lday/`,
//! each a flat sequence of fixed 32-byte little-endian records:
//!
//! ```text
//! date:u32 (YYYYMMDD) | open:u32 (price*100) | high:u32 | low:u32 |
//! close:u32 | amount:f32 | volume:u32 | reserved:u32
//! ```
//!
//! The archive is append-only at its origin; this module only reads it.

use chrono::NaiveDate;
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::error::SourceError;

use super::{Bar, BarSeries, Market};

/// Size of one archive record in bytes.
pub const DAY_RECORD_SIZE: usize = 32;

// ============================================================================
// Day Record
// ============================================================================

/// One raw 32-byte archive record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DayRecord {
    /// Packed calendar date as base-10 digits (e.g. 20240102)
    pub date: u32,
    /// Open price in cents
    pub open: u32,
    /// High price in cents
    pub high: u32,
    /// Low price in cents
    pub low: u32,
    /// Close price in cents
    pub close: u32,
    /// Turnover amount
    pub amount: f32,
    /// Volume in shares
    pub volume: u32,
    /// Reserved/padding field, carried through unchanged
    pub reserved: u32,
}

impl DayRecord {
    /// Decode one record from its 32-byte wire form.
    pub fn decode(buf: &[u8; DAY_RECORD_SIZE]) -> Self {
        let u32_at = |i: usize| u32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
        Self {
            date: u32_at(0),
            open: u32_at(4),
            high: u32_at(8),
            low: u32_at(12),
            close: u32_at(16),
            amount: f32::from_le_bytes([buf[20], buf[21], buf[22], buf[23]]),
            volume: u32_at(24),
            reserved: u32_at(28),
        }
    }

    /// Encode back to the 32-byte wire form.
    pub fn encode(&self) -> [u8; DAY_RECORD_SIZE] {
        let mut buf = [0u8; DAY_RECORD_SIZE];
        buf[0..4].copy_from_slice(&self.date.to_le_bytes());
        buf[4..8].copy_from_slice(&self.open.to_le_bytes());
        buf[8..12].copy_from_slice(&self.high.to_le_bytes());
        buf[12..16].copy_from_slice(&self.low.to_le_bytes());
        buf[16..20].copy_from_slice(&self.close.to_le_bytes());
        buf[20..24].copy_from_slice(&self.amount.to_le_bytes());
        buf[24..28].copy_from_slice(&self.volume.to_le_bytes());
        buf[28..32].copy_from_slice(&self.reserved.to_le_bytes());
        buf
    }

    /// Unpack the date field into a calendar date.
    pub fn naive_date(&self) -> Option<NaiveDate> {
        let year = (self.date / 10_000) as i32;
        let month = (self.date / 100) % 100;
        let day = self.date % 100;
        NaiveDate::from_ymd_opt(year, month, day)
    }

    /// Convert to a [`Bar`], unscaling cent prices.
    ///
    /// Returns `None` for records with an invalid packed date.
    pub fn to_bar(&self) -> Option<Bar> {
        Some(Bar {
            date: self.naive_date()?,
            open: self.open as f64 / 100.0,
            high: self.high as f64 / 100.0,
            low: self.low as f64 / 100.0,
            close: self.close as f64 / 100.0,
            volume: self.volume as u64,
            amount: Some(self.amount as f64),
        })
    }

    /// Build a record from a [`Bar`], rounding prices to cents.
    pub fn from_bar(bar: &Bar) -> Self {
        let date = bar.date.format("%Y%m%d").to_string().parse().unwrap_or(0);
        Self {
            date,
            open: (bar.open * 100.0).round() as u32,
            high: (bar.high * 100.0).round() as u32,
            low: (bar.low * 100.0).round() as u32,
            close: (bar.close * 100.0).round() as u32,
            amount: bar.amount.unwrap_or(0.0) as f32,
            volume: bar.volume as u32,
            reserved: 0,
        }
    }
}

// ============================================================================
// Archive
// ============================================================================

/// Read-only view over a local day-bar archive directory.
pub struct TdxArchive {
    root: PathBuf,
}

impl TdxArchive {
    /// Create an archive view rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Archive file path for a market/code pair.
    pub fn path_for(&self, market: Market, code: &str) -> PathBuf {
        self.root
            .join(market.prefix())
            .join("lday")
            .join(format!("{}{}.day", market.prefix(), code))
    }

    /// Read a stock's history, sliced to `[start, end]` inclusive.
    ///
    /// A missing file yields an empty series; a present but corrupt file
    /// yields whatever records decoded cleanly, with the rest skipped.
    pub fn read(
        &self,
        market: Market,
        code: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<BarSeries, SourceError> {
        let path = self.path_for(market, code);
        if !path.is_file() {
            debug!(code, path = %path.display(), "No local archive file");
            return Ok(BarSeries::empty(code));
        }

        let raw = std::fs::read(&path)
            .map_err(|e| SourceError::Archive(format!("{}: {}", path.display(), e)))?;

        let bars = decode_archive(&raw, code);
        Ok(BarSeries::new(code, bars).slice_dates(start, end))
    }
}

/// Decode a full archive file into bars, skipping malformed records.
fn decode_archive(raw: &[u8], code: &str) -> Vec<Bar> {
    if raw.len() % DAY_RECORD_SIZE != 0 {
        warn!(
            code,
            len = raw.len(),
            "Archive length is not a multiple of the record size, trailing bytes ignored"
        );
    }

    let mut bars = Vec::with_capacity(raw.len() / DAY_RECORD_SIZE);
    for chunk in raw.chunks_exact(DAY_RECORD_SIZE) {
        let mut fixed = [0u8; DAY_RECORD_SIZE];
        fixed.copy_from_slice(chunk);
        let record = DayRecord::decode(&fixed);
        match record.to_bar() {
            Some(bar) => bars.push(bar),
            None => warn!(code, date = record.date, "Skipping record with invalid date"),
        }
    }
    bars
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> DayRecord {
        DayRecord {
            date: 20240102,
            open: 1050,
            high: 1080,
            low: 1040,
            close: 1070,
            amount: 10_500_000.0,
            volume: 1_000_000,
            reserved: 0,
        }
    }

    #[test]
    fn test_record_roundtrip() {
        let record = sample_record();
        let decoded = DayRecord::decode(&record.encode());
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_bar_roundtrip_cent_exact() {
        // Cent-scaled integer prices survive the f64 round trip exactly.
        let record = sample_record();
        let bar = record.to_bar().unwrap();
        assert_eq!(bar.open, 10.50);
        assert_eq!(bar.close, 10.70);
        let back = DayRecord::from_bar(&bar);
        assert_eq!(back.date, record.date);
        assert_eq!(back.open, record.open);
        assert_eq!(back.high, record.high);
        assert_eq!(back.low, record.low);
        assert_eq!(back.close, record.close);
        assert_eq!(back.volume, record.volume);
    }

    #[test]
    fn test_invalid_date_rejected() {
        let mut record = sample_record();
        record.date = 20241345; // month 13
        assert!(record.to_bar().is_none());
    }

    #[test]
    fn test_archive_read_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let archive = TdxArchive::new(dir.path());
        let series = archive
            .read(
                Market::Shenzhen,
                "000001",
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
            )
            .unwrap();
        assert!(series.is_empty());
    }

    #[test]
    fn test_archive_read_and_slice() {
        let dir = tempfile::tempdir().unwrap();
        let archive = TdxArchive::new(dir.path());

        let path = archive.path_for(Market::Shenzhen, "000001");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();

        let mut raw = Vec::new();
        for (date, close) in [(20240102u32, 1070u32), (20240103, 1085), (20240104, 1090)] {
            let mut record = sample_record();
            record.date = date;
            record.close = close;
            raw.extend_from_slice(&record.encode());
        }
        std::fs::write(&path, &raw).unwrap();

        let series = archive
            .read(
                Market::Shenzhen,
                "000001",
                NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 4).unwrap(),
            )
            .unwrap();

        assert_eq!(series.len(), 2);
        assert!(series.is_strictly_ordered());
        assert_eq!(series.bars[0].close, 10.85);
    }

    #[test]
    fn test_archive_skips_trailing_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let archive = TdxArchive::new(dir.path());

        let path = archive.path_for(Market::Shanghai, "600519");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();

        let mut raw = sample_record().encode().to_vec();
        raw.extend_from_slice(&[0xFF; 7]); // partial trailing record
        std::fs::write(&path, &raw).unwrap();

        let series = archive
            .read(
                Market::Shanghai,
                "600519",
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
            )
            .unwrap();
        assert_eq!(series.len(), 1);
    }
}
