//! Market data module for A-shares.
//!
//! Provides the core bar data model, the local binary archive reader,
//! the remote eastmoney adapters, the per-stock daily bar source with its
//! local-first fallback chain, and the cached universe provider.

mod eastmoney;
mod source;
mod tdx;
mod universe;

pub use eastmoney::{EastmoneyClient, IndustryBoard};
pub use source::{BarFetcher, DailyBarSource};
pub use tdx::{DayRecord, TdxArchive, DAY_RECORD_SIZE};
pub use universe::{UniverseCache, UniverseEntry, UniverseProvider, UniverseSource};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ============================================================================
// Core Data Types
// ============================================================================

/// Exchange market for an A-share code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Market {
    /// Shanghai Stock Exchange
    Shanghai,
    /// Shenzhen Stock Exchange
    Shenzhen,
}

impl Market {
    /// Classify a 6-digit stock code by its numeric prefix.
    ///
    /// `60xxxx`/`68xxxx`/`9xxxxx` route to Shanghai, `00xxxx`/`20xxxx`/`30xxxx`
    /// to Shenzhen. Anything else (funds, bonds, malformed codes) is `None`.
    pub fn classify(code: &str) -> Option<Self> {
        if code.len() != 6 || !code.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        match &code[..1] {
            "6" | "9" => Some(Self::Shanghai),
            "0" | "2" | "3" => Some(Self::Shenzhen),
            _ => None,
        }
    }

    /// Short prefix used in archive paths and secids.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Shanghai => "sh",
            Self::Shenzhen => "sz",
        }
    }

    /// Eastmoney market number ("1" for SH, "0" for SZ).
    pub fn eastmoney_id(&self) -> &'static str {
        match self {
            Self::Shanghai => "1",
            Self::Shenzhen => "0",
        }
    }
}

/// One OHLCV trading day for one stock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Trading day
    pub date: NaiveDate,
    /// Open price
    pub open: f64,
    /// High price
    pub high: f64,
    /// Low price
    pub low: f64,
    /// Close price
    pub close: f64,
    /// Volume in shares
    pub volume: u64,
    /// Turnover in currency, when the source provides it
    #[serde(default)]
    pub amount: Option<f64>,
}

impl Bar {
    /// Check the OHLC ordering invariant:
    /// low <= min(open, close) <= max(open, close) <= high.
    pub fn is_valid(&self) -> bool {
        let body_low = self.open.min(self.close);
        let body_high = self.open.max(self.close);
        self.low <= body_low && body_high <= self.high && self.open > 0.0 && self.close > 0.0
    }
}

/// Ordered daily bar history for one stock.
///
/// Created fresh per fetch; an empty series is the universal "no data"
/// value throughout the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BarSeries {
    /// 6-digit stock code
    pub code: String,
    /// Bars in strictly increasing date order
    pub bars: Vec<Bar>,
}

impl BarSeries {
    /// Create an empty series for a code.
    pub fn empty(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            bars: Vec::new(),
        }
    }

    /// Create a series from bars, which must already be date-ordered.
    pub fn new(code: impl Into<String>, bars: Vec<Bar>) -> Self {
        Self {
            code: code.into(),
            bars,
        }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Date of the most recent bar.
    pub fn last_date(&self) -> Option<NaiveDate> {
        self.bars.last().map(|b| b.date)
    }

    /// Check that dates are strictly increasing with no duplicates.
    pub fn is_strictly_ordered(&self) -> bool {
        self.bars.windows(2).all(|w| w[0].date < w[1].date)
    }

    /// Keep only bars within `[start, end]` inclusive.
    pub fn slice_dates(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.bars.retain(|b| b.date >= start && b.date <= end);
        self
    }
}

// ============================================================================
// Tests
// ============================================================================
