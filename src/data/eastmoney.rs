//! Eastmoney remote adapters.
//!
//! Two endpoint families are used:
//! - `push2his` kline endpoint for per-stock daily history
//!   (forward-adjusted), same source the mpquant/Ashare tooling uses;
//! - `push2` clist endpoint for the universe: industry board enumeration,
//!   per-board constituents, and the flat all-stocks fallback.
//!
//! Responses come back with the provider's native field labels; this module
//! remaps them into the canonical bar/universe schema.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::SourceError;

use super::universe::UniverseSource;
use super::{Bar, BarSeries, Market};

/// Historical kline endpoint
const KLINE_URL: &str = "https://push2his.eastmoney.com/api/qt/stock/kline/get";

/// Listing endpoint (boards and constituents)
const CLIST_URL: &str = "https://push2.eastmoney.com/api/qt/clist/get";

/// Board-list filter: all industry boards
const FS_INDUSTRY_BOARDS: &str = "m:90+t:2";

/// Flat filter: every listed A-share on both exchanges
const FS_ALL_ASHARES: &str = "m:0+t:6,m:0+t:80,m:1+t:2,m:1+t:23";

/// Page size for clist queries
const CLIST_PAGE_SIZE: usize = 500;

// ============================================================================
// Client
// ============================================================================

/// HTTP client for the eastmoney endpoints.
#[derive(Clone)]
pub struct EastmoneyClient {
    client: reqwest::Client,
}

impl EastmoneyClient {
    /// Create a client with the given per-request timeout.
    pub fn new(timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent("Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7)")
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self { client }
    }

    /// Fetch forward-adjusted daily history for one stock.
    ///
    /// Unclassifiable codes default to the Shenzhen market id, matching the
    /// provider's own behavior for odd instruments.
    pub async fn daily_history(
        &self,
        code: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<BarSeries, SourceError> {
        let market_id = Market::classify(code)
            .map(|m| m.eastmoney_id())
            .unwrap_or("0");
        let secid = format!("{}.{}", market_id, code);

        // klt=101 daily, fqt=1 forward-adjusted
        let url = format!(
            "{}?secid={}&klt=101&fqt=1&beg={}&end={}&fields1=f1,f2,f3,f4,f5,f6&fields2=f51,f52,f53,f54,f55,f56,f57,f58,f59,f60,f61",
            KLINE_URL,
            secid,
            start.format("%Y%m%d"),
            end.format("%Y%m%d"),
        );

        debug!(code, %secid, "Fetching daily klines from eastmoney");

        let response: KlineResponse = self.get_json(&url).await?;
        if response.rc != 0 {
            return Err(SourceError::Api(format!("kline rc={}", response.rc)));
        }

        let klines = response.data.and_then(|d| d.klines).unwrap_or_default();
        let mut bars = parse_klines(code, &klines);
        bars.sort_by_key(|b| b.date);

        Ok(BarSeries::new(code, bars))
    }

    /// Enumerate all industry boards.
    pub async fn industry_boards(&self) -> Result<Vec<IndustryBoard>, SourceError> {
        let rows = self.clist(FS_INDUSTRY_BOARDS).await?;
        Ok(rows
            .into_iter()
            .map(|(code, name)| IndustryBoard { code, name })
            .collect())
    }

    /// List the constituent (code, name) pairs of one industry board.
    pub async fn board_members(&self, board: &IndustryBoard) -> Result<Vec<(String, String)>, SourceError> {
        self.clist(&format!("b:{}", board.code)).await
    }

    /// Flat list of every A-share (code, name), no industry information.
    pub async fn all_stocks(&self) -> Result<Vec<(String, String)>, SourceError> {
        self.clist(FS_ALL_ASHARES).await
    }

    /// Run a paginated clist query, returning (code, name) rows.
    async fn clist(&self, fs: &str) -> Result<Vec<(String, String)>, SourceError> {
        let mut rows = Vec::new();
        let mut page = 1usize;

        loop {
            let url = format!(
                "{}?pn={}&pz={}&po=1&np=1&fltt=2&invt=2&fid=f12&fs={}&fields=f12,f14",
                CLIST_URL, page, CLIST_PAGE_SIZE, fs
            );

            let response: ClistResponse = self.get_json(&url).await?;
            let data = match response.data {
                Some(d) => d,
                None => break,
            };
            let total = data.total;
            let diff = data.diff.unwrap_or_default();
            if diff.is_empty() {
                break;
            }

            for row in diff {
                if let (Some(code), Some(name)) = (row.code, row.name) {
                    rows.push((code, name));
                }
            }

            if rows.len() >= total || page * CLIST_PAGE_SIZE >= total {
                break;
            }
            page += 1;
        }

        Ok(rows)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, SourceError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SourceError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SourceError::Network(format!("HTTP {}", response.status())));
        }

        response
            .json()
            .await
            .map_err(|e| SourceError::Decode(e.to_string()))
    }
}

/// An eastmoney industry board (e.g. "BK0475" / "银行").
#[derive(Debug, Clone)]
pub struct IndustryBoard {
    /// Board code
    pub code: String,
    /// Industry name
    pub name: String,
}

#[async_trait]
impl UniverseSource for EastmoneyClient {
    async fn industry_boards(&self) -> Result<Vec<IndustryBoard>, SourceError> {
        EastmoneyClient::industry_boards(self).await
    }

    async fn board_members(&self, board: &IndustryBoard) -> Result<Vec<(String, String)>, SourceError> {
        EastmoneyClient::board_members(self, board).await
    }

    async fn all_stocks(&self) -> Result<Vec<(String, String)>, SourceError> {
        EastmoneyClient::all_stocks(self).await
    }
}

// ============================================================================
// Kline Parsing
// ============================================================================

/// Parse kline rows into bars, skipping malformed rows.
///
/// Row format, comma-separated:
/// `date,open,close,high,low,volume,amount,amplitude,pct_chg,change,turnover`
fn parse_klines(code: &str, klines: &[String]) -> Vec<Bar> {
    let mut bars = Vec::with_capacity(klines.len());

    for line in klines {
        match parse_kline_row(line) {
            Some(bar) => bars.push(bar),
            None => warn!(code, line, "Invalid kline row, skipping"),
        }
    }

    bars
}

fn parse_kline_row(line: &str) -> Option<Bar> {
    let parts: Vec<&str> = line.split(',').collect();
    if parts.len() < 7 {
        return None;
    }

    // Trailing columns (amplitude, pct_chg, change, turnover) are accepted
    // but not carried into the bar model.
    Some(Bar {
        date: NaiveDate::parse_from_str(parts[0], "%Y-%m-%d").ok()?,
        open: parts[1].parse().ok()?,
        close: parts[2].parse().ok()?,
        high: parts[3].parse().ok()?,
        low: parts[4].parse().ok()?,
        volume: parts[5].parse::<f64>().ok()? as u64,
        amount: parts[6].parse().ok(),
    })
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct KlineResponse {
    /// Return code (0 = success)
    rc: i32,
    data: Option<KlineData>,
}

#[derive(Debug, Deserialize)]
struct KlineData {
    klines: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct ClistResponse {
    data: Option<ClistData>,
}

#[derive(Debug, Deserialize)]
struct ClistData {
    #[serde(default)]
    total: usize,
    diff: Option<Vec<ClistRow>>,
}

#[derive(Debug, Deserialize)]
struct ClistRow {
    #[serde(rename = "f12")]
    code: Option<String>,
    #[serde(rename = "f14")]
    name: Option<String>,
}

// ============================================================================
// Tests
// ============================================================================
