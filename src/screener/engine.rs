//! Batch screening pipeline.
//!
//! Orchestrates the four stages of a screening run: universe resolution,
//! concurrent per-stock bar fetching with retry, sequential indicator and
//! strategy evaluation, and recency filtering. Per-stock failures are
//! absorbed so one dead symbol never aborts a batch; only an empty universe
//! or a fully failed fetch stage is terminal.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::config::FetchConfig;
use crate::data::{BarFetcher, BarSeries, UniverseProvider, UniverseSource};
use crate::error::ScreenError;
use crate::indicators::compute_strategy_indicators;
use crate::strategy::{apply_five_step, Signal, SignalFrame, SignalKind};

use super::progress::{ProgressEvent, ProgressReporter, Stage};

// ============================================================================
// Request / Report Types
// ============================================================================

/// Parameters for one screening run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreeningRequest {
    /// First bar date to fetch (inclusive)
    pub start_date: NaiveDate,
    /// Last bar date to fetch (inclusive)
    pub end_date: NaiveDate,
    /// Signal kind to screen for
    pub signal: SignalKind,
    /// Keep signals within this many calendar days of each stock's last bar
    pub recent_days: i64,
}

/// One stock that matched the screen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreeningResult {
    pub code: String,
    pub name: String,
    pub industry: String,
    /// Trading day the signal fired
    pub date: NaiveDate,
    pub signal: SignalKind,
}

/// Outcome of a completed screening run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreeningReport {
    /// Matches, in ascending code order
    pub results: Vec<ScreeningResult>,
    /// Universe size at the start of the run
    pub total_scanned: usize,
    /// Stocks for which at least one bar was fetched
    pub fetched: usize,
    /// Stocks that went through indicators and strategy
    pub processed: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_secs: f64,
}

// ============================================================================
// Pipeline
// ============================================================================

/// The screening pipeline.
///
/// Generic over the bar fetcher and the universe source so tests can
/// script both seams.
pub struct ScreeningPipeline<F, U> {
    fetcher: F,
    universe: UniverseProvider<U>,
    fetch: FetchConfig,
    progress: Option<UnboundedSender<ProgressEvent>>,
}

impl<F: BarFetcher, U: UniverseSource> ScreeningPipeline<F, U> {
    pub fn new(fetcher: F, universe: UniverseProvider<U>, fetch: FetchConfig) -> Self {
        Self {
            fetcher,
            universe,
            fetch,
            progress: None,
        }
    }

    /// Subscribe a progress channel to subsequent runs.
    pub fn with_progress(mut self, sender: UnboundedSender<ProgressEvent>) -> Self {
        self.progress = Some(sender);
        self
    }

    /// Execute one screening run.
    ///
    /// Errors only when the universe is empty or no stock yields any bars;
    /// everything below that granularity degrades per stock.
    pub async fn run(&self, request: &ScreeningRequest) -> Result<ScreeningReport, ScreenError> {
        let started_at = Utc::now();
        let mut progress = ProgressReporter::new(self.progress.clone());

        // ---- Stage 1: universe ----
        progress.emit(Stage::Universe, 0.0, "resolving universe");
        let universe = self.universe.get_universe(false).await;
        if universe.is_empty() {
            return Err(ScreenError::UniverseUnavailable);
        }
        let total = universe.len();
        info!(stocks = total, "Universe resolved");
        progress.emit(Stage::Universe, 1.0, format!("{total} stocks in universe"));

        let mut meta: HashMap<String, (String, String)> = HashMap::with_capacity(total);
        let mut codes: Vec<String> = Vec::with_capacity(total);
        for entry in universe {
            codes.push(entry.code.clone());
            meta.insert(entry.code, (entry.name, entry.industry));
        }

        // ---- Stage 2: concurrent fetch ----
        // BTreeMap keys give the later stages a fixed ascending-code order
        // regardless of fetch completion order.
        let mut series_by_code: BTreeMap<String, BarSeries> = BTreeMap::new();
        {
            let fetcher = &self.fetcher;
            let fetch_cfg = &self.fetch;
            let (start, end) = (request.start_date, request.end_date);
            let width = self.fetch.concurrency.max(1);

            let mut results = stream::iter(codes.iter().cloned())
                .map(move |code| async move {
                    let series = fetch_with_retry(fetcher, &code, start, end, fetch_cfg).await;
                    (code, series)
                })
                .buffer_unordered(width);

            let mut done = 0usize;
            while let Some((code, series)) = results.next().await {
                done += 1;
                if series.is_empty() {
                    warn!(code, "No bars available, excluding from batch");
                } else {
                    series_by_code.insert(code, series);
                }
                progress.emit(
                    Stage::Fetch,
                    done as f64 / total as f64,
                    format!("{done}/{total} fetched"),
                );
            }
        }

        let fetched = series_by_code.len();
        if fetched == 0 {
            return Err(ScreenError::NoData);
        }
        info!(fetched, failed = total - fetched, "Fetch stage complete");

        // ---- Stage 3: indicators and strategy, sequential ----
        let mut frames: BTreeMap<String, SignalFrame> = BTreeMap::new();
        let mut done = 0usize;
        for (code, series) in series_by_code {
            let frame = compute_strategy_indicators(series);
            frames.insert(code, apply_five_step(frame));
            done += 1;
            progress.emit(
                Stage::Strategy,
                done as f64 / fetched as f64,
                format!("{done}/{fetched} evaluated"),
            );
        }
        let processed = frames.len();

        // ---- Stage 4: recency filter ----
        let target = request.signal.target();
        let mut results = Vec::new();
        for (code, frame) in &frames {
            for date in recent_signal_dates(frame, target, request.recent_days) {
                let (name, industry) = meta
                    .get(code)
                    .cloned()
                    .unwrap_or_else(|| (code.clone(), String::new()));
                results.push(ScreeningResult {
                    code: code.clone(),
                    name,
                    industry,
                    date,
                    signal: request.signal,
                });
            }
        }
        progress.emit(Stage::Filter, 1.0, format!("{} matches", results.len()));

        let completed_at = Utc::now();
        let duration_secs = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;
        info!(
            matches = results.len(),
            processed, duration_secs, "Screening run complete"
        );

        Ok(ScreeningReport {
            results,
            total_scanned: total,
            fetched,
            processed,
            started_at,
            completed_at,
            duration_secs,
        })
    }
}

/// Fetch one stock, retrying empty results with exponential backoff.
async fn fetch_with_retry<F: BarFetcher>(
    fetcher: &F,
    code: &str,
    start: NaiveDate,
    end: NaiveDate,
    config: &FetchConfig,
) -> BarSeries {
    let mut delay = std::time::Duration::from_secs(config.initial_delay_secs);
    for attempt in 0..=config.max_retries {
        let series = fetcher.fetch(code, start, end).await;
        if !series.is_empty() {
            if attempt > 0 {
                debug!(code, attempt, "Fetch recovered after retry");
            }
            return series;
        }
        if attempt < config.max_retries {
            debug!(code, attempt, delay_ms = delay.as_millis() as u64, "Empty fetch, backing off");
            tokio::time::sleep(delay).await;
            delay *= 2;
        }
    }
    warn!(code, retries = config.max_retries, "No data after all retries");
    BarSeries::empty(code)
}

/// Dates on which `target` fired within `lookback_days` calendar days of the
/// stock's own last bar (inclusive on the boundary).
fn recent_signal_dates(frame: &SignalFrame, target: Signal, lookback_days: i64) -> Vec<NaiveDate> {
    let last = match frame.frame().series().last_date() {
        Some(d) => d,
        None => return Vec::new(),
    };
    let cutoff = last - Duration::days(lookback_days);

    frame
        .frame()
        .bars()
        .iter()
        .enumerate()
        .filter(|(i, bar)| frame.signal(*i) == Some(target) && bar.date >= cutoff)
        .map(|(_, bar)| bar.date)
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UniverseConfig;
    use crate::data::{Bar, IndustryBoard};
    use crate::error::SourceError;
    use crate::indicators::IndicatorFrame;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    /// Flat-only universe source serving a scripted code list.
    struct MockUniverse {
        codes: Vec<String>,
        alive: bool,
    }

    #[async_trait]
    impl UniverseSource for MockUniverse {
        async fn industry_boards(&self) -> Result<Vec<IndustryBoard>, SourceError> {
            Err(SourceError::Network("boards down".into()))
        }

        async fn board_members(
            &self,
            _board: &IndustryBoard,
        ) -> Result<Vec<(String, String)>, SourceError> {
            Err(SourceError::Network("boards down".into()))
        }

        async fn all_stocks(&self) -> Result<Vec<(String, String)>, SourceError> {
            if !self.alive {
                return Err(SourceError::Network("flat down".into()));
            }
            Ok(self
                .codes
                .iter()
                .map(|c| (c.clone(), format!("股票{c}")))
                .collect())
        }
    }

    /// Scripted fetcher tracking per-code call counts and peak concurrency.
    struct MockFetcher {
        failing: HashSet<String>,
        bar_count: usize,
        calls: Mutex<HashMap<String, usize>>,
        in_flight: AtomicUsize,
        peak_in_flight: AtomicUsize,
    }

    impl MockFetcher {
        fn new(bar_count: usize, failing: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                failing: failing.iter().map(|s| s.to_string()).collect(),
                bar_count,
                calls: Mutex::new(HashMap::new()),
                in_flight: AtomicUsize::new(0),
                peak_in_flight: AtomicUsize::new(0),
            })
        }

        fn calls_for(&self, code: &str) -> usize {
            self.calls.lock().unwrap().get(code).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl BarFetcher for MockFetcher {
        async fn fetch(&self, code: &str, start: NaiveDate, _end: NaiveDate) -> BarSeries {
            *self
                .calls
                .lock()
                .unwrap()
                .entry(code.to_string())
                .or_insert(0) += 1;

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.failing.contains(code) {
                return BarSeries::empty(code);
            }
            let bars = (0..self.bar_count)
                .map(|i| Bar {
                    date: start + Duration::days(i as i64),
                    open: 10.0,
                    high: 10.5,
                    low: 9.5,
                    close: 10.2,
                    volume: 1_000_000,
                    amount: None,
                })
                .collect();
            BarSeries::new(code, bars)
        }
    }

    fn pipeline(
        fetcher: Arc<MockFetcher>,
        codes: &[String],
        alive: bool,
        dir: &tempfile::TempDir,
        concurrency: usize,
    ) -> ScreeningPipeline<Arc<MockFetcher>, MockUniverse> {
        let universe = UniverseProvider::new(
            MockUniverse {
                codes: codes.to_vec(),
                alive,
            },
            UniverseConfig {
                cache_path: dir.path().join("universe.json"),
                cache_ttl_hours: 24,
                request_delay_ms: 0,
            },
        );
        let fetch = FetchConfig {
            max_retries: 1,
            initial_delay_secs: 0,
            concurrency,
        };
        ScreeningPipeline::new(fetcher, universe, fetch)
    }

    fn request() -> ScreeningRequest {
        ScreeningRequest {
            start_date: d(2024, 1, 1),
            end_date: d(2024, 6, 30),
            signal: SignalKind::Buy,
            recent_days: 5,
        }
    }

    fn codes(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("{i:06}")).collect()
    }

    #[tokio::test]
    async fn test_partial_failures_do_not_abort_batch() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = MockFetcher::new(5, &["000003", "000007"]);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let pipeline =
            pipeline(fetcher.clone(), &codes(10), true, &dir, 4).with_progress(tx);

        let report = pipeline.run(&request()).await.unwrap();
        assert_eq!(report.total_scanned, 10);
        assert_eq!(report.fetched, 8);
        assert_eq!(report.processed, 8);

        // Failing codes get the initial attempt plus max_retries.
        assert_eq!(fetcher.calls_for("000003"), 2);
        assert_eq!(fetcher.calls_for("000001"), 1);

        drop(pipeline);
        let mut last = 0.0;
        while let Some(event) = rx.recv().await {
            assert!(event.percent >= last);
            last = event.percent;
        }
        assert_eq!(last, 100.0);
    }

    #[tokio::test]
    async fn test_fetch_width_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = MockFetcher::new(5, &[]);
        let pipeline = pipeline(fetcher.clone(), &codes(20), true, &dir, 5);

        let report = pipeline.run(&request()).await.unwrap();
        assert_eq!(report.fetched, 20);
        assert!(fetcher.peak_in_flight.load(Ordering::SeqCst) <= 5);
        for code in codes(20) {
            assert_eq!(fetcher.calls_for(&code), 1);
        }
    }

    #[tokio::test]
    async fn test_empty_universe_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = MockFetcher::new(5, &[]);
        let pipeline = pipeline(fetcher, &[], true, &dir, 4);

        let err = pipeline.run(&request()).await.unwrap_err();
        assert!(matches!(err, ScreenError::UniverseUnavailable));
    }

    #[tokio::test]
    async fn test_all_fetches_failing_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let universe = codes(3);
        let failing: Vec<&str> = universe.iter().map(|s| s.as_str()).collect();
        let fetcher = MockFetcher::new(5, &failing);
        let pipeline = pipeline(fetcher, &universe, true, &dir, 4);

        let err = pipeline.run(&request()).await.unwrap_err();
        assert!(matches!(err, ScreenError::NoData));
    }

    // ------------------------------------------------------------------------
    // Recency filter
    // ------------------------------------------------------------------------

    /// 30 consecutive daily bars with every buy condition firing exactly on
    /// index 24, which is 5 calendar days before the last bar.
    fn frame_with_buy_five_days_back() -> SignalFrame {
        let start = d(2024, 5, 1);
        let bars: Vec<Bar> = (0..30)
            .map(|i| Bar {
                date: start + Duration::days(i),
                open: 10.0,
                high: 10.6,
                low: 9.8,
                close: 10.5,
                volume: if i == 24 { 2_000_000 } else { 1_000_000 },
                amount: None,
            })
            .collect();
        let mut frame = IndicatorFrame::new(BarSeries::new("000001", bars));

        let step = |before: f64, after: f64| -> Vec<Option<f64>> {
            (0..30)
                .map(|i| Some(if i < 24 { before } else { after }))
                .collect()
        };
        frame.set_column("macd_hist", step(-0.1, 0.1));
        frame.set_column("rsi", step(28.0, 35.0));
        frame.set_column("ma20", step(10.0, 10.0));
        frame.set_column("vol_ma20", step(1_000_000.0, 1_000_000.0));

        let signals = apply_five_step(frame);
        assert_eq!(signals.signal(24), Some(Signal::Buy));
        signals
    }

    #[test]
    fn test_recency_boundary_is_inclusive() {
        let frame = frame_with_buy_five_days_back();

        let hits = recent_signal_dates(&frame, Signal::Buy, 5);
        assert_eq!(hits, vec![d(2024, 5, 25)]);

        // One day tighter and the same signal falls outside the window.
        let hits = recent_signal_dates(&frame, Signal::Buy, 4);
        assert!(hits.is_empty());
    }

    #[test]
    fn test_recency_filter_matches_target_kind_only() {
        let frame = frame_with_buy_five_days_back();
        let hits = recent_signal_dates(&frame, Signal::Sell, 30);
        assert!(hits.is_empty());
    }
}
