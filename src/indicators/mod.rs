//! Technical indicator engine.
//!
//! An [`IndicatorFrame`] extends a bar series with named value columns.
//! Warm-up rows are `None`, never zero: every comparison against a missing
//! value must come out false downstream.
//!
//! Indicators register by name in a dispatch table built at engine
//! construction, so new ones are added without touching the engine itself.

use statrs::statistics::Statistics;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::data::{Bar, BarSeries};

// ============================================================================
// Indicator Frame
// ============================================================================

/// A bar series extended with named indicator columns.
///
/// Every column has exactly one (possibly missing) value per bar.
#[derive(Debug, Clone)]
pub struct IndicatorFrame {
    series: BarSeries,
    columns: HashMap<String, Vec<Option<f64>>>,
}

impl IndicatorFrame {
    /// Wrap a bar series with no columns yet.
    pub fn new(series: BarSeries) -> Self {
        Self {
            series,
            columns: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn code(&self) -> &str {
        &self.series.code
    }

    pub fn series(&self) -> &BarSeries {
        &self.series
    }

    pub fn bars(&self) -> &[Bar] {
        &self.series.bars
    }

    /// Add or replace a column. The column length must match the bar count.
    pub fn set_column(&mut self, name: impl Into<String>, values: Vec<Option<f64>>) {
        let name = name.into();
        debug_assert_eq!(values.len(), self.len(), "column {} length mismatch", name);
        self.columns.insert(name, values);
    }

    /// Full column by name.
    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.columns.get(name).map(|v| v.as_slice())
    }

    /// Single value; `None` for unknown columns, out-of-range rows, and
    /// warm-up rows alike.
    pub fn value(&self, name: &str, idx: usize) -> Option<f64> {
        self.columns.get(name)?.get(idx).copied().flatten()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    fn closes(&self) -> Vec<f64> {
        self.series.bars.iter().map(|b| b.close).collect()
    }

    fn volumes(&self) -> Vec<f64> {
        self.series.bars.iter().map(|b| b.volume as f64).collect()
    }
}

// ============================================================================
// Rolling Primitives
// ============================================================================

/// Simple moving average; `None` until a full window is available.
fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let n = values.len();
    let mut out = vec![None; n];
    if period == 0 || n < period {
        return out;
    }
    let mut sum: f64 = values[..period].iter().sum();
    out[period - 1] = Some(sum / period as f64);
    for i in period..n {
        sum += values[i] - values[i - period];
        out[i] = Some(sum / period as f64);
    }
    out
}

/// Exponential moving average seeded with the SMA of the first window.
fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let n = values.len();
    let mut out = vec![None; n];
    if period == 0 || n < period {
        return out;
    }
    let mut current: f64 = values[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = Some(current);
    let k = 2.0 / (period as f64 + 1.0);
    for i in period..n {
        current = values[i] * k + current * (1.0 - k);
        out[i] = Some(current);
    }
    out
}

/// SMA over an already-sparse column, honoring leading `None`s.
fn sma_sparse(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    let n = values.len();
    let mut out = vec![None; n];
    if period == 0 {
        return out;
    }
    let first_defined = match values.iter().position(|v| v.is_some()) {
        Some(i) => i,
        None => return out,
    };
    let dense: Vec<f64> = values[first_defined..].iter().map(|v| v.unwrap_or(0.0)).collect();
    for (i, avg) in sma(&dense, period).into_iter().enumerate() {
        out[first_defined + i] = avg;
    }
    out
}

// ============================================================================
// Indicator Functions
// ============================================================================

/// Wilder RSI on close.
pub fn add_rsi(frame: &mut IndicatorFrame, period: usize) {
    let closes = frame.closes();
    let n = closes.len();
    let mut out = vec![None; n];

    if period > 0 && n > period {
        let mut avg_gain = 0.0;
        let mut avg_loss = 0.0;
        for i in 1..=period {
            let delta = closes[i] - closes[i - 1];
            if delta > 0.0 {
                avg_gain += delta;
            } else {
                avg_loss -= delta;
            }
        }
        avg_gain /= period as f64;
        avg_loss /= period as f64;
        out[period] = Some(rsi_from_averages(avg_gain, avg_loss));

        let p = period as f64;
        for i in period + 1..n {
            let delta = closes[i] - closes[i - 1];
            let (gain, loss) = if delta > 0.0 { (delta, 0.0) } else { (0.0, -delta) };
            avg_gain = (avg_gain * (p - 1.0) + gain) / p;
            avg_loss = (avg_loss * (p - 1.0) + loss) / p;
            out[i] = Some(rsi_from_averages(avg_gain, avg_loss));
        }
    }

    frame.set_column("rsi", out);
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        100.0
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}

/// MACD line, signal line, and histogram (macd - signal).
pub fn add_macd(frame: &mut IndicatorFrame, fast: usize, slow: usize, signal: usize) {
    let closes = frame.closes();
    let n = closes.len();
    let fast_ema = ema(&closes, fast);
    let slow_ema = ema(&closes, slow);

    let macd: Vec<Option<f64>> = (0..n)
        .map(|i| match (fast_ema[i], slow_ema[i]) {
            (Some(f), Some(s)) => Some(f - s),
            _ => None,
        })
        .collect();

    // Signal is an EMA over the defined span of the MACD line.
    let mut signal_col = vec![None; n];
    if let Some(offset) = macd.iter().position(|v| v.is_some()) {
        let dense: Vec<f64> = macd[offset..].iter().map(|v| v.unwrap_or(0.0)).collect();
        for (i, v) in ema(&dense, signal).into_iter().enumerate() {
            signal_col[offset + i] = v;
        }
    }

    let hist: Vec<Option<f64>> = (0..n)
        .map(|i| match (macd[i], signal_col[i]) {
            (Some(m), Some(s)) => Some(m - s),
            _ => None,
        })
        .collect();

    frame.set_column("macd", macd);
    frame.set_column("macd_signal", signal_col);
    frame.set_column("macd_hist", hist);
}

/// Simple moving average of close, column `ma{period}`.
pub fn add_ma(frame: &mut IndicatorFrame, period: usize) {
    let values = sma(&frame.closes(), period);
    frame.set_column(format!("ma{}", period), values);
}

/// Stochastic oscillator %K/%D, both legs SMA-smoothed.
pub fn add_kd(frame: &mut IndicatorFrame, fastk: usize, slowk: usize, slowd: usize) {
    let bars = frame.bars();
    let n = bars.len();
    let mut rsv = vec![None; n];

    if fastk > 0 && n >= fastk {
        for i in fastk - 1..n {
            let window = &bars[i + 1 - fastk..=i];
            let highest = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
            let lowest = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);
            let value = if highest > lowest {
                (bars[i].close - lowest) / (highest - lowest) * 100.0
            } else {
                50.0
            };
            rsv[i] = Some(value);
        }
    }

    let k = sma_sparse(&rsv, slowk);
    let d = sma_sparse(&k, slowd);
    frame.set_column("k", k);
    frame.set_column("d", d);
}

/// On-balance volume: cumulative signed volume by close direction.
pub fn add_obv(frame: &mut IndicatorFrame) {
    let bars = frame.bars();
    let n = bars.len();
    let mut out = vec![None; n];

    if n > 0 {
        let mut obv = bars[0].volume as f64;
        out[0] = Some(obv);
        for i in 1..n {
            if bars[i].close > bars[i - 1].close {
                obv += bars[i].volume as f64;
            } else if bars[i].close < bars[i - 1].close {
                obv -= bars[i].volume as f64;
            }
            out[i] = Some(obv);
        }
    }

    frame.set_column("obv", out);
}

/// SMA-centered Bollinger bands with population standard deviation.
pub fn add_bbands(frame: &mut IndicatorFrame, period: usize, dev_up: f64, dev_down: f64) {
    let closes = frame.closes();
    let n = closes.len();
    let mut upper = vec![None; n];
    let mut middle = vec![None; n];
    let mut lower = vec![None; n];

    if period > 0 && n >= period {
        for i in period - 1..n {
            let window = &closes[i + 1 - period..=i];
            let mean = window.iter().mean();
            let sd = window.iter().population_std_dev();
            middle[i] = Some(mean);
            upper[i] = Some(mean + dev_up * sd);
            lower[i] = Some(mean - dev_down * sd);
        }
    }

    frame.set_column("bbands_upper", upper);
    frame.set_column("bbands_middle", middle);
    frame.set_column("bbands_lower", lower);
}

/// 20-day average volume, used by the strategy's volume validation.
pub fn add_volume_ma(frame: &mut IndicatorFrame, period: usize) {
    let values = sma(&frame.volumes(), period);
    frame.set_column(format!("vol_ma{}", period), values);
}

// ============================================================================
// Engine
// ============================================================================

/// Registered indicator computation.
pub type IndicatorFn = fn(&mut IndicatorFrame);

/// Name → function dispatch table for ad-hoc indicator computation.
pub struct IndicatorEngine {
    registry: HashMap<&'static str, IndicatorFn>,
}

impl IndicatorEngine {
    /// Build the engine with the default indicator set registered.
    pub fn new() -> Self {
        let mut registry: HashMap<&'static str, IndicatorFn> = HashMap::new();
        registry.insert("rsi", |f| add_rsi(f, 14));
        registry.insert("macd", |f| add_macd(f, 12, 26, 9));
        registry.insert("ma20", |f| add_ma(f, 20));
        registry.insert("ma200", |f| add_ma(f, 200));
        registry.insert("kd", |f| add_kd(f, 9, 3, 3));
        registry.insert("obv", add_obv);
        registry.insert("bbands", |f| add_bbands(f, 20, 2.0, 2.0));
        Self { registry }
    }

    /// Registered indicator names.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.registry.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Compute the named indicators over a bar series.
    ///
    /// Unknown names are logged and skipped, not errors.
    pub fn compute(&self, series: BarSeries, names: &[&str]) -> IndicatorFrame {
        let mut frame = IndicatorFrame::new(series);
        for name in names {
            match self.registry.get(name) {
                Some(func) => {
                    func(&mut frame);
                    debug!(code = frame.code(), indicator = name, "Indicator added");
                }
                None => warn!(indicator = name, "Unknown indicator, skipping"),
            }
        }
        frame
    }
}

impl Default for IndicatorEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Compute exactly the indicator set the five-step strategy depends on:
/// ma20, ma200, the MACD trio, RSI, and the 20-day average volume.
///
/// Separate from the registry because the strategy's dependency list is
/// fixed, not configurable.
pub fn compute_strategy_indicators(series: BarSeries) -> IndicatorFrame {
    let mut frame = IndicatorFrame::new(series);
    add_ma(&mut frame, 20);
    add_ma(&mut frame, 200);
    add_macd(&mut frame, 12, 26, 9);
    add_rsi(&mut frame, 14);
    add_volume_ma(&mut frame, 20);
    frame
}

// ============================================================================
// Tests
// ============================================================================
