//! Five-step integrated trading strategy.
//!
//! Evaluates a deterministic multi-condition rule per trading day over an
//! indicator-augmented bar series and produces one ternary signal per bar.
//!
//! Buy requires, on the same day:
//! - MACD histogram crossing from <= 0 to > 0 (golden cross),
//! - RSI crossing upward through 30,
//! - close above the 20-day moving average,
//! - volume above 1.5x the 20-day average volume.
//!
//! Sell is the histogram crossing from >= 0 to < 0. Signals are written
//! buy-first then sell, so sell wins if both ever held ("exit trumps
//! entry"). A missing indicator value fails every condition it appears in.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::indicators::IndicatorFrame;

/// Volume must exceed this multiple of its 20-day average on a buy day.
const VOLUME_SURGE_RATIO: f64 = 1.5;

/// RSI oversold threshold for the upward-cross condition.
const RSI_OVERSOLD: f64 = 30.0;

// ============================================================================
// Signal Types
// ============================================================================

/// Per-day trading signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Buy,
    Hold,
    Sell,
}

impl Signal {
    /// Integer encoding: buy 1, hold 0, sell -1.
    pub fn value(&self) -> i8 {
        match self {
            Self::Buy => 1,
            Self::Hold => 0,
            Self::Sell => -1,
        }
    }
}

/// Which signal kind a screening run is looking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Buy,
    Sell,
}

impl SignalKind {
    /// The per-day signal this kind matches.
    pub fn target(&self) -> Signal {
        match self {
            Self::Buy => Signal::Buy,
            Self::Sell => Signal::Sell,
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// An indicator frame with one immutable signal per bar.
#[derive(Debug, Clone)]
pub struct SignalFrame {
    frame: IndicatorFrame,
    signals: Vec<Signal>,
}

impl SignalFrame {
    pub fn frame(&self) -> &IndicatorFrame {
        &self.frame
    }

    pub fn signals(&self) -> &[Signal] {
        &self.signals
    }

    pub fn signal(&self, idx: usize) -> Option<Signal> {
        self.signals.get(idx).copied()
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }
}

// ============================================================================
// Strategy
// ============================================================================

/// Apply the five-step integrated strategy to an indicator frame.
///
/// Pure and deterministic: the same frame always yields the same signals.
/// Requires the columns from
/// [`crate::indicators::compute_strategy_indicators`].
pub fn apply_five_step(frame: IndicatorFrame) -> SignalFrame {
    let n = frame.len();
    let mut signals = vec![Signal::Hold; n];

    for i in 0..n {
        if buy_condition(&frame, i) {
            signals[i] = Signal::Buy;
        }
    }
    // Sell is written after buy on purpose: exit trumps entry.
    for i in 0..n {
        if sell_condition(&frame, i) {
            signals[i] = Signal::Sell;
        }
    }

    let buys = signals.iter().filter(|s| **s == Signal::Buy).count();
    let sells = signals.iter().filter(|s| **s == Signal::Sell).count();
    debug!(code = frame.code(), buys, sells, "Strategy applied");

    SignalFrame { frame, signals }
}

/// All four buy sub-conditions on day `i`; any missing operand fails.
fn buy_condition(frame: &IndicatorFrame, i: usize) -> bool {
    if i == 0 {
        return false;
    }

    let macd_cross = matches!(
        (frame.value("macd_hist", i), frame.value("macd_hist", i - 1)),
        (Some(today), Some(prev)) if today > 0.0 && prev <= 0.0
    );

    let rsi_rise = matches!(
        (frame.value("rsi", i), frame.value("rsi", i - 1)),
        (Some(today), Some(prev)) if today > RSI_OVERSOLD && prev <= RSI_OVERSOLD
    );

    let above_ma20 = matches!(
        frame.value("ma20", i),
        Some(ma) if frame.bars()[i].close > ma
    );

    let volume_surge = matches!(
        frame.value("vol_ma20", i),
        Some(avg) if frame.bars()[i].volume as f64 > VOLUME_SURGE_RATIO * avg
    );

    macd_cross && rsi_rise && above_ma20 && volume_surge
}

/// MACD death cross on day `i`.
fn sell_condition(frame: &IndicatorFrame, i: usize) -> bool {
    if i == 0 {
        return false;
    }
    matches!(
        (frame.value("macd_hist", i), frame.value("macd_hist", i - 1)),
        (Some(today), Some(prev)) if today < 0.0 && prev >= 0.0
    )
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Bar, BarSeries};
    use chrono::NaiveDate;

    fn frame_with_volumes(volumes: &[u64]) -> IndicatorFrame {
        let start = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let bars = volumes
            .iter()
            .enumerate()
            .map(|(i, &volume)| Bar {
                date: start + chrono::Duration::days(i as i64),
                open: 10.0,
                high: 10.6,
                low: 9.8,
                close: 10.5,
                volume,
                amount: None,
            })
            .collect();
        IndicatorFrame::new(BarSeries::new("000001", bars))
    }

    fn column(values: &[Option<f64>]) -> Vec<Option<f64>> {
        values.to_vec()
    }

    /// Day 3 (index 2) satisfies all four buy sub-conditions exactly;
    /// no other day satisfies any.
    fn synthetic_buy_frame() -> IndicatorFrame {
        let mut frame = frame_with_volumes(&[1_000_000, 1_000_000, 2_000_000, 1_000_000, 1_000_000]);
        frame.set_column(
            "macd_hist",
            column(&[Some(-0.3), Some(-0.1), Some(0.1), Some(0.2), Some(0.3)]),
        );
        frame.set_column(
            "rsi",
            column(&[Some(27.0), Some(28.0), Some(32.0), Some(35.0), Some(40.0)]),
        );
        // close 10.5 sits above ma20 on every defined day
        frame.set_column(
            "ma20",
            column(&[Some(10.0), Some(10.0), Some(10.0), Some(10.0), Some(10.0)]),
        );
        frame.set_column(
            "vol_ma20",
            column(&[
                Some(1_000_000.0),
                Some(1_000_000.0),
                Some(1_000_000.0),
                Some(1_000_000.0),
                Some(1_000_000.0),
            ]),
        );
        frame
    }

    #[test]
    fn test_synthetic_buy_vector() {
        let result = apply_five_step(synthetic_buy_frame());
        let values: Vec<i8> = result.signals().iter().map(|s| s.value()).collect();
        assert_eq!(values, vec![0, 0, 1, 0, 0]);
    }

    #[test]
    fn test_null_indicator_never_signals() {
        let mut frame = synthetic_buy_frame();
        // Knock out RSI on the trigger day: the warm-up gap must fail the
        // condition, not default it to true.
        frame.set_column(
            "rsi",
            column(&[Some(27.0), Some(28.0), None, Some(35.0), Some(40.0)]),
        );
        let result = apply_five_step(frame);
        assert!(result.signals().iter().all(|s| *s == Signal::Hold));
    }

    #[test]
    fn test_missing_hist_never_sells() {
        let mut frame = frame_with_volumes(&[1_000_000; 5]);
        frame.set_column(
            "macd_hist",
            column(&[None, None, Some(-0.1), Some(-0.2), Some(-0.3)]),
        );
        let result = apply_five_step(frame);
        // Index 2 has no previous value, so no death cross fires there.
        assert!(result.signals().iter().all(|s| *s == Signal::Hold));
    }

    #[test]
    fn test_sell_on_death_cross() {
        let mut frame = frame_with_volumes(&[1_000_000; 4]);
        frame.set_column(
            "macd_hist",
            column(&[Some(0.2), Some(0.1), Some(-0.1), Some(-0.2)]),
        );
        let result = apply_five_step(frame);
        let values: Vec<i8> = result.signals().iter().map(|s| s.value()).collect();
        assert_eq!(values, vec![0, 0, -1, 0]);
    }

    #[test]
    fn test_volume_below_threshold_blocks_buy() {
        let mut frame = synthetic_buy_frame();
        frame.set_column(
            "vol_ma20",
            column(&[
                Some(1_500_000.0),
                Some(1_500_000.0),
                Some(1_500_000.0), // 2M volume is not > 1.5 * 1.5M
                Some(1_500_000.0),
                Some(1_500_000.0),
            ]),
        );
        let result = apply_five_step(frame);
        assert!(result.signals().iter().all(|s| *s == Signal::Hold));
    }

    #[test]
    fn test_determinism() {
        let a = apply_five_step(synthetic_buy_frame());
        let b = apply_five_step(synthetic_buy_frame());
        assert_eq!(a.signals(), b.signals());
    }

    #[test]
    fn test_signal_values() {
        assert_eq!(Signal::Buy.value(), 1);
        assert_eq!(Signal::Hold.value(), 0);
        assert_eq!(Signal::Sell.value(), -1);
        assert_eq!(SignalKind::Buy.target(), Signal::Buy);
        assert_eq!(SignalKind::Sell.to_string(), "sell");
    }
}
