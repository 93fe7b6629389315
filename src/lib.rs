//! A-share rule-based screening library.
//!
//! Screens a universe of A-share equities against a multi-stage technical
//! strategy: fetch daily bars per stock (local binary archive preferred,
//! remote historical-quotes API as fallback), compute a fixed indicator set,
//! evaluate buy/sell conditions per trading day, and filter for stocks that
//! signalled within a recent lookback window.
//!
//! # Pipeline
//!
//! ```text
//! UniverseProvider ──► concurrent DailyBarSource fetch (retry/backoff)
//!                  ──► IndicatorEngine ──► five-step strategy
//!                  ──► recency filter ──► ScreeningReport
//! ```
//!
//! Per-stock failures degrade gracefully (the stock is dropped and logged);
//! only an empty universe or a fully empty fetch stage terminates a run.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod data;
pub mod error;
pub mod indicators;
pub mod screener;
pub mod strategy;

pub use config::Settings;
pub use error::ScreenError;
pub use screener::{ProgressEvent, ScreeningPipeline, ScreeningReport, ScreeningRequest, Stage};
pub use strategy::SignalKind;
