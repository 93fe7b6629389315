//! Error taxonomy for the screening pipeline.
//!
//! Per-stock problems (missing archive, failed remote call, short history)
//! are handled in place and logged; they never become errors. Only
//! pipeline-wide conditions surface here.

use thiserror::Error;

/// Terminal errors for a screening run.
#[derive(Debug, Error)]
pub enum ScreenError {
    /// Both universe sources failed; there is nothing to scan.
    #[error("stock universe unavailable: all sources failed or returned nothing")]
    UniverseUnavailable,

    /// Every per-stock fetch exhausted its retries.
    #[error("no market data could be fetched for any stock in the universe")]
    NoData,
}

/// Errors raised by individual data sources.
///
/// These stay inside the data layer: callers use them to decide on
/// fallback or retry, and convert the final outcome into an empty series
/// rather than propagating.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("network error: {0}")]
    Network(String),

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("api error: {0}")]
    Api(String),

    #[error("archive error: {0}")]
    Archive(String),
}
