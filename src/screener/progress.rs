//! Progress reporting for screening runs.
//!
//! The pipeline emits discrete checkpoints with an overall percentage so a
//! presentation layer can render one combined indicator without knowing
//! stage boundaries. The stage → percentage mapping is an interface
//! convention: 0 means nothing started, 100 means the final result exists,
//! and the sequence never decreases within a run.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

/// Named pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Loading the stock universe
    Universe,
    /// Concurrent per-stock bar fetch
    Fetch,
    /// Indicator computation and strategy application
    Strategy,
    /// Recency filtering and aggregation
    Filter,
}

impl Stage {
    /// Overall-percentage span this stage covers.
    fn span(&self) -> (f64, f64) {
        match self {
            Self::Universe => (0.0, 5.0),
            Self::Fetch => (5.0, 55.0),
            Self::Strategy => (55.0, 90.0),
            Self::Filter => (90.0, 100.0),
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Universe => write!(f, "universe"),
            Self::Fetch => write!(f, "fetch"),
            Self::Strategy => write!(f, "strategy"),
            Self::Filter => write!(f, "filter"),
        }
    }
}

/// One progress checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Stage the pipeline is in
    pub stage: Stage,
    /// Overall completion in [0, 100], monotonically non-decreasing
    pub percent: f64,
    /// Human-readable detail
    pub detail: String,
}

/// Per-run reporter that maps stage fractions onto the overall scale and
/// enforces monotonicity. Dropped events (no subscriber, or a closed
/// receiver) are silently discarded.
pub(crate) struct ProgressReporter {
    sender: Option<UnboundedSender<ProgressEvent>>,
    last_percent: f64,
}

impl ProgressReporter {
    pub(crate) fn new(sender: Option<UnboundedSender<ProgressEvent>>) -> Self {
        Self {
            sender,
            last_percent: 0.0,
        }
    }

    /// Emit a checkpoint at `fraction` (clamped to [0, 1]) through `stage`.
    pub(crate) fn emit(&mut self, stage: Stage, fraction: f64, detail: impl Into<String>) {
        let (lo, hi) = stage.span();
        let percent = (lo + fraction.clamp(0.0, 1.0) * (hi - lo)).max(self.last_percent);
        self.last_percent = percent;

        if let Some(sender) = &self.sender {
            let _ = sender.send(ProgressEvent {
                stage,
                percent,
                detail: detail.into(),
            });
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_spans_cover_0_to_100() {
        assert_eq!(Stage::Universe.span().0, 0.0);
        assert_eq!(Stage::Filter.span().1, 100.0);
        // Adjacent stages share their boundary.
        assert_eq!(Stage::Universe.span().1, Stage::Fetch.span().0);
        assert_eq!(Stage::Fetch.span().1, Stage::Strategy.span().0);
        assert_eq!(Stage::Strategy.span().1, Stage::Filter.span().0);
    }

    #[tokio::test]
    async fn test_reporter_monotonic() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut reporter = ProgressReporter::new(Some(tx));

        reporter.emit(Stage::Universe, 1.0, "done");
        reporter.emit(Stage::Fetch, 0.5, "half");
        // A stage fraction that maps below the last percent is clamped up.
        reporter.emit(Stage::Fetch, 0.1, "stale update");
        reporter.emit(Stage::Filter, 1.0, "final");
        drop(reporter);

        let mut last = 0.0;
        let mut count = 0;
        while let Some(event) = rx.recv().await {
            assert!(event.percent >= last, "progress went backwards");
            last = event.percent;
            count += 1;
        }
        assert_eq!(count, 4);
        assert_eq!(last, 100.0);
    }

    #[test]
    fn test_reporter_without_subscriber() {
        let mut reporter = ProgressReporter::new(None);
        reporter.emit(Stage::Fetch, 0.5, "nobody listening");
        assert!(reporter.last_percent > 0.0);
    }
}
