//! Screening pipeline: orchestration, progress reporting, and reports.

mod engine;
mod progress;

pub use engine::{ScreeningPipeline, ScreeningReport, ScreeningRequest, ScreeningResult};
pub use progress::{ProgressEvent, Stage};
