//! Command-line entry point for the A-share screener.
//!
//! Runs one screening pass over the full A-share universe and prints the
//! matches. Takes an optional JSON config file path as the first argument;
//! `ASHARE_SIGNAL` (buy/sell) and `ASHARE_RECENT_DAYS` override the screen
//! parameters.

use anyhow::{Context, Result};
use ashare_screener::data::{DailyBarSource, EastmoneyClient, UniverseProvider};
use ashare_screener::{ScreeningPipeline, ScreeningRequest, Settings, SignalKind};
use chrono::{Duration, Local};
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("ashare-screener v{}", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let settings = Settings::load_or_default(config_path.as_deref());

    let signal = match std::env::var("ASHARE_SIGNAL").as_deref() {
        Ok("sell") => SignalKind::Sell,
        _ => SignalKind::Buy,
    };
    let recent_days = std::env::var("ASHARE_RECENT_DAYS")
        .ok()
        .map(|raw| raw.parse::<i64>().context("ASHARE_RECENT_DAYS must be an integer"))
        .transpose()?
        .unwrap_or(5);

    let end_date = Local::now().date_naive();
    let request = ScreeningRequest {
        start_date: end_date - Duration::days(365),
        end_date,
        signal,
        recent_days,
    };

    // One HTTP client serves both the bar fetcher and the universe source.
    let client = EastmoneyClient::new(settings.data.request_timeout_secs);
    let source = DailyBarSource::with_client(&settings.data, client.clone());
    let universe = UniverseProvider::new(client, settings.universe.clone());

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<ashare_screener::ProgressEvent>();
    let progress_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            tracing::info!(
                stage = %event.stage,
                percent = format!("{:.1}", event.percent),
                "{}",
                event.detail
            );
        }
    });

    let pipeline = ScreeningPipeline::new(source, universe, settings.fetch.clone()).with_progress(tx);
    let report = pipeline.run(&request).await?;
    drop(pipeline);
    let _ = progress_task.await;

    println!(
        "Screened {} stocks ({} fetched, {} processed) in {:.1}s",
        report.total_scanned, report.fetched, report.processed, report.duration_secs
    );
    if report.results.is_empty() {
        println!("No {signal} signals in the last {recent_days} days.");
        return Ok(());
    }

    println!("{:<10} {:<12} {:<16} {:<12} signal", "code", "name", "industry", "date");
    for result in &report.results {
        println!(
            "{:<10} {:<12} {:<16} {:<12} {}",
            result.code, result.name, result.industry, result.date, result.signal
        );
    }
    Ok(())
}
