use std::fs::File;
use std::io::{self, BufReader};

use anyhow::{Context, Result};
use clap::Parser;
use huella::cli::{Cli, OutputFormat};
use huella::config::EngineConfig;
use huella::engine::DetectionEngine;
use huella::json_output::JsonReport;
use huella::replay::{self, ReplayOutcome};
use huella::stats::EngineStats;
use huella::thresholds::{FrequencyCheck, RatioCheck};
use huella::verdict::DetectionRecord;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

fn frequency_line(name: &str, check: &FrequencyCheck) -> String {
    format!(
        "  {:<18} {}/{}{}",
        name,
        check.count,
        check.limit,
        if check.exceeded { "  EXCEEDED" } else { "" }
    )
}

fn ratio_line(name: &str, check: &RatioCheck) -> String {
    format!(
        "  {:<18} {:.2}/{:.2}{}",
        name,
        check.ratio,
        check.threshold,
        if check.exceeded { "  EXCEEDED" } else { "" }
    )
}

/// Print the run summary table
fn print_summary(stats: &EngineStats, detections: &[DetectionRecord], outcome: &ReplayOutcome) {
    let unique_domains = detections
        .iter()
        .map(|d| d.domain.as_str())
        .collect::<std::collections::HashSet<_>>()
        .len();

    println!("=== Canvas Fingerprinting Report ===");
    println!(
        "Events replayed:    {} ({} rejected)",
        outcome.events_replayed, outcome.events_rejected
    );
    println!(
        "Detections:         {} ({} suppressed)",
        detections.len(),
        stats.detections_suppressed
    );
    println!("Unique domains:     {unique_domains}");
    println!("Surfaces observed:  {}", stats.surfaces);
    println!("Thresholds:");
    println!("{}", frequency_line("canvas calls:", &stats.thresholds.canvas_calls));
    println!("{}", frequency_line("font metrics:", &stats.thresholds.font_metrics));
    println!("{}", ratio_line("read/write ratio:", &stats.thresholds.read_write_ratio));
    println!("{}", frequency_line("suspicious ops:", &stats.thresholds.suspicious_ops));
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => EngineConfig::default(),
    };
    config.trusted_origins.extend(cli.trust.iter().cloned());

    let mut engine = DetectionEngine::new(config).context("building detection engine")?;

    let outcome = match &cli.trace {
        Some(path) => {
            let file =
                File::open(path).with_context(|| format!("opening trace {}", path.display()))?;
            replay::replay(&mut engine, BufReader::new(file))?
        }
        None => replay::replay(&mut engine, io::stdin().lock())?,
    };

    let mut detections = outcome.detections.clone();
    if cli.classify {
        detections.extend(replay::classify_all(&mut engine));
    }

    let stats = engine.stats();
    match cli.format {
        OutputFormat::Json => {
            let report = JsonReport::build(&stats, detections, stats.thresholds.timestamp_ms);
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Text => {
            if !cli.summary {
                for d in &detections {
                    println!(
                        "{:>10}  {:<14} {:<12} {:>5.2}  {}",
                        d.timestamp_ms, d.method, d.source, d.score, d.caller_url
                    );
                }
                if !detections.is_empty() {
                    println!();
                }
            }
            print_summary(&stats, &detections, &outcome);
        }
    }

    Ok(())
}
