use std::sync::Arc;

use anyhow::{Context, Result};
use harness::alloc::CountingAllocator;
use harness::config::{HarnessConfig, LogFormat, LogOutput, OutputFormat};
use harness::runner::BenchmarkRunner;
use tracing::info;

#[global_allocator]
static ALLOC: CountingAllocator = CountingAllocator;

#[tokio::main]
async fn main() -> Result<()> {
    // Phase 1: Basic tracing so we can log during config loading
    // Thread-local, so Phase 2 can still install the global subscriber
    let basic_tracing = init_tracing_basic();

    info!("Starting detection benchmark v{}", env!("CARGO_PKG_VERSION"));

    let config = HarnessConfig::load().context("Failed to load configuration")?;
    config
        .validate()
        .context("Configuration validation failed")?;

    // Phase 2: Re-initialize tracing with config (format, level, output)
    drop(basic_tracing);
    init_tracing_from_config(&config)?;

    info!(
        iterations = config.run.iterations,
        seed = config.run.seed,
        reuse_payloads = config.run.reuse_payloads,
        "Configuration loaded"
    );

    let runner = BenchmarkRunner::new(config.clone());
    let samples = runner.run().await;
    let report = runner.report(&samples);

    let json = report.to_json().context("Failed to serialize report")?;
    match config.output.format {
        OutputFormat::Json => println!("{}", json),
        OutputFormat::Text => print!("{}", report.render_text()),
        OutputFormat::Both => {
            print!("{}", report.render_text());
            println!("{}", json);
        }
    }

    if let Some(path) = &config.output.report_path {
        std::fs::write(path, &json)
            .with_context(|| format!("Failed to write report to '{}'", path))?;
        info!("Report written to {}", path);
    }

    info!(runs = samples.len(), "Benchmark finished");
    Ok(())
}

/// Phase 1: Basic tracing init so we can log during config loading.
/// Uses RUST_LOG env var or a sensible default.
fn init_tracing_basic() -> tracing::subscriber::DefaultGuard {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,harness=debug"));

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_default(subscriber)
}

/// Phase 2: Install the global subscriber described by the config.
/// Logs go to stderr or a file so stdout carries only the report.
fn init_tracing_from_config(config: &HarnessConfig) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    // Prefer RUST_LOG env var, fall back to config level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let file = match &config.logging.output {
        LogOutput::Stderr => None,
        LogOutput::File { path } => Some(Arc::new(
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file '{}'", path))?,
        )),
    };

    let registry = tracing_subscriber::registry().with(filter);
    match (&config.logging.format, file) {
        (LogFormat::Json, None) => registry
            .with(fmt::layer().json().with_target(true).with_writer(std::io::stderr))
            .try_init(),
        (LogFormat::Json, Some(file)) => registry
            .with(fmt::layer().json().with_target(true).with_ansi(false).with_writer(file))
            .try_init(),
        (LogFormat::Pretty, None) => registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init(),
        (LogFormat::Pretty, Some(file)) => registry
            .with(fmt::layer().with_target(true).with_ansi(false).with_writer(file))
            .try_init(),
    }
    .context("Failed to install tracing subscriber")
}
