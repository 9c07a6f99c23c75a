//! CLI entry point for the docfetch tool.

use std::io::{self, IsTerminal};
use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use clap::Parser;
use docfetch_core::download::{DownloadEngine, Fetcher, HttpClient, RunStatistics};
use docfetch_core::failure::write_failure_log;
use docfetch_core::lifecycle::{Heartbeat, ShutdownToken, spawn_signal_handler};
use docfetch_core::status::{
    CompositeStatusSink, Database, DatabaseStatusSink, NoopStatusSink, ScriptStatusSink,
    StatusReporter, StatusSink,
};
use docfetch_core::{ExitOutcome, RunConfig, connect_storage, load_documents};
use tracing::{debug, error, info, warn};

mod cli;
mod progress;

use cli::Args;

#[tokio::main]
async fn main() {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let outcome = match run(args).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(error = %format!("{e:#}"), "startup failed");
            eprintln!("Error: {e:#}");
            ExitOutcome::StartupFailure
        }
    };
    std::process::exit(outcome.code());
}

async fn run(args: Args) -> Result<ExitOutcome> {
    let config = args.to_run_config()?;
    config.validate()?;

    let documents = load_documents(&args.input)
        .await
        .with_context(|| format!("failed to load documents from {}", args.input.display()))?;
    info!(documents = documents.len(), "docfetch starting");

    let client = HttpClient::with_timeout(config.request_timeout)
        .context("failed to build HTTP client")?;
    let storage = connect_storage(&config.storage, client.inner().clone())
        .await
        .context("failed to open storage backend")?;
    info!(storage = %storage.describe(), "storage ready");

    let sink = build_status_sink(&config, &documents).await?;

    let shutdown = ShutdownToken::new();
    let signal_handler = spawn_signal_handler(shutdown.clone());

    let stats = Arc::new(RunStatistics::new(documents.len()));
    let reporter = StatusReporter::new(Arc::clone(&stats), sink);
    let heartbeat = Heartbeat::spawn(
        Arc::clone(&stats),
        shutdown.clone(),
        config.heartbeat_interval,
    );

    let use_spinner = !args.quiet && io::stderr().is_terminal();
    let (spinner, stop_spinner) = progress::spawn_progress_ui(use_spinner, Arc::clone(&stats));

    let fetcher = Fetcher::new(client, storage, shutdown.clone())
        .with_request_delay(config.request_delay);
    let engine = DownloadEngine::new(config.workers, config.retry_policy())?
        .with_max_downloads(config.max_downloads);

    let result = engine
        .run(documents, fetcher, reporter.clone(), shutdown.clone())
        .await;

    stop_spinner.store(true, Ordering::SeqCst);
    if let Some(spinner) = spinner {
        let _ = spinner.await;
    }
    let beats = heartbeat.stop().await;
    debug!(beats, "heartbeat stopped");

    let report = result?;

    if !reporter.finish().await {
        warn!("final status sink flush failed; see earlier warnings");
    }

    if let Some(path) = &config.failure_log
        && !report.failures.is_empty()
    {
        if let Err(e) = write_failure_log(path, &report.failures).await {
            warn!(path = %path.display(), error = %e, "failed to write failure log");
        }
    }

    if !args.quiet {
        for line in report.summary_lines() {
            println!("{line}");
        }
        if !report.failures.is_empty() {
            println!();
            for line in report.failure_analysis().render_lines() {
                println!("{line}");
            }
        }
    }

    signal_handler.abort();
    Ok(report.exit_outcome())
}

async fn build_status_sink(
    config: &RunConfig,
    documents: &[docfetch_core::DocumentRecord],
) -> Result<Arc<dyn StatusSink>> {
    let mut composite = CompositeStatusSink::new();

    if let Some(path) = &config.status_db {
        let db = Database::new(path)
            .await
            .with_context(|| format!("failed to open status database {}", path.display()))?;
        if config.register_documents {
            let inserted = db
                .register_documents(documents)
                .await
                .context("failed to register documents")?;
            info!(inserted, "registered documents in status database");
        }
        composite.push(Arc::new(DatabaseStatusSink::new(db)));
    }

    if config.script_sink_enabled()
        && let Some(path) = &config.status_script
    {
        info!(path = %path.display(), "status script will be rewritten at the end of the run");
        composite.push(Arc::new(ScriptStatusSink::new(path.clone())));
    }

    if composite.is_empty() {
        debug!("no status sink configured");
        Ok(Arc::new(NoopStatusSink))
    } else {
        Ok(Arc::new(composite))
    }
}
