//! CLI entry point for newswire.

use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use clap::Parser;
use newswire::config::{ConnectorKind, resolve_config_path};
use newswire::{CacheStore, ConfigError, ConnectorRouter, IngestConfig};
use tracing::{debug, error, info, warn};

mod cli;

use cli::Args;

/// Every attempted source failed.
const EXIT_ALL_FAILED: u8 = 1;
/// The configuration could not be loaded or validated.
const EXIT_CONFIG: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
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

    // Logs go to stderr; stdout carries the JSON output.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            if e.downcast_ref::<ConfigError>().is_some() {
                ExitCode::from(EXIT_CONFIG)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    let path = resolve_config_path(args.config.as_deref()).ok_or(ConfigError::NotFound)?;
    let mut config = IngestConfig::load(&path)?;

    if let Some(concurrency) = args.concurrency {
        config.settings.concurrency = usize::from(concurrency);
    }
    if let Some(max_attempts) = args.max_attempts {
        config.settings.max_attempts = u32::from(max_attempts);
    }
    if let Some(cache_url) = args.cache_url {
        config.settings.cache_url = Some(cache_url);
    }

    if args.validate_only {
        let markup = config
            .sources
            .iter()
            .filter(|s| s.descriptor.kind == ConnectorKind::Markup)
            .count();
        println!(
            "configuration ok: {} sources ({markup} markup, {} schema)",
            config.sources.len(),
            config.sources.len() - markup
        );
        return Ok(ExitCode::SUCCESS);
    }

    info!(sources = config.sources.len(), "newswire starting");

    let cache = Arc::new(CacheStore::connect(config.settings.cache_url.as_deref()).await);
    let router = ConnectorRouter::from_config(&config, cache)
        .context("failed to build HTTP client")?;

    let cancel = router.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight sources");
            cancel.store(true, Ordering::SeqCst);
        }
    });

    let run = router.run(&config.sources).await;
    let json = serde_json::to_string_pretty(&run).context("failed to serialize run output")?;

    match &args.output {
        Some(path) => {
            std::fs::write(path, json + "\n")
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!(path = %path.display(), "wrote run output");
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{json}").context("failed to write run output")?;
        }
    }

    info!(
        records = run.summary.records_produced,
        failed = run.summary.failed.len(),
        cancelled = run.summary.cancelled.len(),
        cache_hit_ratio = run.summary.cache_hit_ratio,
        "ingestion complete"
    );

    if run.summary.all_failed() {
        return Ok(ExitCode::from(EXIT_ALL_FAILED));
    }
    Ok(ExitCode::SUCCESS)
}
