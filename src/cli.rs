//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Ingest business news from configured sources.
///
/// Newswire scrapes listing pages and pulls API connectors described in a
/// TOML source file, then writes the deduplicated records and a run summary
/// as JSON.
#[derive(Parser, Debug)]
#[command(name = "newswire")]
#[command(author, version, about)]
pub struct Args {
    /// Source configuration file (default: $NEWSWIRE_CONFIG, then
    /// $XDG_CONFIG_HOME/newswire/sources.toml)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Write the run output to FILE instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Override the worker pool size (1-64)
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=64))]
    pub concurrency: Option<u8>,

    /// Override total attempts per request, including the first (1-10)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u8).range(1..=10))]
    pub max_attempts: Option<u8>,

    /// Override the networked cache URL (e.g. redis://127.0.0.1:6379)
    #[arg(long, value_name = "URL")]
    pub cache_url: Option<String>,

    /// Load and validate the configuration, then exit
    #[arg(long)]
    pub validate_only: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}
