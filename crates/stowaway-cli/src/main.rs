//! stowaway - command-line host for the offline cache.
//!
//! Each invocation wires a worker over the on-disk stores, restores the
//! lifecycle state left by earlier runs, and delivers one event.

mod args;
mod commands;
mod host;

use std::io;
use std::path::Path;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use args::Cli;

/// File name prefix for rolling log files
const LOG_FILE_PREFIX: &str = "stowaway.log";

/// Initialize the tracing subscriber for logging.
///
/// RUST_LOG wins when set; otherwise the level comes from `-v`. With a log
/// directory, events also go to a daily rolling file. The returned guard
/// must live until exit or buffered lines are lost.
fn init_tracing(verbose: u8, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _guard = init_tracing(cli.verbose, cli.log_dir.as_deref());
    info!("stowaway starting");

    commands::run(cli).await
}
