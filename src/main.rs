//! Entry point for the embedded debug agent.
//!
//! Parses CLI flags, sets up dual-sink logging (a detailed rotating file
//! plus an optional colorized stdout stream), and hands off to the
//! supervisor in whichever of the two mutually exclusive modes was
//! requested.

use anyhow::{bail, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{filter::LevelFilter, prelude::*, Layer};

use embbridge_agent::logging::ColorizedFormatter;
use embbridge_agent::supervisor;
use embbridge_agent::Args;

fn main() -> Result<()> {
    let args = Args::parse();

    // Configure logging level based on verbosity flags.
    // - default: INFO
    // -v: DEBUG
    // -vv and more: TRACE
    let log_level = match args.verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    let guard;
    let detailed_log_layer;

    if let Some("stderr") = args.log_file.as_deref() {
        detailed_log_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_filter(log_level)
            .boxed();
        guard = None;
    } else {
        let file_appender = match args.log_file.as_deref() {
            Some(path_str) => {
                let log_path = std::path::Path::new(path_str);
                let log_dir = log_path
                    .parent()
                    .unwrap_or_else(|| std::path::Path::new("."));
                let log_filename = log_path
                    .file_name()
                    .unwrap_or_else(|| std::ffi::OsStr::new("embbridge-agent.log"));
                tracing_appender::rolling::daily(log_dir, log_filename)
            }
            None => tracing_appender::rolling::daily(".", "embbridge-agent.log"),
        };
        let (non_blocking_writer, file_guard) = tracing_appender::non_blocking(file_appender);
        detailed_log_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_ansi(false)
            .with_filter(log_level)
            .boxed();
        guard = Some(file_guard);
    }

    let stdout_log = if !args.quiet {
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .event_format(ColorizedFormatter)
                .with_filter(log_level),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(detailed_log_layer)
        .with(stdout_log)
        .init();

    // Keep the file-logging guard alive for the life of the process; if
    // dropped, the non-blocking writer stops flushing.
    let _log_guard = guard;

    info!("starting embbridge-agent");

    match (args.connect_target(), args.listen) {
        (Some(_), Some(_)) => bail!("-c/--connect and -l/--listen are mutually exclusive"),
        (None, None) => bail!("one of -c/--connect or -l/--listen is required"),
        (Some(target), None) => {
            let (host, port) = target?;
            supervisor::run_reverse(&host, port)
        }
        (None, Some(port)) => supervisor::run_bind(port),
    }
}
