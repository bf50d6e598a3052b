use clap::Parser;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tcpconn::config::Config;
use tcpconn::error::{ReportError, TraceError};
use tcpconn::{cli, report, FlowTable, IngestStats, ReadOptions, Summary};

fn main() {
    let args = cli::Cli::parse();

    // Initialize tracing/logging
    let log_level = match args.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    let config = match Config::from_cli(&args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {}", err);
            std::process::exit(1);
        }
    };

    // Stop reading on Ctrl-C but still report what was ingested
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();
    if let Err(err) = ctrlc::set_handler(move || {
        running_clone.store(false, Ordering::SeqCst);
        eprintln!("\nInterrupt received, stopping trace read...");
    }) {
        tracing::warn!(error = %err, "failed to set Ctrl-C handler");
    }

    if let Err(e) = run(&config, &running) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

/// Read the whole trace, then write every report the config asks for.
fn run(config: &Config, running: &AtomicBool) -> tcpconn::Result<()> {
    let reader = open_trace(config.input.trace.as_deref())?;
    let source = config
        .input
        .trace
        .as_deref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(stdin)".to_string());
    tracing::info!(max_flows = config.flow.max_flows, "reading trace from {}", source);

    let mut table = FlowTable::with_capacity_limit(config.flow.max_flows);
    let mut stats = IngestStats::default();
    let options = ReadOptions {
        echo: config.output.echo,
        quiet: config.output.quiet,
    };

    let outcome = tcpconn::ingest_trace(reader, &mut table, &mut stats, options, running)?;
    if outcome.interrupted {
        tracing::warn!(events = outcome.events, "trace read interrupted, reporting partial results");
    }
    if outcome.parse_errors > 0 {
        tracing::warn!(
            parse_errors = outcome.parse_errors,
            "skipped malformed trace lines"
        );
    }
    tracing::info!(
        events = outcome.events,
        flows = table.len(),
        "trace ingested"
    );

    let summary = Summary::from_table(&table, &stats);
    write_stdout(|out| {
        report::write_summary(out, &summary)?;
        if !config.output.quiet {
            report::write_flow_table(out, &table)?;
        }
        Ok(())
    })?;

    if config.output.series {
        let written =
            report::write_series_files(&config.output.directory, &table, config.output.sf_only)?;
        for path in &written {
            tracing::info!("wrote {}", path.display());
        }
    }
    if let Some(path) = &config.output.export_json {
        report::write_flow_json(path, &table)?;
        tracing::info!("flow export (JSON): {}", path.display());
    }
    if let Some(path) = &config.output.export_csv {
        report::write_flow_csv(path, &table)?;
        tracing::info!("flow export (CSV): {}", path.display());
    }

    Ok(())
}

fn open_trace(path: Option<&Path>) -> Result<Box<dyn BufRead>, TraceError> {
    match path {
        Some(path) => {
            let file = File::open(path).map_err(|source| TraceError::Open {
                path: path.to_path_buf(),
                source,
            })?;
            Ok(Box::new(BufReader::new(file)))
        }
        None => Ok(Box::new(BufReader::new(io::stdin()))),
    }
}

fn write_stdout<F>(write: F) -> Result<(), ReportError>
where
    F: FnOnce(&mut io::StdoutLock<'static>) -> io::Result<()>,
{
    let mut out = io::stdout().lock();
    write(&mut out)
        .and_then(|_| out.flush())
        .map_err(|source| ReportError::Write {
            path: PathBuf::from("<stdout>"),
            source,
        })
}
