//! tcpconn library crate: flow reconstruction core plus the trace decoder
//! and reporters the binary is built from.

pub mod cli;
pub mod config;
pub mod display;
pub mod error;
pub mod flow;
pub mod ingest;
pub mod report;
pub mod summary;
pub mod trace;

use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

pub use error::{Error, Result};
pub use flow::{Direction, DirectionStats, Endpoint, FlowKey, FlowRecord, FlowTable};
pub use ingest::{ingest, IngestStats};
pub use summary::{FlowClass, Summary};
pub use trace::{PacketEvent, TraceReader};

/// How ingested events are echoed while a trace is read.
///
/// A pass is only interruptible between lines: a reader blocked on an idle
/// pipe keeps the pass alive until its next line or end of input.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions {
    /// Print every event after it is ingested.
    pub echo: bool,
    /// Suppress per-line parse error notes.
    pub quiet: bool,
}

/// Counters describing one pass over a trace source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadOutcome {
    pub events: u64,
    pub parse_errors: u64,
    /// The run flag was cleared before the source was exhausted.
    pub interrupted: bool,
}

/// Decode every line of `reader` and ingest it.
///
/// Malformed lines are counted and skipped. A full flow table or a failing
/// reader aborts the pass. `running` is checked before each line is read;
/// clearing it stops the pass early with everything read so far kept. A read
/// that is already blocked is not woken, so on an idle stdin the stop takes
/// effect once the next line (or EOF) arrives.
pub fn ingest_trace<R: BufRead>(
    reader: R,
    table: &mut FlowTable,
    stats: &mut IngestStats,
    options: ReadOptions,
    running: &AtomicBool,
) -> Result<ReadOutcome> {
    let mut outcome = ReadOutcome::default();
    let mut lines = TraceReader::new(reader);

    while running.load(Ordering::SeqCst) {
        let Some(item) = lines.next() else {
            return Ok(outcome);
        };
        match item {
            Ok(event) => {
                let flow = ingest(table, stats, &event)?;
                outcome.events += 1;
                if options.echo {
                    display::print_event_summary(lines.line_no(), flow, &event);
                }
            }
            Err(err) if err.is_recoverable() => {
                outcome.parse_errors += 1;
                debug!(error = %err, "skipping trace line");
                if !options.quiet {
                    display::print_parse_error(&err);
                }
            }
            Err(err) => return Err(err.into()),
        }
    }

    outcome.interrupted = true;
    Ok(outcome)
}
