//! Event display / pretty-printing for the CLI.
//!
//! Formats decoded trace events into human-readable one-line summaries.

use crate::error::TraceError;
use crate::ingest::{ControlFlag, IP_ACK_SIZE};
use crate::trace::PacketEvent;

/// Print a one-line summary of a decoded event and the flow it landed in.
pub fn print_event_summary(index: u64, flow: usize, event: &PacketEvent) {
    println!("{}", format_event_summary(index, flow, event));
}

fn format_event_summary(index: u64, flow: usize, event: &PacketEvent) -> String {
    let ts = format_timestamp(event.time);

    let mut summary = format!(
        "#{:<6} {} conn {:<4} {} -> {} {} seq={} ack={} win={}",
        index,
        ts,
        flow,
        event.src,
        event.dst,
        event.flags,
        event.seq,
        event.ack,
        event.window
    );

    let kind = match ControlFlag::classify(&event.flags) {
        Some(ControlFlag::Syn) => "handshake",
        Some(ControlFlag::Fin) => "teardown",
        Some(ControlFlag::Rst) => "reset",
        _ if event.ip_size <= IP_ACK_SIZE => "ack",
        _ => "data",
    };
    summary.push_str(&format!(" | {} bytes ({})", event.ip_size, kind));

    summary
}

/// Format a trace timestamp (seconds) into a readable time.
fn format_timestamp(ts: f64) -> String {
    let secs = ts as u64;
    let micros = ((ts - secs as f64) * 1_000_000.0) as u32;

    let hours = (secs % 86400) / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    format!("{:02}:{:02}:{:02}.{:06}", hours, minutes, seconds, micros)
}

/// Print a compact one-line note for a trace line that failed to decode.
///
/// Written to stderr; stdout carries the report.
pub fn print_parse_error(error: &TraceError) {
    eprintln!("[PARSE ERROR] {}", error);
}
