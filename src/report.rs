//! Connection reports and per-connection data files.
//!
//! Everything here reads a finished [`FlowTable`]; nothing mutates it.

use serde::Serialize;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::ReportError;
use crate::flow::{FlowRecord, FlowTable};
use crate::summary::{FlowClass, Summary};

const TABLE_HEADER: &str =
    " i  start      IPsrc    port     IPdst    port  B->P->A  B<-P<-A TB TP   end      dur   state";

/// A numeric per-connection metric written to its own data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesMetric {
    Bytes,
    Packets,
    Duration,
}

impl SeriesMetric {
    pub const ALL: [SeriesMetric; 3] = [
        SeriesMetric::Bytes,
        SeriesMetric::Packets,
        SeriesMetric::Duration,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            SeriesMetric::Bytes => "bytesperconn.dat",
            SeriesMetric::Packets => "pktsperconn.dat",
            SeriesMetric::Duration => "timeperconn.dat",
        }
    }

    fn write_value<W: Write>(self, out: &mut W, flow: &FlowRecord) -> io::Result<()> {
        match self {
            SeriesMetric::Bytes => writeln!(out, "{}", flow.total_bytes()),
            SeriesMetric::Packets => writeln!(out, "{}", flow.total_packets()),
            SeriesMetric::Duration => writeln!(out, "{:.6}", flow.duration()),
        }
    }
}

/// True for connections that belong in the series files when they are
/// restricted to clean, complete connections.
pub fn is_clean_complete(flow: &FlowRecord) -> bool {
    FlowClass::of(flow) == FlowClass::Sf && !flow.was_reset()
}

pub fn write_summary<W: Write>(out: &mut W, summary: &Summary) -> io::Result<()> {
    let sf = summary.class(FlowClass::Sf);
    let sx = summary.class(FlowClass::Sx);
    let xf = summary.class(FlowClass::Xf);
    let xx = summary.class(FlowClass::Xx);
    writeln!(
        out,
        "Total Packets: {} (SF {}, SX {}, XF {}, XX {}) (R {} pkts {} conns)",
        summary.total_packets,
        sf.packets,
        sx.packets,
        xf.packets,
        xx.packets,
        summary.resets,
        summary.reset_flows
    )?;
    writeln!(
        out,
        "Total Connections Seen: {} (SF {}, SX {}, XF {}, XX {}) (B {})",
        summary.total_flows, sf.flows, sx.flows, xf.flows, xx.flows, summary.bidirectional
    )
}

pub fn write_flow_table<W: Write>(out: &mut W, table: &FlowTable) -> io::Result<()> {
    writeln!(out, "{}", TABLE_HEADER)?;
    for (index, flow) in table.iter().enumerate() {
        write_flow_line(out, index, flow)?;
    }
    Ok(())
}

fn write_flow_line<W: Write>(out: &mut W, index: usize, flow: &FlowRecord) -> io::Result<()> {
    writeln!(
        out,
        "{} {:8.6} {} {} {} {} {} {} {} {} {} {} {} {} {:8.6} {:8.6} {}{}{}{}{}{} {} {}",
        index,
        flow.start_time,
        flow.key.src.addr,
        flow.key.src.port,
        flow.key.dst.addr,
        flow.key.dst.port,
        flow.forward.bytes,
        flow.forward.packets,
        flow.forward.ack_packets,
        flow.reverse.bytes,
        flow.reverse.packets,
        flow.reverse.ack_packets,
        flow.total_bytes(),
        flow.total_packets(),
        flow.end_time,
        flow.duration(),
        if flow.saw_syn { 'S' } else { 'X' },
        flow.syn_count,
        if flow.saw_fin { 'F' } else { 'X' },
        flow.fin_count,
        if flow.was_reset() { 'R' } else { 'G' },
        flow.reset_count,
        flow.forward.seq_span(),
        flow.reverse.seq_span()
    )
}

/// Write one metric for each selected flow, one value per line.
pub fn write_series<W: Write>(
    out: &mut W,
    table: &FlowTable,
    metric: SeriesMetric,
    sf_only: bool,
) -> io::Result<()> {
    for flow in table.iter().filter(|f| !sf_only || is_clean_complete(f)) {
        metric.write_value(out, flow)?;
    }
    Ok(())
}

/// Write every series file into `dir` and return the paths written.
pub fn write_series_files(
    dir: &Path,
    table: &FlowTable,
    sf_only: bool,
) -> Result<Vec<PathBuf>, ReportError> {
    let mut written = Vec::with_capacity(SeriesMetric::ALL.len());
    for metric in SeriesMetric::ALL {
        let path = dir.join(metric.file_name());
        let mut writer = create(&path)?;
        write_series(&mut writer, table, metric, sf_only)
            .and_then(|_| writer.flush())
            .map_err(|source| ReportError::Write {
                path: path.clone(),
                source,
            })?;
        written.push(path);
    }
    Ok(written)
}

#[derive(Debug, Serialize)]
struct FlowExport<'a> {
    index: usize,
    class: FlowClass,
    #[serde(flatten)]
    flow: &'a FlowRecord,
    duration_secs: f64,
    bytes_total: u64,
    packets_total: u64,
    forward_seq_span: i32,
    reverse_seq_span: i32,
}

impl<'a> FlowExport<'a> {
    fn new(index: usize, flow: &'a FlowRecord) -> Self {
        FlowExport {
            index,
            class: FlowClass::of(flow),
            flow,
            duration_secs: flow.duration(),
            bytes_total: flow.total_bytes(),
            packets_total: flow.total_packets(),
            forward_seq_span: flow.forward.seq_span(),
            reverse_seq_span: flow.reverse.seq_span(),
        }
    }
}

pub fn write_flow_json(path: &Path, table: &FlowTable) -> Result<(), ReportError> {
    let flows: Vec<FlowExport<'_>> = table
        .iter()
        .enumerate()
        .map(|(index, flow)| FlowExport::new(index, flow))
        .collect();
    let mut writer = create(path)?;
    serde_json::to_writer_pretty(&mut writer, &flows).map_err(|source| ReportError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    writer.flush().map_err(|source| ReportError::Write {
        path: path.to_path_buf(),
        source,
    })
}

pub fn write_flow_csv(path: &Path, table: &FlowTable) -> Result<(), ReportError> {
    let mut writer = create(path)?;
    write_csv(&mut writer, table)
        .and_then(|_| writer.flush())
        .map_err(|source| ReportError::Write {
            path: path.to_path_buf(),
            source,
        })
}

fn write_csv<W: Write>(writer: &mut W, table: &FlowTable) -> io::Result<()> {
    writeln!(
        writer,
        "index,src_addr,src_port,dst_addr,dst_port,class,start_time,end_time,duration_secs,bytes_forward,packets_forward,acks_forward,bytes_reverse,packets_reverse,acks_reverse,bytes_total,packets_total,syn_count,fin_count,reset_count,bidirectional,forward_seq_span,reverse_seq_span"
    )?;
    for (index, flow) in table.iter().enumerate() {
        writeln!(
            writer,
            "{},{},{},{},{},{},{:.6},{:.6},{:.6},{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
            index,
            csv_escape(&flow.key.src.addr),
            flow.key.src.port,
            csv_escape(&flow.key.dst.addr),
            flow.key.dst.port,
            FlowClass::of(flow),
            flow.start_time,
            flow.end_time,
            flow.duration(),
            flow.forward.bytes,
            flow.forward.packets,
            flow.forward.ack_packets,
            flow.reverse.bytes,
            flow.reverse.packets,
            flow.reverse.ack_packets,
            flow.total_bytes(),
            flow.total_packets(),
            flow.syn_count,
            flow.fin_count,
            flow.reset_count,
            flow.bidirectional,
            flow.forward.seq_span(),
            flow.reverse.seq_span()
        )?;
    }
    Ok(())
}

/// Escape a CSV field: wrap in double quotes if it contains comma, quote, or newline.
fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r') {
        let escaped = field.replace('"', "\"\"");
        format!("\"{}\"", escaped)
    } else {
        field.to_string()
    }
}

fn create(path: &Path) -> Result<BufWriter<File>, ReportError> {
    let file = File::create(path).map_err(|source| ReportError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(BufWriter::new(file))
}
