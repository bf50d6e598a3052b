use clap::Parser;
use std::path::PathBuf;

/// tcpconn: per-connection TCP summaries from a decoded packet trace
#[derive(Parser, Debug)]
#[command(
    name = "tcpconn",
    version,
    about,
    after_help = "Ctrl-C stops reading and reports what was read so far. When reading \
                  standard input, the stop takes effect once the next line or EOF arrives."
)]
pub struct Cli {
    /// Trace file to read ("-" or omitted reads standard input)
    pub trace: Option<PathBuf>,

    /// Path to a TOML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Maximum number of distinct connections before aborting
    #[arg(long)]
    pub max_flows: Option<usize>,

    /// Directory for bytesperconn.dat, pktsperconn.dat and timeperconn.dat
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Write every connection to the data files, not only clean SF ones
    #[arg(long)]
    pub all_flows: bool,

    /// Skip writing the per-connection data files
    #[arg(long)]
    pub no_series: bool,

    /// Export all connections as JSON
    #[arg(long)]
    pub export_json: Option<PathBuf>,

    /// Export all connections as CSV
    #[arg(long)]
    pub export_csv: Option<PathBuf>,

    /// Print every decoded event as it is ingested
    #[arg(long)]
    pub echo: bool,

    /// Only print the summary totals
    #[arg(short, long)]
    pub quiet: bool,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}
