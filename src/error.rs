//! Error types for tcpconn.

use std::path::PathBuf;

use thiserror::Error;

pub use crate::config::ConfigError;

/// Top-level error for a trace-processing run.
#[derive(Error, Debug)]
pub enum Error {
    /// Flow table rejected a new record
    #[error(transparent)]
    FlowTable(#[from] FlowTableError),

    /// Trace source could not be read
    #[error(transparent)]
    Trace(#[from] TraceError),

    /// Output artifact could not be written
    #[error(transparent)]
    Report(#[from] ReportError),

    /// Configuration could not be loaded
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors raised by the flow table.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlowTableError {
    #[error("too many connections: flow table is full ({max_flows} flows)")]
    CapacityExceeded { max_flows: usize },
}

/// Errors raised while decoding trace lines.
#[derive(Error, Debug)]
pub enum TraceError {
    /// Line ended before the named field
    #[error("line {line}: missing field `{field}`")]
    MissingField { line: u64, field: &'static str },

    /// Field present but not a valid number
    #[error("line {line}: invalid {field}: {value:?}")]
    InvalidNumber {
        line: u64,
        field: &'static str,
        value: String,
    },

    /// Flag token does not start with a recognized TCP flag letter
    #[error("line {line}: invalid flags: {value:?}")]
    InvalidFlags { line: u64, value: String },

    /// Line is not valid UTF-8
    #[error("line {line}: not valid UTF-8")]
    InvalidEncoding { line: u64 },

    /// Trace file could not be opened
    #[error("failed to open trace {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Underlying reader failed
    #[error("trace read error: {0}")]
    Io(#[from] std::io::Error),
}

impl TraceError {
    /// True for errors that only affect a single line.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, TraceError::Io(_) | TraceError::Open { .. })
    }
}

/// Errors raised while writing reports and exports.
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("failed to open {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize flows to {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
