//! Handshake classification of a finished flow table.

use serde::Serialize;
use std::fmt;

use crate::flow::{FlowRecord, FlowTable};
use crate::ingest::IngestStats;

/// Connection class by (SYN seen, FIN seen).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FlowClass {
    /// SYN and FIN both seen: a complete connection.
    #[serde(rename = "SF")]
    Sf,
    #[serde(rename = "SX")]
    Sx,
    #[serde(rename = "XF")]
    Xf,
    #[serde(rename = "XX")]
    Xx,
}

impl FlowClass {
    pub const ALL: [FlowClass; 4] = [FlowClass::Sf, FlowClass::Sx, FlowClass::Xf, FlowClass::Xx];

    pub fn of(flow: &FlowRecord) -> Self {
        match (flow.saw_syn, flow.saw_fin) {
            (true, true) => FlowClass::Sf,
            (true, false) => FlowClass::Sx,
            (false, true) => FlowClass::Xf,
            (false, false) => FlowClass::Xx,
        }
    }

    fn slot(self) -> usize {
        match self {
            FlowClass::Sf => 0,
            FlowClass::Sx => 1,
            FlowClass::Xf => 2,
            FlowClass::Xx => 3,
        }
    }
}

impl fmt::Display for FlowClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowClass::Sf => write!(f, "SF"),
            FlowClass::Sx => write!(f, "SX"),
            FlowClass::Xf => write!(f, "XF"),
            FlowClass::Xx => write!(f, "XX"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClassTotals {
    pub flows: u64,
    pub packets: u64,
}

/// Aggregate view of a trace after ingestion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total_packets: u64,
    pub total_flows: u64,
    pub resets: u64,
    pub reset_flows: u64,
    pub bidirectional: u64,
    classes: [ClassTotals; 4],
}

impl Summary {
    pub fn from_table(table: &FlowTable, stats: &IngestStats) -> Self {
        let mut summary = Summary {
            total_packets: stats.total_packets,
            resets: stats.resets,
            reset_flows: stats.reset_flows,
            ..Summary::default()
        };
        for flow in table.iter() {
            summary.total_flows += 1;
            let totals = &mut summary.classes[FlowClass::of(flow).slot()];
            totals.flows += 1;
            totals.packets += flow.total_packets();
            if flow.bidirectional {
                summary.bidirectional += 1;
            }
        }
        summary
    }

    pub fn class(&self, class: FlowClass) -> ClassTotals {
        self.classes[class.slot()]
    }
}
