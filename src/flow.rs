use serde::Serialize;
use std::fmt;
use tracing::{debug, warn};

use crate::error::FlowTableError;

/// Default ceiling on the number of distinct connections in one trace.
pub const DEFAULT_MAX_FLOWS: usize = 8000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    pub addr: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(addr: impl Into<String>, port: u16) -> Self {
        Endpoint {
            addr: addr.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

/// Traffic direction relative to the first packet seen for a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Forward => Direction::Reverse,
            Direction::Reverse => Direction::Forward,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Forward => write!(f, "forward"),
            Direction::Reverse => write!(f, "reverse"),
        }
    }
}

/// Identity of a flow, oriented as the first packet named it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowKey {
    pub src: Endpoint,
    pub dst: Endpoint,
}

impl FlowKey {
    pub fn new(src: Endpoint, dst: Endpoint) -> Self {
        FlowKey { src, dst }
    }

    /// True if `(src, dst)` names this flow as recorded or fully swapped.
    pub fn matches(&self, src: &Endpoint, dst: &Endpoint) -> bool {
        (self.src == *src && self.dst == *dst) || (self.src == *dst && self.dst == *src)
    }

    /// Direction of a packet sent by `sender`.
    ///
    /// Only the address is compared, so two endpoints sharing an address
    /// always count as forward traffic.
    pub fn direction_of(&self, sender: &Endpoint) -> Direction {
        if sender.addr == self.src.addr {
            Direction::Forward
        } else {
            Direction::Reverse
        }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.src, self.dst)
    }
}

/// Counters and sequence bookkeeping for one direction of a flow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DirectionStats {
    pub start_seq: u64,
    pub end_seq: u64,
    pub start_ack: u64,
    pub end_ack: u64,
    pub bytes: u64,
    pub packets: u64,
    pub ack_packets: u64,
}

impl DirectionStats {
    /// True once this direction has sent anything other than a pure ack.
    pub fn sent_data(&self) -> bool {
        self.packets > self.ack_packets
    }

    /// Sequence numbers consumed between the opening SYN and the FIN,
    /// in 32-bit sequence space.
    pub fn seq_span(&self) -> i32 {
        self.end_seq.wrapping_sub(self.start_seq).wrapping_sub(1) as u32 as i32
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FlowRecord {
    #[serde(flatten)]
    pub key: FlowKey,
    pub saw_syn: bool,
    pub saw_fin: bool,
    pub syn_count: u32,
    pub fin_count: u32,
    pub reset_count: u32,
    pub start_time: f64,
    pub end_time: f64,
    pub forward: DirectionStats,
    pub reverse: DirectionStats,
    pub bidirectional: bool,
}

impl FlowRecord {
    /// A zeroed record whose start time and forward starting sequence pair
    /// come from the creating packet.
    fn new(key: FlowKey, time: f64, seq: u64, ack: u64) -> Self {
        FlowRecord {
            key,
            saw_syn: false,
            saw_fin: false,
            syn_count: 0,
            fin_count: 0,
            reset_count: 0,
            start_time: time,
            end_time: 0.0,
            forward: DirectionStats {
                start_seq: seq,
                start_ack: ack,
                ..DirectionStats::default()
            },
            reverse: DirectionStats::default(),
            bidirectional: false,
        }
    }

    pub fn direction(&self, dir: Direction) -> &DirectionStats {
        match dir {
            Direction::Forward => &self.forward,
            Direction::Reverse => &self.reverse,
        }
    }

    pub fn direction_mut(&mut self, dir: Direction) -> &mut DirectionStats {
        match dir {
            Direction::Forward => &mut self.forward,
            Direction::Reverse => &mut self.reverse,
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.forward.bytes + self.reverse.bytes
    }

    pub fn total_packets(&self) -> u64 {
        self.forward.packets + self.reverse.packets
    }

    /// Seconds between the first packet and the last ACK/RST/FIN.
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    pub fn was_reset(&self) -> bool {
        self.reset_count > 0
    }
}

/// Insertion-ordered flow records with a fixed capacity ceiling.
#[derive(Debug)]
pub struct FlowTable {
    flows: Vec<FlowRecord>,
    max_flows: usize,
}

impl Default for FlowTable {
    fn default() -> Self {
        FlowTable::with_capacity_limit(DEFAULT_MAX_FLOWS)
    }
}

impl FlowTable {
    pub fn with_capacity_limit(max_flows: usize) -> Self {
        FlowTable {
            flows: Vec::new(),
            max_flows,
        }
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    /// Index of the oldest flow whose identity matches `(src, dst)` in
    /// either orientation.
    pub fn find(&self, src: &Endpoint, dst: &Endpoint) -> Option<usize> {
        self.flows.iter().position(|flow| flow.key.matches(src, dst))
    }

    /// Append a new flow oriented as `src -> dst` and return its index.
    pub fn create(
        &mut self,
        src: &Endpoint,
        dst: &Endpoint,
        time: f64,
        seq: u64,
        ack: u64,
    ) -> Result<usize, FlowTableError> {
        if self.flows.len() >= self.max_flows {
            warn!(max_flows = self.max_flows, "flow table full, rejecting {} -> {}", src, dst);
            return Err(FlowTableError::CapacityExceeded {
                max_flows: self.max_flows,
            });
        }
        let index = self.flows.len();
        let key = FlowKey::new(src.clone(), dst.clone());
        debug!(index, "new flow {}", key);
        self.flows.push(FlowRecord::new(key, time, seq, ack));
        Ok(index)
    }

    pub fn get(&self, index: usize) -> Option<&FlowRecord> {
        self.flows.get(index)
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut FlowRecord> {
        self.flows.get_mut(index)
    }

    /// All flows in creation order.
    pub fn all(&self) -> &[FlowRecord] {
        &self.flows
    }

    pub fn iter(&self) -> impl Iterator<Item = &FlowRecord> {
        self.flows.iter()
    }
}
