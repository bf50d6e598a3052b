//! Per-packet accumulation.
//!
//! [`ingest`] is the only way events enter a [`FlowTable`]: it finds or
//! creates the flow for an event and then folds the event into it.

use serde::Serialize;
use tracing::trace;

use crate::error::FlowTableError;
use crate::flow::{FlowRecord, FlowTable};
use crate::trace::PacketEvent;

/// IP size of an empty acknowledgment; anything larger carries data.
pub const IP_ACK_SIZE: u32 = 52;

/// Handshake packets of this size are reported 8 bytes larger than the
/// equivalent data-path framing.
const INFLATED_SYN_SIZE: u32 = 60;
const SYN_SIZE_CORRECTION: u32 = 8;

/// Reset packets are reported 12 bytes short of the data-path framing.
const RST_SIZE_CORRECTION: u32 = 12;

/// Trace-wide counters kept alongside the flow table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    /// Events ingested.
    pub total_packets: u64,
    /// RST packets seen across all flows.
    pub resets: u64,
    /// Flows that saw at least one RST.
    pub reset_flows: u64,
}

/// Control marker taken from the first letter of an event's flag set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFlag {
    Syn,
    Fin,
    Ack,
    Rst,
    Psh,
}

impl ControlFlag {
    pub fn classify(flags: &str) -> Option<Self> {
        match flags.chars().next()? {
            'S' => Some(ControlFlag::Syn),
            'F' => Some(ControlFlag::Fin),
            'A' => Some(ControlFlag::Ack),
            'R' => Some(ControlFlag::Rst),
            'P' => Some(ControlFlag::Psh),
            _ => None,
        }
    }
}

/// Fold one event into the table, creating its flow on first sight.
///
/// Returns the index of the flow the event was applied to.
pub fn ingest(
    table: &mut FlowTable,
    stats: &mut IngestStats,
    event: &PacketEvent,
) -> Result<usize, FlowTableError> {
    stats.total_packets += 1;

    let index = match table.find(&event.src, &event.dst) {
        Some(index) => index,
        None => table.create(&event.src, &event.dst, event.time, event.seq, event.ack)?,
    };

    if let Some(flow) = table.get_mut(index) {
        apply_event(flow, event, stats);
    }
    Ok(index)
}

/// Update `flow` with `event`: control flags, timing, sequence
/// bookkeeping, per-direction counters and the bidirectional verdict.
pub fn apply_event(flow: &mut FlowRecord, event: &PacketEvent, stats: &mut IngestStats) {
    let dir = flow.key.direction_of(&event.src);
    let flag = ControlFlag::classify(&event.flags);
    let mut size = event.ip_size;

    trace!(
        time = event.time,
        %dir,
        size,
        flags = %event.flags,
        "{} -> {}",
        event.src,
        event.dst
    );

    match flag {
        Some(ControlFlag::Syn) => {
            flow.saw_syn = true;
            flow.syn_count += 1;
            if size == INFLATED_SYN_SIZE {
                size -= SYN_SIZE_CORRECTION;
            }
            let side = flow.direction_mut(dir);
            side.start_seq = event.seq;
            side.start_ack = event.ack;
        }
        Some(ControlFlag::Rst) => {
            if flow.reset_count == 0 {
                stats.reset_flows += 1;
            }
            flow.reset_count += 1;
            flow.end_time = event.time;
            stats.resets += 1;
            size = size.saturating_add(RST_SIZE_CORRECTION);
        }
        Some(ControlFlag::Ack) => {
            flow.end_time = event.time;
        }
        Some(ControlFlag::Fin) => {
            flow.saw_fin = true;
            flow.fin_count += 1;
            // the latest FIN defines the end of the connection
            flow.end_time = event.time;
            let side = flow.direction_mut(dir);
            side.end_seq = event.seq;
            side.end_ack = event.ack;
        }
        Some(ControlFlag::Psh) | None => {}
    }

    let peer_sent_data = flow.direction(dir.opposite()).sent_data();
    let sender = flow.direction_mut(dir);
    sender.bytes += u64::from(size.saturating_sub(IP_ACK_SIZE));
    sender.packets += 1;
    if size <= IP_ACK_SIZE {
        sender.ack_packets += 1;
    } else if peer_sent_data {
        flow.bidirectional = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{Direction, Endpoint};

    const CLIENT: (&str, u16) = ("192.168.1.201", 100);
    const SERVER: (&str, u16) = ("192.168.1.200", 200);

    fn event(
        time: f64,
        from: (&str, u16),
        to: (&str, u16),
        ip_size: u32,
        seq: u64,
        ack: u64,
        flags: &str,
    ) -> PacketEvent {
        PacketEvent {
            time,
            src: Endpoint::new(from.0, from.1),
            dst: Endpoint::new(to.0, to.1),
            ip_size,
            seq,
            seq2: seq,
            ack,
            window: 5840,
            flags: flags.to_string(),
        }
    }

    fn run(events: &[PacketEvent]) -> (FlowTable, IngestStats) {
        let mut table = FlowTable::default();
        let mut stats = IngestStats::default();
        for ev in events {
            ingest(&mut table, &mut stats, ev).unwrap();
        }
        (table, stats)
    }

    #[test]
    fn classify_uses_first_letter() {
        assert_eq!(ControlFlag::classify("S"), Some(ControlFlag::Syn));
        assert_eq!(ControlFlag::classify("FA"), Some(ControlFlag::Fin));
        assert_eq!(ControlFlag::classify("PA"), Some(ControlFlag::Psh));
        assert_eq!(ControlFlag::classify("AF"), Some(ControlFlag::Ack));
        assert_eq!(ControlFlag::classify("R"), Some(ControlFlag::Rst));
        assert_eq!(ControlFlag::classify("U"), None);
        assert_eq!(ControlFlag::classify(""), None);
    }

    #[test]
    fn full_handshake_and_teardown() {
        let events = [
            event(0.0, CLIENT, SERVER, 60, 1000, 0, "S"),
            event(0.1, SERVER, CLIENT, 60, 5000, 1001, "S"),
            event(0.2, SERVER, CLIENT, 200, 5001, 1001, "A"),
            event(0.3, CLIENT, SERVER, 150, 1001, 5149, "A"),
            event(0.4, CLIENT, SERVER, 52, 1099, 5149, "F"),
            event(0.5, SERVER, CLIENT, 52, 5149, 1100, "F"),
        ];
        let (table, stats) = run(&events);

        assert_eq!(table.len(), 1);
        let flow = table.get(0).unwrap();
        assert!(flow.saw_syn && flow.saw_fin);
        assert_eq!((flow.syn_count, flow.fin_count), (2, 2));
        assert!(flow.bidirectional);
        assert_eq!(flow.forward.packets, 3);
        assert_eq!(flow.reverse.packets, 3);
        assert_eq!(flow.forward.bytes, 150 - 52);
        assert_eq!(flow.reverse.bytes, 200 - 52);
        assert_eq!(flow.forward.ack_packets, 2);
        assert_eq!(flow.reverse.ack_packets, 2);
        assert_eq!(flow.start_time, 0.0);
        assert_eq!(flow.end_time, 0.5);
        assert_eq!((flow.forward.start_seq, flow.forward.end_seq), (1000, 1099));
        assert_eq!((flow.reverse.start_seq, flow.reverse.end_seq), (5000, 5149));
        assert_eq!(flow.reverse.start_ack, 1001);
        assert_eq!(flow.forward.seq_span(), 98);
        assert_eq!(flow.reverse.seq_span(), 148);
        assert_eq!(stats.total_packets, 6);
        assert_eq!(stats.resets, 0);
    }

    #[test]
    fn reverse_first_packet_fixes_orientation() {
        let events = [
            event(1.0, SERVER, CLIENT, 100, 1, 1, "A"),
            event(2.0, CLIENT, SERVER, 52, 1, 1, "A"),
        ];
        let (table, _) = run(&events);
        assert_eq!(table.len(), 1);
        let flow = table.get(0).unwrap();
        assert_eq!(flow.key.src, Endpoint::new(SERVER.0, SERVER.1));
        assert_eq!(flow.forward.packets, 1);
        assert_eq!(flow.reverse.packets, 1);
    }

    #[test]
    fn reset_on_new_flow_counts_once() {
        let (table, stats) = run(&[event(0.7, CLIENT, SERVER, 40, 1, 0, "R")]);
        assert_eq!(stats.resets, 1);
        assert_eq!(stats.reset_flows, 1);
        let flow = table.get(0).unwrap();
        assert_eq!(flow.reset_count, 1);
        assert_eq!(flow.end_time, 0.7);
        // 40 + 12 is exactly an empty ack
        assert_eq!(flow.forward.bytes, 0);
        assert_eq!(flow.forward.ack_packets, 1);
    }

    #[test]
    fn reset_adds_twelve_bytes() {
        let (table, _) = run(&[event(0.0, CLIENT, SERVER, 100, 1, 0, "R")]);
        assert_eq!(table.get(0).unwrap().forward.bytes, 100 + 12 - 52);
    }

    #[test]
    fn oversized_reset_saturates_instead_of_wrapping() {
        let line = "0.0 10.0.0.1 -> 10.0.0.2 4294967290 TCP 1 80 0 : 0 0 win: 0 R";
        let event = crate::trace::parse_line(1, line).unwrap().unwrap();
        let (table, stats) = run(&[event]);
        let flow = table.get(0).unwrap();
        assert_eq!(flow.forward.bytes, u64::from(u32::MAX - IP_ACK_SIZE));
        assert_eq!(flow.forward.ack_packets, 0);
        assert_eq!(stats.resets, 1);
    }

    #[test]
    fn repeated_resets_count_flow_once() {
        let events = [
            event(0.0, CLIENT, SERVER, 40, 1, 0, "R"),
            event(0.1, SERVER, CLIENT, 40, 1, 0, "R"),
            event(0.2, ("10.9.9.9", 1), SERVER, 40, 1, 0, "R"),
        ];
        let (table, stats) = run(&events);
        assert_eq!(table.get(0).unwrap().reset_count, 2);
        assert_eq!(stats.resets, 3);
        assert_eq!(stats.reset_flows, 2);
    }

    #[test]
    fn inflated_syn_is_trimmed_to_ack_size() {
        let (table, _) = run(&[event(0.0, CLIENT, SERVER, 60, 1, 0, "S")]);
        let flow = table.get(0).unwrap();
        assert_eq!(flow.forward.bytes, 0);
        assert_eq!(flow.forward.ack_packets, 1);
        assert!(!flow.forward.sent_data());
    }

    #[test]
    fn syn_of_other_sizes_is_not_trimmed() {
        let (table, _) = run(&[event(0.0, CLIENT, SERVER, 64, 1, 0, "S")]);
        assert_eq!(table.get(0).unwrap().forward.bytes, 12);
    }

    #[test]
    fn duplicate_syn_updates_its_own_direction() {
        let events = [
            event(0.0, CLIENT, SERVER, 60, 100, 0, "S"),
            event(0.5, CLIENT, SERVER, 60, 200, 0, "S"),
        ];
        let (table, _) = run(&events);
        let flow = table.get(0).unwrap();
        assert_eq!(flow.syn_count, 2);
        assert_eq!(flow.forward.start_seq, 200);
        assert_eq!(flow.reverse.start_seq, 0);
        // a retransmitted SYN does not move the start time
        assert_eq!(flow.start_time, 0.0);
        // nor the end time
        assert_eq!(flow.end_time, 0.0);
    }

    #[test]
    fn late_syn_still_marks_syn_seen() {
        let events = [
            event(0.0, CLIENT, SERVER, 52, 1, 1, "A"),
            event(0.1, CLIENT, SERVER, 60, 1, 0, "S"),
        ];
        let (table, _) = run(&events);
        let flow = table.get(0).unwrap();
        assert!(flow.saw_syn);
        assert_eq!(flow.syn_count, 1);
    }

    #[test]
    fn last_fin_sets_end_time() {
        let events = [
            event(0.0, CLIENT, SERVER, 52, 10, 0, "F"),
            event(3.0, CLIENT, SERVER, 52, 11, 0, "F"),
        ];
        let (table, _) = run(&events);
        let flow = table.get(0).unwrap();
        assert_eq!(flow.fin_count, 2);
        assert_eq!(flow.end_time, 3.0);
        assert_eq!(flow.forward.end_seq, 11);
        assert!(flow.saw_fin && !flow.saw_syn);
    }

    #[test]
    fn push_and_unknown_flags_only_touch_counters() {
        let mut table = FlowTable::default();
        let mut stats = IngestStats::default();
        ingest(&mut table, &mut stats, &event(0.0, CLIENT, SERVER, 52, 1, 0, "A")).unwrap();
        ingest(&mut table, &mut stats, &event(5.0, CLIENT, SERVER, 300, 1, 0, "P")).unwrap();
        ingest(&mut table, &mut stats, &event(6.0, CLIENT, SERVER, 300, 1, 0, "X")).unwrap();

        let flow = table.get(0).unwrap();
        assert_eq!(flow.end_time, 0.0);
        assert_eq!(flow.forward.packets, 3);
        assert_eq!(flow.forward.bytes, 2 * (300 - 52));
        assert_eq!(flow.syn_count + flow.fin_count + flow.reset_count, 0);
    }

    #[test]
    fn undersized_packets_do_not_reduce_bytes() {
        let events = [
            event(0.0, CLIENT, SERVER, 100, 1, 0, "A"),
            event(0.1, CLIENT, SERVER, 40, 1, 0, "A"),
        ];
        let (table, _) = run(&events);
        let flow = table.get(0).unwrap();
        assert_eq!(flow.forward.bytes, 48);
        assert_eq!(flow.forward.ack_packets, 1);
    }

    #[test]
    fn one_way_data_is_not_bidirectional() {
        let events = [
            event(0.0, CLIENT, SERVER, 500, 1, 0, "A"),
            event(0.1, SERVER, CLIENT, 52, 1, 0, "A"),
            event(0.2, CLIENT, SERVER, 500, 1, 0, "A"),
        ];
        let (table, _) = run(&events);
        assert!(!table.get(0).unwrap().bidirectional);
    }

    #[test]
    fn bidirectional_is_sticky() {
        let events = [
            event(0.0, CLIENT, SERVER, 500, 1, 0, "A"),
            event(0.1, SERVER, CLIENT, 500, 1, 0, "A"),
            event(0.2, CLIENT, SERVER, 52, 1, 0, "A"),
            event(0.3, SERVER, CLIENT, 40, 1, 0, "R"),
        ];
        let mut table = FlowTable::default();
        let mut stats = IngestStats::default();
        let mut seen = false;
        for ev in &events {
            ingest(&mut table, &mut stats, ev).unwrap();
            let now = table.get(0).unwrap().bidirectional;
            assert!(now || !seen);
            seen |= now;
        }
        assert!(seen);
    }

    #[test]
    fn end_time_only_moves_on_ack_rst_fin() {
        let events = [
            event(1.0, CLIENT, SERVER, 60, 1, 0, "S"),
            event(2.0, CLIENT, SERVER, 52, 1, 0, "A"),
            event(3.0, CLIENT, SERVER, 300, 1, 0, "P"),
            event(4.0, SERVER, CLIENT, 60, 1, 0, "S"),
            event(5.0, SERVER, CLIENT, 52, 1, 0, "F"),
            event(6.0, CLIENT, SERVER, 40, 1, 0, "R"),
        ];
        let expected = [0.0, 2.0, 2.0, 2.0, 5.0, 6.0];
        let mut table = FlowTable::default();
        let mut stats = IngestStats::default();
        for (ev, want) in events.iter().zip(expected) {
            ingest(&mut table, &mut stats, ev).unwrap();
            assert_eq!(table.get(0).unwrap().end_time, want);
        }
    }

    #[test]
    fn orientation_ignores_ports() {
        // same address on both ends: every packet counts as forward
        let a = ("10.0.0.1", 1000);
        let b = ("10.0.0.1", 2000);
        let (table, _) = run(&[
            event(0.0, a, b, 52, 1, 0, "A"),
            event(0.1, b, a, 52, 1, 0, "A"),
        ]);
        let flow = table.get(0).unwrap();
        assert_eq!(flow.direction(Direction::Forward).packets, 2);
        assert_eq!(flow.direction(Direction::Reverse).packets, 0);
    }

    #[test]
    fn capacity_error_stops_before_creating() {
        let mut table = FlowTable::with_capacity_limit(3);
        let mut stats = IngestStats::default();
        for port in 0..3 {
            ingest(
                &mut table,
                &mut stats,
                &event(0.0, ("10.0.0.1", port), SERVER, 52, 1, 0, "A"),
            )
            .unwrap();
        }
        let err = ingest(
            &mut table,
            &mut stats,
            &event(0.0, ("10.0.0.1", 3), SERVER, 52, 1, 0, "A"),
        )
        .unwrap_err();
        assert_eq!(err, FlowTableError::CapacityExceeded { max_flows: 3 });
        assert_eq!(table.len(), 3);

        // existing flows still accept traffic at capacity
        let idx = ingest(
            &mut table,
            &mut stats,
            &event(1.0, SERVER, ("10.0.0.1", 1), 52, 1, 0, "A"),
        )
        .unwrap();
        assert_eq!(idx, 1);
    }

    #[test]
    fn packets_per_flow_match_event_count() {
        let other = ("172.16.0.9", 443);
        let events = [
            event(0.0, CLIENT, SERVER, 60, 1, 0, "S"),
            event(0.1, other, CLIENT, 60, 1, 0, "S"),
            event(0.2, SERVER, CLIENT, 60, 1, 0, "S"),
            event(0.3, CLIENT, other, 52, 1, 0, "A"),
            event(0.4, CLIENT, SERVER, 52, 1, 0, "A"),
        ];
        let (table, stats) = run(&events);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(0).unwrap().total_packets(), 3);
        assert_eq!(table.get(1).unwrap().total_packets(), 2);
        assert_eq!(stats.total_packets, 5);
        for flow in table.iter() {
            assert_eq!(flow.syn_count > 0, flow.saw_syn);
            assert_eq!(flow.fin_count > 0, flow.saw_fin);
        }
    }
}
