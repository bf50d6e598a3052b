//! Trace-line decoding.
//!
//! A trace line is one whitespace-separated packet record:
//!
//! ```text
//! 0.000000 192.168.1.201 -> 192.168.1.200 60 TCP 4297 80 4040844510 : 4040844510 0 win: 5840 S
//! time     src              dst           size proto sport dport seq : seq2 ack win: window flags
//! ```
//!
//! The arrow, protocol name, colon and `win:` tokens are positional only and
//! are not checked.

use std::io::BufRead;
use std::str::{FromStr, SplitWhitespace};

use crate::error::TraceError;
use crate::flow::Endpoint;

/// Characters accepted in the flag field.
const FLAG_CHARS: &[char] = &['S', 'F', 'P', 'A', 'R'];

/// One decoded trace line.
#[derive(Debug, Clone, PartialEq)]
pub struct PacketEvent {
    pub time: f64,
    pub src: Endpoint,
    pub dst: Endpoint,
    pub ip_size: u32,
    pub seq: u64,
    /// Second sequence field of the trace line; carried but not interpreted.
    pub seq2: u64,
    pub ack: u64,
    pub window: u32,
    /// Leading run of flag letters; only the first one is significant.
    pub flags: String,
}

/// Decode a single trace line. Blank lines yield `Ok(None)`.
pub fn parse_line(line_no: u64, line: &str) -> Result<Option<PacketEvent>, TraceError> {
    if line.trim().is_empty() {
        return Ok(None);
    }

    let mut fields = Fields {
        line: line_no,
        tokens: line.split_whitespace(),
    };

    let time = fields.number("time")?;
    let src_addr = fields.text("src_addr")?;
    fields.text("arrow")?;
    let dst_addr = fields.text("dst_addr")?;
    let ip_size = fields.number("ip_size")?;
    fields.text("protocol")?;
    let src_port = fields.number("src_port")?;
    let dst_port = fields.number("dst_port")?;
    let seq = fields.number("seq")?;
    fields.text("seq_separator")?;
    let seq2 = fields.number("seq2")?;
    let ack = fields.number("ack")?;
    fields.text("window_label")?;
    let window = fields.number("window")?;
    let raw_flags = fields.text("flags")?;

    let flags: String = raw_flags
        .chars()
        .take_while(|c| FLAG_CHARS.contains(c))
        .collect();
    if flags.is_empty() {
        return Err(TraceError::InvalidFlags {
            line: line_no,
            value: raw_flags.to_string(),
        });
    }

    Ok(Some(PacketEvent {
        time,
        src: Endpoint::new(src_addr, src_port),
        dst: Endpoint::new(dst_addr, dst_port),
        ip_size,
        seq,
        seq2,
        ack,
        window,
        flags,
    }))
}

struct Fields<'a> {
    line: u64,
    tokens: SplitWhitespace<'a>,
}

impl<'a> Fields<'a> {
    fn text(&mut self, field: &'static str) -> Result<&'a str, TraceError> {
        self.tokens.next().ok_or(TraceError::MissingField {
            line: self.line,
            field,
        })
    }

    fn number<T: FromStr>(&mut self, field: &'static str) -> Result<T, TraceError> {
        let raw = self.text(field)?;
        raw.parse().map_err(|_| TraceError::InvalidNumber {
            line: self.line,
            field,
            value: raw.to_string(),
        })
    }
}

/// Iterates the packet events of a line-oriented trace source.
///
/// Blank lines are skipped. Malformed lines, including lines that are not
/// valid UTF-8, are yielded as recoverable errors so the caller decides whether to continue; read failures are
/// yielded as [`TraceError::Io`].
pub struct TraceReader<R> {
    reader: R,
    line_no: u64,
    buf: Vec<u8>,
}

impl<R: BufRead> TraceReader<R> {
    pub fn new(reader: R) -> Self {
        TraceReader {
            reader,
            line_no: 0,
            buf: Vec::new(),
        }
    }

    /// Number of the last line read (1-based).
    pub fn line_no(&self) -> u64 {
        self.line_no
    }
}

impl<R: BufRead> Iterator for TraceReader<R> {
    type Item = Result<PacketEvent, TraceError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(err) => return Some(Err(TraceError::Io(err))),
            }
            self.line_no += 1;
            let Ok(line) = std::str::from_utf8(&self.buf) else {
                return Some(Err(TraceError::InvalidEncoding { line: self.line_no }));
            };
            match parse_line(self.line_no, line) {
                Ok(Some(event)) => return Some(Ok(event)),
                Ok(None) => continue,
                Err(err) => return Some(Err(err)),
            }
        }
    }
}
