// src/io/pozyx/framer.rs
//
// Line framing and POS decode for the tag's serial output.
//
// The tag emits a mixed ASCII stream: position frames interleaved with
// diagnostic text. Lines are CR-terminated, with LF bytes as filler:
//
//   POS,<station_id>,<x_mm>,<y_mm>,<z_mm>\r
//
// Anything that is not exactly that shape is noise and is dropped without
// an error.

use crate::io::{now_us, Position};

/// Unterminated lines longer than this are discarded wholesale; a legitimate
/// frame is an order of magnitude shorter.
const MAX_LINE_LENGTH: usize = 512;

/// Stateful line framer for the CR-delimited stream.
/// Accumulates bytes across reads and yields complete lines in order,
/// retaining any trailing partial line for the next feed.
pub struct LineFramer {
    buffer: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        LineFramer { buffer: Vec::new() }
    }

    /// Feed newly read bytes and drain all complete lines.
    ///
    /// Returns each CR-terminated line with LF filler bytes removed. Empty
    /// lines are returned too (decode rejects them on field count). Bytes
    /// after the last terminator stay buffered.
    pub fn feed(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(data);

        let mut lines = Vec::new();
        while let Some(end) = self.buffer.iter().position(|&b| b == b'\r') {
            let line: Vec<u8> = self.buffer[..end]
                .iter()
                .copied()
                .filter(|&b| b != b'\n')
                .collect();
            self.buffer.drain(..=end);
            lines.push(line);
        }

        // Unbounded growth guard: a stream that never terminates a line is
        // not speaking the protocol, so drop what we have and resync.
        if self.buffer.len() > MAX_LINE_LENGTH {
            self.buffer.clear();
        }

        lines
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        LineFramer::new()
    }
}

/// Parse a single line as a POS frame.
///
/// Format example: `POS,0x0,11005,12137,1767`
///
/// Returns None for anything else - wrong field count, wrong tag, or
/// non-numeric coordinates. The station id (field 1) is not validated or
/// used. The timestamp is the host clock at decode time.
pub fn parse_position_line(line: &[u8]) -> Option<Position> {
    let text = std::str::from_utf8(line).ok()?;

    let fields: Vec<&str> = text.split(',').collect();
    if fields.len() != 5 {
        return None;
    }
    if fields[0] != "POS" {
        return None;
    }

    let x = fields[2].trim().parse::<i32>().ok()?;
    let y = fields[3].trim().parse::<i32>().ok()?;
    let z = fields[4].trim().parse::<i32>().ok()?;

    Some(Position {
        x,
        y,
        z,
        timestamp_us: now_us(),
    })
}
