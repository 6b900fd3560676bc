// src/io/pozyx/mod.rs
//
// Pozyx tag line-protocol driver: CR-delimited framing, POS decode, and the
// acquisition loop that keeps a session running against the discovered port.

mod framer;
mod reader;

pub use framer::{parse_position_line, LineFramer};
pub use reader::{match_device_port, run_acquisition, run_position_stream_blocking};
