// src/lib.rs
//
// pozyx-link: Pozyx UWB tag acquisition over USB serial.
//
// Discovers the tag's serial bridge, pumps and decodes the POS line stream,
// and republishes the latest 3D position to in-process subscribers. The
// link self-heals: discovery misses, open failures, and mid-stream
// disconnects all feed back into the supervisory loop, and the only
// consumer-visible failure mode is an absence of updates.

#[macro_use]
mod logging;

pub mod config;
pub mod device;
pub mod io;
pub mod publisher;

pub use config::LinkConfig;
pub use device::{shutdown, PozyxDevice};
pub use io::{list_ports, IoError, PortCandidate, Position};
pub use logging::{init_file_logging, stop_file_logging};
pub use publisher::{CallbackHandle, PositionPublisher};
