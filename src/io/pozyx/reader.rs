// src/io/pozyx/reader.rs
//
// The acquisition path: a blocking read pump over one open transport, and
// the supervisory loop that discovers the tag bridge, runs a session, and
// reconnects when the session ends.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::LinkConfig;
use crate::io::pozyx::framer::{parse_position_line, LineFramer};
use crate::io::transport::{LinkTransport, PortCandidate, TransportProvider};
use crate::publisher::PositionPublisher;

/// Read chunk size in bytes. Small on purpose: the tag trickles short lines
/// and the 1000 ms read timeout bounds latency, not throughput.
const READ_CHUNK_SIZE: usize = 20;

/// Select the first port whose USB product string contains one of the
/// configured device name substrings.
pub fn match_device_port(ports: &[PortCandidate], device_names: &[String]) -> Option<String> {
    ports
        .iter()
        .find(|p| device_names.iter().any(|name| p.description.contains(name.as_str())))
        .map(|p| p.port_name.clone())
}

/// Blocking read pump for one open transport.
///
/// Reads up to 20 bytes at a time, drains complete lines, and publishes the
/// latest decoded position per read (intermediate positions resolved in the
/// same drain are superseded, not queued). Read timeouts and empty reads are
/// not terminal; the pump ends on an I/O error or when the cancel flag is
/// set. The transport is dropped (closed) on every exit path.
pub fn run_position_stream_blocking(
    mut transport: Box<dyn LinkTransport>,
    publisher: &PositionPublisher,
    cancel_flag: &AtomicBool,
) {
    let mut framer = LineFramer::new();
    let mut buf = [0u8; READ_CHUNK_SIZE];

    loop {
        if cancel_flag.load(Ordering::Relaxed) {
            // Cancellation is a clean exit: no notification side effects
            return;
        }

        match transport.read_chunk(&mut buf) {
            Ok(n) if n > 0 => {
                let mut latest = None;
                for line in framer.feed(&buf[..n]) {
                    if let Some(position) = parse_position_line(&line) {
                        latest = Some(position);
                    }
                }
                if let Some(position) = latest {
                    publisher.publish(position);
                }
            }
            Ok(_) => {
                // Empty read - the tag is quiet, keep pumping
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {
                // Timeout is expected for serial reads
            }
            Err(e) => {
                tlog!("[pozyx] Read error, ending session: {}", e);
                return;
            }
        }
    }
}

/// Supervisory loop: discover the tag bridge, run a session, reconnect.
///
/// Discovery misses and open failures are retried at the fixed interval; a
/// session that ends (transport error) loops straight back to enumeration
/// with no backoff, so a still-present device reconnects immediately. The
/// loop exits only when the cancel flag is set.
pub async fn run_acquisition(
    provider: Arc<dyn TransportProvider>,
    publisher: Arc<PositionPublisher>,
    config: LinkConfig,
    cancel_flag: Arc<AtomicBool>,
) {
    let retry_interval = Duration::from_millis(config.retry_interval_ms);
    tlog!(
        "[pozyx] Acquisition started (matching {:?}, retry every {} ms)",
        config.device_names,
        config.retry_interval_ms
    );

    loop {
        if cancel_flag.load(Ordering::Relaxed) {
            break;
        }

        // Enumerate on the blocking pool - port listing touches the OS
        let provider_clone = provider.clone();
        let ports = match tokio::task::spawn_blocking(move || provider_clone.list_ports()).await {
            Ok(Ok(ports)) => ports,
            Ok(Err(e)) => {
                tlog!("[pozyx] Port enumeration failed: {}", e);
                tokio::time::sleep(retry_interval).await;
                continue;
            }
            Err(e) => {
                tlog!("[pozyx] Enumeration task failed: {}", e);
                tokio::time::sleep(retry_interval).await;
                continue;
            }
        };

        let port_name = match match_device_port(&ports, &config.device_names) {
            Some(name) => name,
            None => {
                tokio::time::sleep(retry_interval).await;
                continue;
            }
        };

        let provider_clone = provider.clone();
        let open_name = port_name.clone();
        let transport =
            match tokio::task::spawn_blocking(move || provider_clone.open(&open_name)).await {
                Ok(Ok(t)) => t,
                Ok(Err(e)) => {
                    // Matched but could not open (claimed, access denied):
                    // same handling as not found
                    tlog!("[pozyx] Failed to open {}: {}", port_name, e);
                    tokio::time::sleep(retry_interval).await;
                    continue;
                }
                Err(e) => {
                    tlog!("[pozyx] Open task failed: {}", e);
                    tokio::time::sleep(retry_interval).await;
                    continue;
                }
            };

        tlog!(
            "[pozyx] Connected to {} at {} baud",
            port_name,
            config.baud_rate
        );

        let publisher_clone = publisher.clone();
        let cancel_clone = cancel_flag.clone();
        let session = tokio::task::spawn_blocking(move || {
            run_position_stream_blocking(transport, &publisher_clone, &cancel_clone)
        })
        .await;
        if let Err(e) = session {
            tlog!("[pozyx] Session task panicked: {:?}", e);
        }

        tlog!("[pozyx] Session on {} ended", port_name);
        // Straight back to enumeration - no backoff after a session
    }

    tlog!("[pozyx] Acquisition stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::error::IoError;
    use std::io;
    use std::sync::atomic::AtomicUsize;

    // ------------------------------------------------------------------
    // Simulated transports
    // ------------------------------------------------------------------

    /// Transport that replays a fixed byte stream in small chunks, then
    /// fails with a broken-pipe error.
    struct ScriptedTransport {
        data: Vec<u8>,
        offset: usize,
    }

    impl ScriptedTransport {
        fn new(data: &[u8]) -> Self {
            ScriptedTransport {
                data: data.to_vec(),
                offset: 0,
            }
        }
    }

    impl LinkTransport for ScriptedTransport {
        fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.offset >= self.data.len() {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
            }
            let n = buf.len().min(self.data.len() - self.offset);
            buf[..n].copy_from_slice(&self.data[self.offset..self.offset + n]);
            self.offset += n;
            Ok(n)
        }
    }

    /// Transport that replays an explicit sequence of read results, then
    /// fails. Lets a test interleave empty reads and timeouts with data.
    struct SteppedTransport {
        steps: std::collections::VecDeque<io::Result<Vec<u8>>>,
    }

    impl SteppedTransport {
        fn new(steps: Vec<io::Result<Vec<u8>>>) -> Self {
            SteppedTransport {
                steps: steps.into(),
            }
        }
    }

    impl LinkTransport for SteppedTransport {
        fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.steps.pop_front() {
                Some(Ok(bytes)) => {
                    let n = bytes.len().min(buf.len());
                    buf[..n].copy_from_slice(&bytes[..n]);
                    Ok(n)
                }
                Some(Err(e)) => Err(e),
                None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged")),
            }
        }
    }

    struct ScriptedProvider {
        ports: Vec<PortCandidate>,
        stream: Vec<u8>,
        list_calls: Arc<AtomicUsize>,
        open_calls: Arc<AtomicUsize>,
    }

    impl TransportProvider for ScriptedProvider {
        fn list_ports(&self) -> Result<Vec<PortCandidate>, IoError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.ports.clone())
        }

        fn open(&self, _port_name: &str) -> Result<Box<dyn LinkTransport>, IoError> {
            self.open_calls.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ScriptedTransport::new(&self.stream)))
        }
    }

    fn tag_port() -> PortCandidate {
        PortCandidate {
            port_name: "/dev/ttyACM0".to_string(),
            description: "Arduino Mega 2560".to_string(),
        }
    }

    fn fast_config() -> LinkConfig {
        LinkConfig {
            retry_interval_ms: 5,
            ..LinkConfig::default()
        }
    }

    // ------------------------------------------------------------------
    // match_device_port
    // ------------------------------------------------------------------

    #[test]
    fn test_match_device_port_by_substring() {
        let ports = vec![
            PortCandidate {
                port_name: "/dev/ttyS0".to_string(),
                description: String::new(),
            },
            tag_port(),
        ];
        let names = LinkConfig::default().device_names;
        assert_eq!(
            match_device_port(&ports, &names),
            Some("/dev/ttyACM0".to_string())
        );
    }

    #[test]
    fn test_match_device_port_no_match() {
        let ports = vec![PortCandidate {
            port_name: "/dev/ttyUSB0".to_string(),
            description: "Some Other Bridge".to_string(),
        }];
        let names = LinkConfig::default().device_names;
        assert_eq!(match_device_port(&ports, &names), None);
    }

    #[test]
    fn test_match_device_port_first_wins() {
        let mut second = tag_port();
        second.port_name = "/dev/ttyACM1".to_string();
        let ports = vec![tag_port(), second];
        let names = LinkConfig::default().device_names;
        assert_eq!(
            match_device_port(&ports, &names),
            Some("/dev/ttyACM0".to_string())
        );
    }

    // ------------------------------------------------------------------
    // Session pump
    // ------------------------------------------------------------------

    #[test]
    fn test_pump_publishes_latest_and_ends_on_error() {
        let publisher = PositionPublisher::new();
        let cancel = AtomicBool::new(false);
        let transport = Box::new(ScriptedTransport::new(
            b"POS,0x0,1,1,1\rPOS,0x0,2,2,2\rPOS,0x0,3",
        ));

        // Returns (rather than hanging) once the transport errors
        run_position_stream_blocking(transport, &publisher, &cancel);

        let p = publisher.current_position().expect("position");
        assert_eq!((p.x, p.y, p.z), (2, 2, 2));
    }

    #[test]
    fn test_pump_ignores_noise_between_frames() {
        let publisher = PositionPublisher::new();
        let cancel = AtomicBool::new(false);
        let transport = Box::new(ScriptedTransport::new(
            b"Pozyx ready\r\nPOS,0x0,11005,12137,1767\r\nERR,0x0\r",
        ));

        run_position_stream_blocking(transport, &publisher, &cancel);

        let p = publisher.current_position().expect("position");
        assert_eq!((p.x, p.y, p.z), (11005, 12137, 1767));
    }

    #[test]
    fn test_pump_survives_empty_reads_and_timeouts() {
        let publisher = PositionPublisher::new();
        let cancel = AtomicBool::new(false);
        // Empty reads and timeouts are quiet-link conditions, not EOF: the
        // pump must keep going and still deliver the frames that follow
        let transport = Box::new(SteppedTransport::new(vec![
            Ok(Vec::new()),
            Ok(b"POS,0x0,1,2,3\r".to_vec()),
            Ok(Vec::new()),
            Err(io::Error::new(io::ErrorKind::TimedOut, "read timeout")),
            Ok(b"POS,0x0,4,5,6\r".to_vec()),
        ]));

        run_position_stream_blocking(transport, &publisher, &cancel);

        let p = publisher.current_position().expect("position");
        assert_eq!((p.x, p.y, p.z), (4, 5, 6));
    }

    #[test]
    fn test_pump_exits_on_cancel_without_publishing() {
        let publisher = PositionPublisher::new();
        let cancel = AtomicBool::new(true);
        let transport = Box::new(ScriptedTransport::new(b"POS,0x0,1,2,3\r"));

        run_position_stream_blocking(transport, &publisher, &cancel);

        assert!(publisher.current_position().is_none());
    }

    // ------------------------------------------------------------------
    // Supervisory loop
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_acquisition_reconnects_after_session_error() {
        let list_calls = Arc::new(AtomicUsize::new(0));
        let open_calls = Arc::new(AtomicUsize::new(0));
        let provider = Arc::new(ScriptedProvider {
            ports: vec![tag_port()],
            stream: b"POS,0x0,7,8,9\r".to_vec(),
            list_calls: list_calls.clone(),
            open_calls: open_calls.clone(),
        });
        let publisher = Arc::new(PositionPublisher::new());
        let cancel = Arc::new(AtomicBool::new(false));

        let task = tokio::spawn(run_acquisition(
            provider,
            publisher.clone(),
            fast_config(),
            cancel.clone(),
        ));

        // Each session errors after replaying its stream, so seeing several
        // opens means the connector re-entered discovery without crashing.
        for _ in 0..100 {
            if open_calls.load(Ordering::SeqCst) >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cancel.store(true, Ordering::Relaxed);
        task.await.expect("acquisition task");

        assert!(open_calls.load(Ordering::SeqCst) >= 3);
        let p = publisher.current_position().expect("position");
        assert_eq!((p.x, p.y, p.z), (7, 8, 9));
    }

    #[tokio::test]
    async fn test_acquisition_retries_when_no_device_matches() {
        let list_calls = Arc::new(AtomicUsize::new(0));
        let open_calls = Arc::new(AtomicUsize::new(0));
        let provider = Arc::new(ScriptedProvider {
            ports: vec![PortCandidate {
                port_name: "/dev/ttyS0".to_string(),
                description: "Motherboard UART".to_string(),
            }],
            stream: Vec::new(),
            list_calls: list_calls.clone(),
            open_calls: open_calls.clone(),
        });
        let publisher = Arc::new(PositionPublisher::new());
        let cancel = Arc::new(AtomicBool::new(false));

        let task = tokio::spawn(run_acquisition(
            provider,
            publisher.clone(),
            fast_config(),
            cancel.clone(),
        ));

        for _ in 0..100 {
            if list_calls.load(Ordering::SeqCst) >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cancel.store(true, Ordering::Relaxed);
        task.await.expect("acquisition task");

        // Kept enumerating, never opened, never published
        assert!(list_calls.load(Ordering::SeqCst) >= 3);
        assert_eq!(open_calls.load(Ordering::SeqCst), 0);
        assert!(publisher.current_position().is_none());
    }

    #[tokio::test]
    async fn test_acquisition_treats_enumeration_failure_as_miss() {
        struct BrokenBusProvider {
            list_calls: Arc<AtomicUsize>,
            open_calls: Arc<AtomicUsize>,
        }
        impl TransportProvider for BrokenBusProvider {
            fn list_ports(&self) -> Result<Vec<PortCandidate>, IoError> {
                self.list_calls.fetch_add(1, Ordering::SeqCst);
                Err(IoError::connection("serial", "enumerate ports: no USB subsystem"))
            }
            fn open(&self, _port_name: &str) -> Result<Box<dyn LinkTransport>, IoError> {
                self.open_calls.fetch_add(1, Ordering::SeqCst);
                unreachable!("open must not be reached when enumeration fails")
            }
        }

        let list_calls = Arc::new(AtomicUsize::new(0));
        let open_calls = Arc::new(AtomicUsize::new(0));
        let provider = Arc::new(BrokenBusProvider {
            list_calls: list_calls.clone(),
            open_calls: open_calls.clone(),
        });
        let publisher = Arc::new(PositionPublisher::new());
        let cancel = Arc::new(AtomicBool::new(false));

        let task = tokio::spawn(run_acquisition(
            provider,
            publisher.clone(),
            fast_config(),
            cancel.clone(),
        ));

        for _ in 0..100 {
            if list_calls.load(Ordering::SeqCst) >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cancel.store(true, Ordering::Relaxed);
        task.await.expect("acquisition task");

        // Kept retrying enumeration, never tried to open, exited cleanly
        assert!(list_calls.load(Ordering::SeqCst) >= 3);
        assert_eq!(open_calls.load(Ordering::SeqCst), 0);
        assert!(publisher.current_position().is_none());
    }

    #[tokio::test]
    async fn test_acquisition_treats_open_failure_as_miss() {
        struct RefusingProvider {
            open_calls: Arc<AtomicUsize>,
        }
        impl TransportProvider for RefusingProvider {
            fn list_ports(&self) -> Result<Vec<PortCandidate>, IoError> {
                Ok(vec![tag_port()])
            }
            fn open(&self, port_name: &str) -> Result<Box<dyn LinkTransport>, IoError> {
                self.open_calls.fetch_add(1, Ordering::SeqCst);
                Err(IoError::connection(port_name, "access denied"))
            }
        }

        let open_calls = Arc::new(AtomicUsize::new(0));
        let provider = Arc::new(RefusingProvider {
            open_calls: open_calls.clone(),
        });
        let publisher = Arc::new(PositionPublisher::new());
        let cancel = Arc::new(AtomicBool::new(false));

        let task = tokio::spawn(run_acquisition(
            provider,
            publisher.clone(),
            fast_config(),
            cancel.clone(),
        ));

        for _ in 0..100 {
            if open_calls.load(Ordering::SeqCst) >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cancel.store(true, Ordering::Relaxed);
        task.await.expect("acquisition task");

        assert!(open_calls.load(Ordering::SeqCst) >= 3);
        assert!(publisher.current_position().is_none());
    }
}
