use crate::error::CoreError;
use lazy_static::lazy_static;
use regex::Regex;
use serialport::{DataBits, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::debug;

/// Number of console ports exposed by the controller.
pub const MAX_PORTS: u8 = 16;

const READ_CHUNK_SIZE: usize = 1024;

// Short poll interval for the underlying port so read_until_prompt can keep
// checking its own deadline.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

lazy_static! {
    // Interactive readiness marker on virtually every switch CLI.
    static ref DEFAULT_PROMPT: Regex = Regex::new(r"[>#]").unwrap();
}

pub fn default_prompt() -> &'static Regex {
    &DEFAULT_PROMPT
}

/// Result of a prompt-bounded read. On timeout the captured bytes are still
/// returned; the caller decides whether that is fatal.
#[derive(Debug, Clone)]
pub struct ReadOutcome {
    pub output: String,
    pub timed_out: bool,
}

/// A byte channel to one console port. Implementations must be safe to move
/// onto a blocking worker thread.
pub trait Transport: Send + Sync {
    fn open(&mut self) -> Result<(), CoreError>;
    fn close(&mut self) -> Result<(), CoreError>;
    fn send_line(&mut self, line: &str) -> Result<(), CoreError>;
    fn read_until_prompt(
        &mut self,
        prompt: &Regex,
        timeout: Option<Duration>,
    ) -> Result<ReadOutcome, CoreError>;
    fn flush_buffers(&mut self) -> Result<(), CoreError>;
}

/// Serial line transport: 8 data bits, no parity, 1 stop bit.
pub struct SerialTransport {
    path: String,
    baud_rate: u32,
    read_timeout: Duration,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    pub fn new(path: impl Into<String>, baud_rate: u32, read_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            baud_rate,
            read_timeout,
            port: None,
        }
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn SerialPort>, CoreError> {
        self.port
            .as_mut()
            .ok_or_else(|| CoreError::ReadError("Serial port is not open".to_string()))
    }
}

// Box<dyn SerialPort> is not Sync, but SerialTransport is always accessed
// through &mut self (see with_transport in switchboot-server), so no two
// threads ever touch the port concurrently; asserting Sync lets a
// Box<dyn Transport> live behind an &self borrow held across .await points.
unsafe impl Sync for SerialTransport {}

impl Transport for SerialTransport {
    fn open(&mut self) -> Result<(), CoreError> {
        if self.port.is_some() {
            return Ok(());
        }
        debug!(target: "SerialTransport::open", path = %self.path, baud = self.baud_rate, "Opening serial port");
        let port = serialport::new(self.path.as_str(), self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(POLL_INTERVAL)
            .open()?;
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) -> Result<(), CoreError> {
        if self.port.take().is_some() {
            debug!(target: "SerialTransport::close", path = %self.path, "Closed serial port");
        }
        Ok(())
    }

    fn send_line(&mut self, line: &str) -> Result<(), CoreError> {
        let port = self.port_mut()?;
        let data = format!("{}\n", line);
        port.write_all(data.as_bytes())
            .map_err(|e| CoreError::WriteError(format!("Failed to write to serial port: {}", e)))?;
        port.flush()
            .map_err(|e| CoreError::WriteError(format!("Failed to flush serial port: {}", e)))?;
        Ok(())
    }

    fn read_until_prompt(
        &mut self,
        prompt: &Regex,
        timeout: Option<Duration>,
    ) -> Result<ReadOutcome, CoreError> {
        let deadline = timeout.unwrap_or(self.read_timeout);
        let port = self.port_mut()?;

        let start = Instant::now();
        let mut output = String::new();
        let mut buffer = [0u8; READ_CHUNK_SIZE];

        while start.elapsed() < deadline {
            match port.read(&mut buffer) {
                Ok(0) => {}
                Ok(n) => {
                    match std::str::from_utf8(&buffer[..n]) {
                        Ok(s) => output.push_str(s),
                        Err(_) => output.push_str(&String::from_utf8_lossy(&buffer[..n])),
                    }
                    if prompt_at_tail(&output, prompt) {
                        debug!(target: "SerialTransport::read_until_prompt", bytes = output.len(), "Prompt reached");
                        return Ok(ReadOutcome {
                            output,
                            timed_out: false,
                        });
                    }
                }
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => return Err(CoreError::IoError(e)),
            }
        }

        debug!(target: "SerialTransport::read_until_prompt", bytes = output.len(), "Timed out waiting for prompt");
        Ok(ReadOutcome {
            output,
            timed_out: true,
        })
    }

    fn flush_buffers(&mut self) -> Result<(), CoreError> {
        let port = self.port_mut()?;
        port.clear(serialport::ClearBuffer::All)?;
        Ok(())
    }
}

/// True when the last prompt match sits at the end of the captured buffer.
/// A `#` or `>` buried inside echoed configuration (interface descriptions,
/// banners) is followed by more payload and must not terminate the read.
pub(crate) fn prompt_at_tail(buffer: &str, prompt: &Regex) -> bool {
    match prompt.find_iter(buffer).last() {
        Some(m) => buffer[m.end()..].trim().is_empty(),
        None => false,
    }
}

/// Enumerate the controller's canonical console device nodes, returning the
/// paths that exist.
pub fn discover_ports(base_path: &str) -> Vec<String> {
    let mut available = Vec::new();
    for n in 1..=MAX_PORTS {
        let port_path = format!("{}{}", base_path, n);
        if Path::new(&port_path).exists() {
            available.push(port_path);
        }
    }
    available
}

/// Creates transports for numbered console ports. The production factory
/// opens real serial device nodes; tests substitute scripted transports.
pub trait TransportFactory: Send + Sync {
    fn create(&self, port: u8) -> Result<Box<dyn Transport>, CoreError>;
}

pub struct SerialTransportFactory {
    base_path: String,
    baud_rate: u32,
    read_timeout: Duration,
}

impl SerialTransportFactory {
    pub fn new(base_path: impl Into<String>, baud_rate: u32, read_timeout: Duration) -> Self {
        Self {
            base_path: base_path.into(),
            baud_rate,
            read_timeout,
        }
    }
}

impl TransportFactory for SerialTransportFactory {
    fn create(&self, port: u8) -> Result<Box<dyn Transport>, CoreError> {
        let path = format!("{}{}", self.base_path, port);
        // Reject missing device nodes before handing anything to a worker.
        if !Path::new(&path).exists() {
            return Err(CoreError::PortMissing(path));
        }
        Ok(Box::new(SerialTransport::new(
            path,
            self.baud_rate,
            self.read_timeout,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_in_captured_config_does_not_terminate() {
        let prompt = Regex::new(r"[#>]").unwrap();
        let buffer = "interface Vlan1\n description Management for sw1#2\n ip address 10.0.0.1";
        assert!(!prompt_at_tail(buffer, &prompt));
    }

    #[test]
    fn prompt_at_end_of_buffer_terminates() {
        let prompt = Regex::new(r"[#>]").unwrap();
        let buffer = "interface Vlan1\n description entry #1\nsw1#";
        assert!(prompt_at_tail(buffer, &prompt));
    }

    #[test]
    fn prompt_followed_by_trailing_whitespace_still_matches() {
        let prompt = Regex::new(r"[#>]").unwrap();
        assert!(prompt_at_tail("Switch>\r\n", &prompt));
        assert!(prompt_at_tail("Switch> ", &prompt));
    }

    #[test]
    fn no_prompt_never_matches() {
        let prompt = Regex::new(r"[#>]").unwrap();
        assert!(!prompt_at_tail("loading configuration...", &prompt));
        assert!(!prompt_at_tail("", &prompt));
    }

    #[test]
    fn discover_ports_skips_missing_nodes() {
        let dir = std::env::temp_dir().join("switchboot-discover-test");
        std::fs::create_dir_all(&dir).unwrap();
        let base = dir.join("port");
        let base = base.to_str().unwrap().to_string();
        std::fs::write(format!("{}1", base), b"").unwrap();
        std::fs::write(format!("{}3", base), b"").unwrap();

        let found = discover_ports(&base);
        assert_eq!(found, vec![format!("{}1", base), format!("{}3", base)]);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn factory_rejects_missing_port_fast() {
        let factory = SerialTransportFactory::new(
            "/nonexistent/switchboot-test-port",
            9600,
            Duration::from_secs(1),
        );
        match factory.create(4) {
            Err(CoreError::PortMissing(path)) => {
                assert_eq!(path, "/nonexistent/switchboot-test-port4")
            }
            other => panic!("expected PortMissing, got {:?}", other.map(|_| ())),
        }
    }
}
