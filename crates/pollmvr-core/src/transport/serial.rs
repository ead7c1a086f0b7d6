//! serialport-based link implementation.

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use serialport::SerialPort;
use tracing::{debug, info, instrument};

use super::traits::{SerialLink, TransportError};

/// A USB virtual serial port.
pub struct SerialPortLink {
    port: Box<dyn SerialPort>,
    name: String,
    connected: bool,
}

impl SerialPortLink {
    /// Open `name` at `baud_rate`, 8N1. On Unix the port is opened exclusively.
    #[instrument(level = "info")]
    pub fn open(name: &str, baud_rate: u32) -> Result<Self, TransportError> {
        let port = serialport::new(name, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(|e| TransportError::OpenFailed(format!("{name}: {e}")))?;

        info!(port = %name, baud = baud_rate, "Opened serial port");
        Ok(Self {
            port,
            name: name.to_string(),
            connected: true,
        })
    }

    fn map_io(&mut self, e: std::io::Error, timeout: Duration) -> TransportError {
        match e.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => TransportError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            },
            ErrorKind::BrokenPipe | ErrorKind::NotConnected | ErrorKind::UnexpectedEof => {
                self.connected = false;
                TransportError::Disconnected
            }
            _ => TransportError::Io(e),
        }
    }
}

impl SerialLink for SerialPortLink {
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        debug!(len = data.len(), "Serial write");
        if let Err(e) = self.port.write_all(data).and_then(|_| self.port.flush()) {
            return Err(self.map_io(e, Duration::ZERO));
        }
        Ok(data.len())
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        self.port
            .set_timeout(timeout.max(Duration::from_millis(1)))
            .map_err(|e| TransportError::Io(e.into()))?;
        match self.port.read(buf) {
            Ok(0) => Err(TransportError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
            Ok(n) => {
                debug!(len = n, "Serial read");
                Ok(n)
            }
            Err(e) => Err(self.map_io(e, timeout)),
        }
    }

    fn clear_input(&mut self) -> Result<(), TransportError> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(|e| TransportError::Io(e.into()))
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn name(&self) -> &str {
        &self.name
    }
}
