//! Serial transport to the light organ

use super::messages::CommandEncoder;
use crate::config::BAUD_RATE;
use crate::patterns::{LampVector, NUM_LAMPS};
use std::io::Write;
use std::time::Duration;
use thiserror::Error;

/// Serial read timeout. The firmware never answers, so this only bounds
/// blocking in the driver.
pub const SERIAL_TIMEOUT: Duration = Duration::from_millis(100);

/// Transport errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Port {port} could not be opened: {reason}")]
    OpenFailed { port: String, reason: String },

    #[error("Write error: {0}")]
    WriteFailed(String),

    #[error("Failed to enumerate serial ports: {0}")]
    EnumerationFailed(String),
}

/// Fire-and-forget byte sink for lamp commands
pub trait LampTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<(), ClientError>;
}

/// List serial port names known to the OS
pub fn list_serial_ports() -> Result<Vec<String>, ClientError> {
    let ports = serialport::available_ports()
        .map_err(|e| ClientError::EnumerationFailed(e.to_string()))?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

/// Light organ attached over a serial port
pub struct SerialTransport {
    port_name: String,
    port: Box<dyn serialport::SerialPort>,
}

impl SerialTransport {
    pub fn open(port_name: &str) -> Result<Self, ClientError> {
        log::info!("Opening serial port {} at {} baud", port_name, BAUD_RATE);

        let port = serialport::new(port_name, BAUD_RATE)
            .timeout(SERIAL_TIMEOUT)
            .open()
            .map_err(|e| ClientError::OpenFailed {
                port: port_name.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            port_name: port_name.to_string(),
            port,
        })
    }
}

impl LampTransport for SerialTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<(), ClientError> {
        self.port
            .write_all(bytes)
            .map_err(|e| ClientError::WriteFailed(e.to_string()))
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        log::info!("Closing serial port {}", self.port_name);
    }
}

/// Dry-run transport: interprets bytes like the firmware would and prints
/// the lamp row after every write.
pub struct ConsoleTransport<W: Write> {
    out: W,
    encoder: CommandEncoder,
    lamps: LampVector,
}

impl<W: Write> ConsoleTransport<W> {
    pub fn new(out: W, inverted: bool) -> Self {
        Self {
            out,
            encoder: CommandEncoder::new(inverted),
            lamps: LampVector::dark(),
        }
    }

    fn render(&self) -> String {
        let mut row = String::with_capacity(NUM_LAMPS + 2);
        row.push('[');
        row.extend(self.lamps.iter().map(|on| if on { '#' } else { '.' }));
        row.push(']');
        row
    }
}

impl<W: Write> LampTransport for ConsoleTransport<W> {
    fn write(&mut self, bytes: &[u8]) -> Result<(), ClientError> {
        for &byte in bytes {
            if let Some((lamp, on)) = self.encoder.interpret(byte) {
                self.lamps.set(lamp, on);
            }
        }
        let row = self.render();
        writeln!(self.out, "{}", row).map_err(|e| ClientError::WriteFailed(e.to_string()))
    }
}
