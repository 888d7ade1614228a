//! # Serial Byte Source
//!
//! Reads the test fixture's output over a serial port (8 data bits, no
//! parity, one stop bit). The port is opened with a short read timeout so the
//! reader loop can check its stop flag between reads.

use std::io::{self, Read};
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, SerialPort, SerialPortType, StopBits};

use crate::error::LabelfeedError;
use crate::ingest::ByteSource;

/// Default line speed of the fixture
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// An open serial port.
pub struct SerialSource {
    port: Box<dyn SerialPort>,
    name: String,
}

impl SerialSource {
    /// Open `port` at `baud_rate`, 8N1, no flow control.
    ///
    /// ## Errors
    ///
    /// `Transport` if the port does not exist, is busy or the settings are
    /// rejected.
    pub fn open(port: &str, baud_rate: u32, read_timeout: Duration) -> Result<Self, LabelfeedError> {
        let handle = serialport::new(port, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(read_timeout)
            .open()
            .map_err(|e| LabelfeedError::Transport(format!("Failed to open {}: {}", port, e)))?;

        tracing::info!(port, baud_rate, "serial port opened");
        Ok(Self {
            port: handle,
            name: port.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl ByteSource for SerialSource {
    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

/// A serial port visible to the system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub name: String,
    pub description: String,
}

/// Enumerate serial ports for the `ports` command.
pub fn list_ports() -> Result<Vec<PortInfo>, LabelfeedError> {
    let ports = serialport::available_ports()
        .map_err(|e| LabelfeedError::Transport(format!("Failed to enumerate ports: {}", e)))?;

    Ok(ports
        .into_iter()
        .map(|port| PortInfo {
            description: describe_port_type(&port.port_type),
            name: port.port_name,
        })
        .collect())
}

fn describe_port_type(port_type: &SerialPortType) -> String {
    match port_type {
        SerialPortType::UsbPort(info) => {
            let label = [info.manufacturer.as_deref(), info.product.as_deref()]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" ");
            if label.is_empty() {
                format!("USB {:04x}:{:04x}", info.vid, info.pid)
            } else {
                format!("USB {:04x}:{:04x} {}", info.vid, info.pid, label)
            }
        }
        SerialPortType::PciPort => "PCI".to_string(),
        SerialPortType::BluetoothPort => "Bluetooth".to_string(),
        SerialPortType::Unknown => "Unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_port_is_transport_error() {
        let err = SerialSource::open("/dev/labelfeed-missing", DEFAULT_BAUD_RATE, Duration::from_millis(10))
            .err()
            .unwrap();
        assert!(matches!(err, LabelfeedError::Transport(_)));
        assert!(err.to_string().contains("/dev/labelfeed-missing"));
    }

    #[test]
    fn test_describe_port_types() {
        assert_eq!(describe_port_type(&SerialPortType::PciPort), "PCI");
        assert_eq!(describe_port_type(&SerialPortType::Unknown), "Unknown");
    }
}
