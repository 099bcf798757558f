//! Serial port endpoint for anchor modules

use std::io::Read;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};

use crate::channel::DeviceChannel;
use crate::error::{AcquisitionError, Result};

/// Delay before the single reopen attempt
const REOPEN_DELAY: Duration = Duration::from_millis(100);

/// Line settings shared by every anchor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    pub baud_rate: u32,
    /// Read timeout in milliseconds
    pub timeout_ms: u64,
    /// RTS/CTS flow control
    pub hardware_flow_control: bool,
    /// Upper bound for one read
    pub read_chunk_bytes: usize,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            timeout_ms: 50,
            hardware_flow_control: true,
            read_chunk_bytes: 80,
        }
    }
}

/// Anchor connected over a serial line
pub struct SerialChannel {
    path: String,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialChannel {
    /// Open `path`, retrying once when the first attempt fails
    ///
    /// The retry covers ports left open by a previous process. A second
    /// failure is returned as [`AcquisitionError::DeviceOpen`].
    pub fn open(path: &str, settings: &SerialSettings) -> Result<Self> {
        let port = match Self::open_port(path, settings) {
            Ok(port) => port,
            Err(first) => {
                tracing::warn!("Opening {} failed ({}), closing and reopening once", path, first);
                std::thread::sleep(REOPEN_DELAY);
                Self::open_port(path, settings).map_err(|source| AcquisitionError::DeviceOpen {
                    port: path.to_string(),
                    source,
                })?
            }
        };

        tracing::info!(
            "Opened serial port {} at {} baud (flow control: {})",
            path,
            settings.baud_rate,
            if settings.hardware_flow_control { "rts/cts" } else { "none" }
        );

        Ok(Self {
            path: path.to_string(),
            port: Some(port),
        })
    }

    fn open_port(
        path: &str,
        settings: &SerialSettings,
    ) -> std::result::Result<Box<dyn SerialPort>, serialport::Error> {
        let flow_control = if settings.hardware_flow_control {
            FlowControl::Hardware
        } else {
            FlowControl::None
        };

        serialport::new(path, settings.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(flow_control)
            .timeout(Duration::from_millis(settings.timeout_ms))
            .open()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or_else(|| {
            AcquisitionError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                format!("serial port {} is closed", self.path),
            ))
        })
    }
}

impl DeviceChannel for SerialChannel {
    fn bytes_available(&mut self) -> Result<usize> {
        Ok(self.port()?.bytes_to_read()? as usize)
    }

    fn read_chunk(&mut self, buffer: &mut [u8]) -> Result<usize> {
        match self.port()?.read(buffer) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn clear_input(&mut self) -> Result<()> {
        self.port()?.clear(ClearBuffer::Input)?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.port.take().is_some() {
            tracing::debug!("Closed serial port {}", self.path);
        }
        Ok(())
    }
}
