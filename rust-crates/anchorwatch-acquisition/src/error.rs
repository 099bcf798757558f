//! Error types for anchor acquisition

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AcquisitionError>;

#[derive(Error, Debug)]
pub enum AcquisitionError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to open {port} after retry: {source}")]
    DeviceOpen {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("Anchor {id} failed {errors} consecutive reads, last error: {last}")]
    DeviceFailed { id: String, errors: u32, last: String },

    #[error("Read worker for anchor {id} did not complete: {reason}")]
    WorkerPanicked { id: String, reason: String },

    #[error("Acquisition lost anchors: {available} of {expected} remain")]
    Degraded { expected: usize, available: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl AcquisitionError {
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Whether the acquisition can keep polling after this error
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Serial(_) | Self::Io(_))
    }
}
