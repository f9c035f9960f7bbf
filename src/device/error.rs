//! Device error types

use thiserror::Error;

use crate::error::ErrorKind;

/// Error reported by a camera device backend
#[derive(Debug, Clone, Error)]
pub enum DeviceError {
    /// No device reachable, or the handle could not be opened
    #[error("device unavailable: {0}")]
    Unavailable(String),

    /// Link to the device dropped or a query failed mid-operation
    #[error("device communication error: {0}")]
    Communication(String),

    /// The device engine rejected a pipeline description
    #[error("pipeline construction failed: {0}")]
    PipelineConstruction(String),
}

impl DeviceError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeviceError::Unavailable(_) => ErrorKind::DeviceUnavailable,
            DeviceError::Communication(_) => ErrorKind::DeviceCommunication,
            DeviceError::PipelineConstruction(_) => ErrorKind::PipelineConstruction,
        }
    }
}
