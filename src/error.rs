//! Error types
//!
//! Each subsystem reports failures through its own error enum. `Error`
//! aggregates them at the supervisor boundary, where every failure is mapped
//! to an [`ErrorKind`] and turned into a restart decision.

use thiserror::Error;

use crate::device::DeviceError;
use crate::registry::RegistryError;
use crate::relay::ChannelError;
use crate::topology::TopologyError;

/// Result type for camrelay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug, Error)]
pub enum Error {
    /// Camera device failure
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Device is reachable but exposes no usable camera
    #[error("no usable cameras detected on device")]
    EmptyCapability,

    /// Topology could not be derived
    #[error(transparent)]
    Topology(#[from] TopologyError),

    /// Relay channel failure
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// External stream registry failure
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Local I/O failure (sockets, transport endpoints)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Failure taxonomy used for logging and restart policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No hardware reachable
    DeviceUnavailable,
    /// Device link dropped mid-operation
    DeviceCommunication,
    /// Hardware present but no camera usable
    EmptyCapability,
    /// No stream qualifies for the topology
    EmptyTopology,
    /// Pipeline description rejected by validation or by the device engine
    PipelineConstruction,
    /// Frame dropped by a relay channel
    ChannelBackpressure,
    /// Local transport endpoint failure
    Transport,
    /// Registry poll or insert failed
    RegistryIo,
    /// Other local I/O failure
    Io,
    /// Invalid configuration
    Config,
}

impl ErrorKind {
    /// Stable name used in log lines
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::DeviceUnavailable => "DeviceUnavailable",
            ErrorKind::DeviceCommunication => "DeviceCommunicationError",
            ErrorKind::EmptyCapability => "EmptyCapability",
            ErrorKind::EmptyTopology => "EmptyTopology",
            ErrorKind::PipelineConstruction => "PipelineConstructionError",
            ErrorKind::ChannelBackpressure => "ChannelBackpressure",
            ErrorKind::Transport => "TransportError",
            ErrorKind::RegistryIo => "RegistryIOError",
            ErrorKind::Io => "IoError",
            ErrorKind::Config => "ConfigError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Device(e) => e.kind(),
            Error::EmptyCapability => ErrorKind::EmptyCapability,
            Error::Topology(e) => e.kind(),
            Error::Channel(e) => e.kind(),
            Error::Registry(_) => ErrorKind::RegistryIo,
            Error::Io(_) => ErrorKind::Io,
            Error::Config(_) => ErrorKind::Config,
        }
    }
}
