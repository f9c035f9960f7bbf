//! Supervisor state machine
//!
//! ```text
//!   Discovering -> Detecting -> Building -> Serving -> Streaming
//!        ^                                                 |
//!        +------------- failure, after retry delay --------+
//! ```
//!
//! Any failure returns to `Discovering`. Only operator cancellation ends the
//! loop.

use std::fmt;
use std::time::Duration;

use crate::catalog::StreamId;
use crate::device::SupportedConfig;
use crate::error::{Error, ErrorKind};

/// Supervisor lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Clearing stale endpoints and looking for a device
    Discovering,
    /// Querying the device's connected sensors
    Detecting,
    /// Deriving the topology
    Building,
    /// Starting the server and mounting streams
    Serving,
    /// Forwarding device frames to the server
    Streaming,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Discovering => "DISCOVERING",
            Phase::Detecting => "DETECTING",
            Phase::Building => "BUILDING",
            Phase::Serving => "SERVING",
            Phase::Streaming => "STREAMING",
        }
    }

    /// Whether the device has been connected for streaming in this phase
    pub fn is_connected(&self) -> bool {
        matches!(self, Phase::Serving | Phase::Streaming)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delays between connection cycles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Delay after discovery and detection failures
    pub short_delay: Duration,

    /// Delay after a failure once connected, or after a lost device link
    pub long_delay: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            short_delay: Duration::from_secs(1),
            long_delay: Duration::from_secs(5),
        }
    }
}

impl RestartPolicy {
    /// Set the short delay
    pub fn short_delay(mut self, delay: Duration) -> Self {
        self.short_delay = delay;
        self
    }

    /// Set the long delay
    pub fn long_delay(mut self, delay: Duration) -> Self {
        self.long_delay = delay;
        self
    }

    /// Delay before the next cycle after a failure of `kind` in `phase`
    pub fn retry_delay(&self, phase: Phase, kind: ErrorKind) -> Duration {
        if phase.is_connected() || kind == ErrorKind::DeviceCommunication {
            self.long_delay
        } else {
            self.short_delay
        }
    }
}

/// Failure that ended a connection cycle
#[derive(Debug)]
pub struct CycleFailure {
    pub phase: Phase,
    pub error: Error,
}

impl CycleFailure {
    pub fn new(phase: Phase, error: impl Into<Error>) -> Self {
        Self {
            phase,
            error: error.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

impl fmt::Display for CycleFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.phase, self.error)
    }
}

/// Observable supervisor progress
#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorEvent {
    /// A cycle entered a phase
    PhaseEntered { cycle: u64, phase: Phase },
    /// Capabilities of the device were detected
    CapabilityDetected { cycle: u64, config: SupportedConfig },
    /// Streams are mounted and published to the registry
    Serving { cycle: u64, streams: Vec<StreamId> },
    /// A cycle failed; the next starts after `delay`
    CycleFailed {
        cycle: u64,
        phase: Phase,
        kind: ErrorKind,
        delay: Duration,
    },
    /// The supervisor stopped after cancellation
    Stopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_delay_before_connection() {
        let policy = RestartPolicy::default();

        for (phase, kind) in [
            (Phase::Discovering, ErrorKind::DeviceUnavailable),
            (Phase::Detecting, ErrorKind::EmptyCapability),
            (Phase::Building, ErrorKind::EmptyTopology),
            (Phase::Building, ErrorKind::PipelineConstruction),
        ] {
            assert_eq!(policy.retry_delay(phase, kind), Duration::from_secs(1));
        }
    }

    #[test]
    fn test_long_delay_once_connected() {
        let policy = RestartPolicy::default();

        assert_eq!(
            policy.retry_delay(Phase::Streaming, ErrorKind::PipelineConstruction),
            Duration::from_secs(5)
        );
        assert_eq!(
            policy.retry_delay(Phase::Serving, ErrorKind::Io),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_lost_link_always_long() {
        let policy = RestartPolicy::default();

        assert_eq!(
            policy.retry_delay(Phase::Detecting, ErrorKind::DeviceCommunication),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_custom_delays() {
        let policy = RestartPolicy::default()
            .short_delay(Duration::from_millis(10))
            .long_delay(Duration::from_millis(20));

        assert_eq!(
            policy.retry_delay(Phase::Discovering, ErrorKind::DeviceUnavailable),
            Duration::from_millis(10)
        );
        assert_eq!(
            policy.retry_delay(Phase::Streaming, ErrorKind::DeviceCommunication),
            Duration::from_millis(20)
        );
    }

    #[test]
    fn test_failure_display() {
        let failure = CycleFailure::new(Phase::Building, crate::topology::TopologyError::Empty);

        assert_eq!(failure.kind(), ErrorKind::EmptyTopology);
        assert!(failure.to_string().starts_with("BUILDING failed"));
    }
}
