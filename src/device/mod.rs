//! Camera device boundary
//!
//! The vision SDK that captures, encodes and computes stereo depth is an
//! external collaborator. This module defines the interface the supervisor
//! drives it through:
//!
//! ```text
//!   DeviceBackend ──enumerate_devices()──► [DeviceInfo]
//!        │
//!        └──open_device(info)──► DeviceHandle ──connected_sources()──► {CameraSocket}
//!                                     │
//!                                     └──instantiate(pipeline)──► DeviceSession
//!                                                                     │
//!                                               output_queue("rgb")───┘──► OutputQueue
//! ```
//!
//! Any call may fail with [`DeviceError::Communication`] when the link drops.
//! Handles and sessions release the device when dropped.

pub mod capability;
pub mod error;
pub mod replay;

use std::collections::BTreeSet;
use std::future::Future;

use bytes::Bytes;
use futures::Stream;
use tokio::sync::mpsc;

use crate::topology::PipelineDescription;

pub use capability::{detect, SupportedConfig};
pub use error::DeviceError;
pub use replay::{ReplayBackend, ReplayConfig};

/// Physical sensor socket on the device board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CameraSocket {
    /// Colour sensor
    CamA,
    /// Left mono sensor
    CamB,
    /// Right mono sensor
    CamC,
    /// Auxiliary sensor (not used by the relay)
    CamD,
}

impl std::fmt::Display for CameraSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CameraSocket::CamA => "CAM_A",
            CameraSocket::CamB => "CAM_B",
            CameraSocket::CamC => "CAM_C",
            CameraSocket::CamD => "CAM_D",
        };
        f.write_str(name)
    }
}

/// Enumerated device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Human-readable device name
    pub name: String,
    /// Backend-specific device identifier
    pub id: String,
}

impl DeviceInfo {
    /// Create a new device info
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
        }
    }
}

/// One encoded frame emitted by a device output
#[derive(Debug, Clone)]
pub struct DeviceFrame {
    /// Per-output sequence number
    pub sequence: u64,
    /// Encoded payload (H.264 access unit)
    pub data: Bytes,
}

impl DeviceFrame {
    /// Create a new frame
    pub fn new(sequence: u64, data: Bytes) -> Self {
        Self { sequence, data }
    }
}

/// Entry point of a device SDK
pub trait DeviceBackend: Send + Sync + 'static {
    /// Open device handle
    type Handle: DeviceHandle;

    /// List reachable devices
    fn enumerate_devices(
        &self,
    ) -> impl Future<Output = Result<Vec<DeviceInfo>, DeviceError>> + Send;

    /// Open a device; fails with [`DeviceError::Unavailable`] if it cannot be reached
    fn open_device(
        &self,
        info: &DeviceInfo,
    ) -> impl Future<Output = Result<Self::Handle, DeviceError>> + Send;
}

/// An open device. Dropping the handle releases the device.
pub trait DeviceHandle: Send + 'static {
    /// Running pipeline session
    type Session: DeviceSession;

    /// Sensors physically connected to the device
    fn connected_sources(
        &self,
    ) -> impl Future<Output = Result<BTreeSet<CameraSocket>, DeviceError>> + Send;

    /// Start a processing pipeline on the device
    ///
    /// Fails with [`DeviceError::PipelineConstruction`] if the description is rejected.
    fn instantiate(
        self,
        pipeline: &PipelineDescription,
    ) -> impl Future<Output = Result<Self::Session, DeviceError>> + Send;
}

/// A pipeline running on a device
pub trait DeviceSession: Send + 'static {
    /// Names of the outputs the pipeline produces
    fn output_names(&self) -> Vec<String>;

    /// Take the output queue for a named output
    ///
    /// Each queue can be taken once; later calls return `None`.
    fn output_queue(&mut self, name: &str) -> Option<OutputQueue>;
}

/// Producer side of an [`OutputQueue`]
pub type OutputSender = mpsc::Sender<Result<DeviceFrame, DeviceError>>;

/// Bounded queue of frames emitted by one device output
///
/// The producer blocks once `depth` frames are waiting, so a slow consumer
/// throttles the device rather than growing memory.
#[derive(Debug)]
pub struct OutputQueue {
    name: String,
    rx: mpsc::Receiver<Result<DeviceFrame, DeviceError>>,
}

impl OutputQueue {
    /// Maximum frames buffered per output
    pub const DEFAULT_DEPTH: usize = 30;

    /// Create a queue with its producer side
    pub fn channel(name: impl Into<String>, depth: usize) -> (OutputSender, Self) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        (
            tx,
            Self {
                name: name.into(),
                rx,
            },
        )
    }

    /// Output name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a frame (or error) is ready without waiting
    pub fn has(&self) -> bool {
        !self.rx.is_empty()
    }

    /// Wait for the next frame
    ///
    /// A closed queue means the device stopped producing and is reported as a
    /// communication error.
    pub async fn get(&mut self) -> Result<DeviceFrame, DeviceError> {
        match self.rx.recv().await {
            Some(item) => item,
            None => Err(DeviceError::Communication(format!(
                "output queue '{}' closed",
                self.name
            ))),
        }
    }

    /// Convert into a stream of frames
    ///
    /// When the producer goes away the stream yields one communication error
    /// and then ends.
    pub fn into_stream(self) -> impl Stream<Item = Result<DeviceFrame, DeviceError>> + Send {
        futures::stream::unfold(Some(self), |queue| async move {
            let mut queue = queue?;
            match queue.rx.recv().await {
                Some(item) => Some((item, Some(queue))),
                None => {
                    let err = DeviceError::Communication(format!(
                        "output queue '{}' closed",
                        queue.name
                    ));
                    Some((Err(err), None))
                }
            }
        })
    }
}
