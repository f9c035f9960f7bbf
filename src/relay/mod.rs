//! Relay channels
//!
//! A relay channel moves one stream's frames from the device side to the
//! network side through a local transport endpoint (a Unix domain socket):
//!
//! ```text
//! push(frame) -> [ingress queue, drop oldest] -> endpoint -> [egress queue, drop newest] -> mount
//! ```

pub mod buffer;
pub mod channel;
pub mod config;
pub mod launch;
pub mod transport;

use thiserror::Error;

use crate::catalog::StreamId;
use crate::error::ErrorKind;

pub use buffer::{Leak, LeakyQueue, PushOutcome};
pub use channel::{EgressReader, RelayChannel};
pub use config::ChannelConfig;
pub use launch::{IngestLaunch, MediaProfile, ServeLaunch};
pub use transport::{remove_endpoint, TransportFrame};

/// Relay channel error
#[derive(Debug, Error)]
pub enum ChannelError {
    /// A frame was discarded because the channel is over capacity
    #[error("channel '{stream}' over capacity, dropped {dropped} frame(s)")]
    Backpressure { stream: StreamId, dropped: u64 },

    /// The channel no longer accepts frames
    #[error("channel '{0}' is closed")]
    Closed(StreamId),

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("frame of {size} bytes exceeds the transport limit of {limit}")]
    FrameTooLarge { size: usize, limit: usize },

    /// Launch description failed validation
    #[error("invalid launch description: {0}")]
    InvalidLaunch(String),
}

impl ChannelError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChannelError::Backpressure { .. } | ChannelError::Closed(_) => {
                ErrorKind::ChannelBackpressure
            }
            ChannelError::Transport(_) | ChannelError::FrameTooLarge { .. } => ErrorKind::Transport,
            ChannelError::InvalidLaunch(_) => ErrorKind::PipelineConstruction,
        }
    }
}
