//! Capability detection
//!
//! Turns the set of sensors a device reports into a [`SupportedConfig`].
//! Composite capabilities are derived, never detected: depth is available
//! exactly when both mono sensors are.

use std::collections::BTreeSet;

use super::{CameraSocket, DeviceBackend, DeviceError, DeviceHandle, DeviceInfo};
use crate::catalog::StreamId;

/// Sources available on one connected device
///
/// Created once per connection cycle and immutable afterwards. The `depth`
/// capability has no field of its own; it is computed from the mono flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SupportedConfig {
    rgb: bool,
    mono_left: bool,
    mono_right: bool,
}

impl SupportedConfig {
    /// Create a config from the three physical source flags
    pub fn new(rgb: bool, mono_left: bool, mono_right: bool) -> Self {
        Self {
            rgb,
            mono_left,
            mono_right,
        }
    }

    /// Derive the config from the sensors a device reports
    pub fn from_sources(sources: &BTreeSet<CameraSocket>) -> Self {
        Self::new(
            sources.contains(&CameraSocket::CamA),
            sources.contains(&CameraSocket::CamB),
            sources.contains(&CameraSocket::CamC),
        )
    }

    /// Colour camera present
    pub fn rgb(&self) -> bool {
        self.rgb
    }

    /// Left mono camera present
    pub fn mono_left(&self) -> bool {
        self.mono_left
    }

    /// Right mono camera present
    pub fn mono_right(&self) -> bool {
        self.mono_right
    }

    /// Stereo depth can be computed
    pub fn depth(&self) -> bool {
        self.mono_left && self.mono_right
    }

    /// Whether the stream with the given id is supported
    pub fn check(&self, id: StreamId) -> bool {
        match id {
            StreamId::Rgb => self.rgb(),
            StreamId::MonoLeft => self.mono_left(),
            StreamId::MonoRight => self.mono_right(),
            StreamId::Depth => self.depth(),
        }
    }

    /// No usable camera at all
    pub fn is_empty(&self) -> bool {
        !self.rgb && !self.mono_left && !self.mono_right
    }

    /// Supported stream ids in catalog order
    pub fn supported_ids(&self) -> impl Iterator<Item = StreamId> + '_ {
        StreamId::ALL.into_iter().filter(|id| self.check(*id))
    }
}

impl std::fmt::Display for SupportedConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "rgb={} mono_left={} mono_right={} depth={}",
            self.rgb,
            self.mono_left,
            self.mono_right,
            self.depth()
        )
    }
}

/// Query a device for its connected sensors
///
/// The device handle is opened for the duration of the query and released
/// before returning, whether detection succeeded or not.
pub async fn detect<B: DeviceBackend>(
    backend: &B,
    info: &DeviceInfo,
) -> Result<SupportedConfig, DeviceError> {
    let handle = backend.open_device(info).await?;
    let sources = handle.connected_sources().await;
    drop(handle);

    let sources = sources?;
    tracing::debug!(
        device = %info.name,
        sources = ?sources,
        "Connected sensors queried"
    );

    Ok(SupportedConfig::from_sources(&sources))
}
