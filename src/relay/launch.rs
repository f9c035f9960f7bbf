//! Declarative launch descriptions
//!
//! Each relay channel is described by two launch descriptions, one per side
//! of the transport endpoint. They are validated when built and can be
//! rendered to a GStreamer launch line for an external media engine or for
//! logging.

use std::fmt;
use std::path::{Path, PathBuf};

use super::buffer::Leak;
use super::config::{ChannelConfig, RTP_CLOCK_RATE};
use super::ChannelError;
use crate::catalog::{StreamId, StreamIdentity};

/// RTP profile offered on a mount
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaProfile {
    Avp,
    /// AVP with RTCP feedback
    Avpf,
}

impl MediaProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaProfile::Avp => "AVP",
            MediaProfile::Avpf => "AVPF",
        }
    }
}

impl fmt::Display for MediaProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn validate_common(
    stream: StreamId,
    socket_path: &Path,
    payload_type: u8,
) -> Result<(), ChannelError> {
    if !socket_path.is_absolute() {
        return Err(ChannelError::InvalidLaunch(format!(
            "{}: transport address '{}' is not absolute",
            stream,
            socket_path.display()
        )));
    }
    if !(96..=127).contains(&payload_type) {
        return Err(ChannelError::InvalidLaunch(format!(
            "{}: payload type {} outside the dynamic range",
            stream, payload_type
        )));
    }
    Ok(())
}

/// Device side: pushed frames into the transport endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestLaunch {
    pub stream: StreamId,
    pub socket_path: PathBuf,
    pub payload_type: u8,
    pub config_interval: i32,
    pub queue_depth: usize,
    pub leak: Leak,
}

impl IngestLaunch {
    pub fn new(identity: &StreamIdentity, config: &ChannelConfig) -> Result<Self, ChannelError> {
        validate_common(identity.id, &identity.transport_address, config.payload_type)?;
        Ok(Self {
            stream: identity.id,
            socket_path: identity.transport_address.clone(),
            payload_type: config.payload_type,
            config_interval: config.config_interval,
            queue_depth: config.ingress_depth,
            leak: Leak::DropOldest,
        })
    }

    /// Render as a GStreamer launch line
    pub fn render(&self) -> String {
        format!(
            "appsrc name=source do-timestamp=true is-live=true format=time ! \
             h264parse ! \
             queue leaky={} max-size-buffers={} ! \
             rtph264pay config-interval={} pt={} ! \
             shmsink wait-for-connection=false sync=true socket-path={}",
            self.leak.gst_name(),
            self.queue_depth,
            self.config_interval,
            self.payload_type,
            self.socket_path.display()
        )
    }
}

/// Network side: transport endpoint into the served mount
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServeLaunch {
    pub stream: StreamId,
    pub socket_path: PathBuf,
    pub payload_type: u8,
    pub clock_rate: u32,
    pub config_interval: i32,
    pub queue_depth: usize,
    pub leak: Leak,
    pub profile: MediaProfile,
    pub shared: bool,
}

impl ServeLaunch {
    pub fn new(identity: &StreamIdentity, config: &ChannelConfig) -> Result<Self, ChannelError> {
        validate_common(identity.id, &identity.transport_address, config.payload_type)?;
        Ok(Self {
            stream: identity.id,
            socket_path: identity.transport_address.clone(),
            payload_type: config.payload_type,
            clock_rate: RTP_CLOCK_RATE,
            config_interval: config.config_interval,
            queue_depth: config.egress_depth,
            leak: Leak::DropNewest,
            profile: MediaProfile::Avpf,
            shared: true,
        })
    }

    /// Render as a GStreamer launch line
    pub fn render(&self) -> String {
        format!(
            "shmsrc is-live=true socket-path={} do-timestamp=true ! \
             application/x-rtp,media=video,clock-rate={},encoding-name=H264 ! \
             rtph264depay ! \
             h264parse config-interval={} ! \
             queue leaky={} max-size-buffers={} ! \
             rtph264pay name=pay0 pt={}",
            self.socket_path.display(),
            self.clock_rate,
            self.config_interval,
            self.leak.gst_name(),
            self.queue_depth,
            self.payload_type
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;

    #[test]
    fn test_ingest_drops_oldest() {
        let catalog = Catalog::default();
        let launch =
            IngestLaunch::new(catalog.get(StreamId::Rgb), &ChannelConfig::default()).unwrap();

        assert_eq!(launch.leak, Leak::DropOldest);
        let line = launch.render();
        assert!(line.contains("queue leaky=downstream"));
        assert!(line.contains("socket-path=/tmp/socketrgb"));
        assert!(line.contains("rtph264pay config-interval=1 pt=96"));
    }

    #[test]
    fn test_serve_drops_newest_with_feedback_profile() {
        let catalog = Catalog::default();
        let launch =
            ServeLaunch::new(catalog.get(StreamId::Depth), &ChannelConfig::default()).unwrap();

        assert_eq!(launch.leak, Leak::DropNewest);
        assert_eq!(launch.profile, MediaProfile::Avpf);
        assert!(launch.shared);
        let line = launch.render();
        assert!(line.contains("clock-rate=90000"));
        assert!(line.contains("queue leaky=upstream"));
        assert!(line.contains("rtph264pay name=pay0 pt=96"));
    }

    #[test]
    fn test_relative_address_rejected() {
        let catalog = Catalog::new("relative/dir");
        let err = IngestLaunch::new(catalog.get(StreamId::Rgb), &ChannelConfig::default())
            .unwrap_err();

        assert!(matches!(err, ChannelError::InvalidLaunch(_)));
    }

    #[test]
    fn test_static_payload_type_rejected() {
        let catalog = Catalog::default();
        let config = ChannelConfig::default().payload_type(33);
        let err = ServeLaunch::new(catalog.get(StreamId::Rgb), &config).unwrap_err();

        assert!(matches!(err, ChannelError::InvalidLaunch(_)));
    }
}
