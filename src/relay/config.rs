//! Relay channel configuration

use super::transport::MAX_FRAME_SIZE;

/// Dynamic RTP payload type used for H.264
pub const RTP_PAYLOAD_TYPE: u8 = 96;

/// RTP clock rate for video
pub const RTP_CLOCK_RATE: u32 = 90_000;

/// Relay channel configuration options
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Frames held on the ingress side before the oldest is dropped
    pub ingress_depth: usize,

    /// Frames held on the egress side before new ones are dropped
    pub egress_depth: usize,

    /// Largest frame accepted on the transport
    pub max_frame_size: usize,

    /// RTP payload type advertised by the serve description
    pub payload_type: u8,

    /// Seconds between parameter-set re-sends (-1 = with every keyframe)
    pub config_interval: i32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            ingress_depth: 30,
            egress_depth: 30,
            max_frame_size: MAX_FRAME_SIZE,
            payload_type: RTP_PAYLOAD_TYPE,
            config_interval: 1,
        }
    }
}

impl ChannelConfig {
    /// Set the ingress queue depth
    pub fn ingress_depth(mut self, depth: usize) -> Self {
        self.ingress_depth = depth.max(1);
        self
    }

    /// Set the egress queue depth
    pub fn egress_depth(mut self, depth: usize) -> Self {
        self.egress_depth = depth.max(1);
        self
    }

    /// Set the maximum frame size
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size.min(u32::MAX as usize);
        self
    }

    /// Set the RTP payload type
    pub fn payload_type(mut self, pt: u8) -> Self {
        self.payload_type = pt;
        self
    }
}
