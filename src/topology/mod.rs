//! Topology builder
//!
//! Decides which streams are active for a [`SupportedConfig`] and produces the
//! [`PipelineDescription`] the device engine instantiates.
//!
//! - rgb, mono_left and mono_right are each included iff their sensor is
//!   present, with their own encoder and output.
//! - depth is included iff both mono sensors are present. Both mono captures
//!   then feed the stereo-depth stage in addition to their own encoders.

pub mod pipeline;

use thiserror::Error;

use crate::catalog::{Catalog, StreamId, StreamIdentity};
use crate::device::{CameraSocket, SupportedConfig};
use crate::error::ErrorKind;

pub use pipeline::{
    Colormap, DepthPreset, EncoderProfile, FrameType, Link, MedianFilter, Node, NodeId,
    PipelineDescription, Port, SensorResolution, StereoDepthConfig,
};

/// Frame rate of the colour encoder
pub const RGB_FPS: u32 = 25;

/// Frame rate of the mono sensors; depth runs at the same rate
pub const MONO_FPS: u32 = 30;

/// Error building a topology
#[derive(Debug, Clone, Error)]
pub enum TopologyError {
    /// No stream qualifies
    #[error("no stream can be served with the detected cameras")]
    Empty,

    /// The generated pipeline description is inconsistent
    #[error("invalid pipeline description: {0}")]
    InvalidPipeline(String),
}

impl TopologyError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            TopologyError::Empty => ErrorKind::EmptyTopology,
            TopologyError::InvalidPipeline(_) => ErrorKind::PipelineConstruction,
        }
    }
}

/// Active streams of one connection cycle and the pipeline producing them
#[derive(Debug, Clone)]
pub struct Topology {
    config: SupportedConfig,
    streams: Vec<StreamIdentity>,
    pipeline: PipelineDescription,
}

impl Topology {
    /// Capabilities the topology was derived from
    pub fn config(&self) -> &SupportedConfig {
        &self.config
    }

    /// Active stream identities in catalog order
    pub fn streams(&self) -> &[StreamIdentity] {
        &self.streams
    }

    /// Active stream ids in catalog order
    pub fn ids(&self) -> Vec<StreamId> {
        self.streams.iter().map(|s| s.id).collect()
    }

    /// Whether a stream is active
    pub fn contains(&self, id: StreamId) -> bool {
        self.streams.iter().any(|s| s.id == id)
    }

    /// Pipeline description for the device engine
    pub fn pipeline(&self) -> &PipelineDescription {
        &self.pipeline
    }
}

/// Build the topology for a set of capabilities
pub fn build(config: &SupportedConfig, catalog: &Catalog) -> Result<Topology, TopologyError> {
    let mut pipeline = PipelineDescription::new();
    let mut streams = Vec::new();

    if config.rgb() {
        let camera = pipeline.add(Node::ColorCamera {
            socket: CameraSocket::CamA,
            resolution: SensorResolution::The1080P,
            fps: RGB_FPS,
        });
        add_encoded_output(
            &mut pipeline,
            camera,
            Port::Video,
            EncoderProfile::H264Main,
            RGB_FPS,
            StreamId::Rgb,
        )?;
        streams.push(catalog.get(StreamId::Rgb).clone());
    }

    let left = if config.mono_left() {
        streams.push(catalog.get(StreamId::MonoLeft).clone());
        Some(add_mono(&mut pipeline, CameraSocket::CamB, StreamId::MonoLeft)?)
    } else {
        None
    };

    let right = if config.mono_right() {
        streams.push(catalog.get(StreamId::MonoRight).clone());
        Some(add_mono(&mut pipeline, CameraSocket::CamC, StreamId::MonoRight)?)
    } else {
        None
    };

    // A single mono sensor never gets a one-sided depth stage
    if let (Some(left), Some(right)) = (left, right) {
        add_depth(&mut pipeline, left, right)?;
        streams.push(catalog.get(StreamId::Depth).clone());
    }

    if streams.is_empty() {
        return Err(TopologyError::Empty);
    }

    pipeline.validate()?;
    debug_assert!(streams.iter().all(|s| config.check(s.id)));

    Ok(Topology {
        config: *config,
        streams,
        pipeline,
    })
}

fn add_encoded_output(
    pipeline: &mut PipelineDescription,
    source: NodeId,
    source_port: Port,
    profile: EncoderProfile,
    fps: u32,
    stream: StreamId,
) -> Result<NodeId, TopologyError> {
    let encoder = pipeline.add(Node::VideoEncoder { profile, fps });
    let output = pipeline.add(Node::Output { stream });
    pipeline.link(source, source_port, encoder, Port::Input)?;
    pipeline.link(encoder, Port::Bitstream, output, Port::Input)?;
    Ok(output)
}

/// Add a mono capture with its own encoded output; returns the capture node
fn add_mono(
    pipeline: &mut PipelineDescription,
    socket: CameraSocket,
    stream: StreamId,
) -> Result<NodeId, TopologyError> {
    let camera = pipeline.add(Node::MonoCamera {
        socket,
        resolution: SensorResolution::The400P,
        fps: MONO_FPS,
    });
    add_encoded_output(
        pipeline,
        camera,
        Port::Out,
        EncoderProfile::H264High,
        MONO_FPS,
        stream,
    )?;
    Ok(camera)
}

fn add_depth(
    pipeline: &mut PipelineDescription,
    left: NodeId,
    right: NodeId,
) -> Result<NodeId, TopologyError> {
    let depth = pipeline.add(Node::StereoDepth(StereoDepthConfig::default()));
    pipeline.link(left, Port::Out, depth, Port::Left)?;
    pipeline.link(right, Port::Out, depth, Port::Right)?;

    let colormap = pipeline.add(Node::Colormap {
        colormap: Colormap::Turbo,
        frame_type: FrameType::Nv12,
    });
    pipeline.link(depth, Port::Disparity, colormap, Port::InputImage)?;

    add_encoded_output(
        pipeline,
        colormap,
        Port::Out,
        EncoderProfile::H264High,
        MONO_FPS,
        StreamId::Depth,
    )
}
