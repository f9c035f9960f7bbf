//! Processing pipeline description
//!
//! A declarative graph the device engine instantiates: capture nodes feed
//! encoders (directly or through the stereo-depth stage) and encoders feed
//! named outputs.
//!
//! ```text
//! ColorCamera(CAM_A) ──video──► VideoEncoder ──bitstream──► Output("rgb")
//!
//! MonoCamera(CAM_B) ──out──┬──► VideoEncoder ──► Output("mono_left")
//!                          └──► StereoDepth.left ─┐
//! MonoCamera(CAM_C) ──out──┬──► VideoEncoder ──► Output("mono_right")
//!                          └──► StereoDepth.right ┴─disparity─► Colormap ──► VideoEncoder ──► Output("depth")
//! ```
//!
//! Links always point from an earlier node to a later one, so the graph is
//! acyclic by construction. Every input port accepts exactly one producer;
//! output ports may fan out.

use crate::catalog::StreamId;
use crate::device::CameraSocket;

use super::TopologyError;

/// Index of a node in a [`PipelineDescription`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Sensor resolution preset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorResolution {
    /// 1920x1080
    The1080P,
    /// 640x400
    The400P,
}

/// Encoder profile preset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderProfile {
    H264Main,
    H264High,
}

/// Stereo depth preset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthPreset {
    HighDensity,
    HighAccuracy,
}

/// Median filter kernel applied to the disparity map
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MedianFilter {
    Off,
    Kernel3x3,
    Kernel5x5,
    Kernel7x7,
}

/// Stereo depth stage settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StereoDepthConfig {
    pub preset: DepthPreset,
    pub median_filter: MedianFilter,
    pub left_right_check: bool,
    pub extended_disparity: bool,
    /// Subpixel disparity is 16-bit, which the video encoder cannot take
    pub subpixel: bool,
}

impl Default for StereoDepthConfig {
    fn default() -> Self {
        Self {
            preset: DepthPreset::HighDensity,
            median_filter: MedianFilter::Kernel7x7,
            left_right_check: true,
            extended_disparity: true,
            subpixel: false,
        }
    }
}

/// Colormap applied to disparity before encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Colormap {
    Turbo,
}

/// Pixel format produced by an image stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Nv12,
}

/// Node (processing stage) of the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Colour sensor capture
    ColorCamera {
        socket: CameraSocket,
        resolution: SensorResolution,
        fps: u32,
    },
    /// Mono sensor capture
    MonoCamera {
        socket: CameraSocket,
        resolution: SensorResolution,
        fps: u32,
    },
    /// Hardware video encoder
    VideoEncoder { profile: EncoderProfile, fps: u32 },
    /// Stereo depth computation from a left/right pair
    StereoDepth(StereoDepthConfig),
    /// Colour mapping of a single-channel image
    Colormap {
        colormap: Colormap,
        frame_type: FrameType,
    },
    /// Named output queue readable from the host
    Output { stream: StreamId },
}

/// Port of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Port {
    Video,
    Out,
    Input,
    InputImage,
    Bitstream,
    Left,
    Right,
    Disparity,
}

impl Node {
    /// Ports this node produces on
    pub fn output_ports(&self) -> &'static [Port] {
        match self {
            Node::ColorCamera { .. } => &[Port::Video],
            Node::MonoCamera { .. } => &[Port::Out],
            Node::VideoEncoder { .. } => &[Port::Bitstream],
            Node::StereoDepth(_) => &[Port::Disparity],
            Node::Colormap { .. } => &[Port::Out],
            Node::Output { .. } => &[],
        }
    }

    /// Ports this node consumes from
    pub fn input_ports(&self) -> &'static [Port] {
        match self {
            Node::ColorCamera { .. } | Node::MonoCamera { .. } => &[],
            Node::VideoEncoder { .. } | Node::Output { .. } => &[Port::Input],
            Node::StereoDepth(_) => &[Port::Left, Port::Right],
            Node::Colormap { .. } => &[Port::InputImage],
        }
    }

    /// Whether this node captures from a sensor
    pub fn is_capture(&self) -> bool {
        matches!(self, Node::ColorCamera { .. } | Node::MonoCamera { .. })
    }
}

/// Directed connection between two node ports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    pub from: NodeId,
    pub from_port: Port,
    pub to: NodeId,
    pub to_port: Port,
}

/// Complete processing pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineDescription {
    nodes: Vec<Node>,
    links: Vec<Link>,
}

impl PipelineDescription {
    /// Create an empty description
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node
    pub fn add(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    /// Link an output port to an input port
    pub fn link(
        &mut self,
        from: NodeId,
        from_port: Port,
        to: NodeId,
        to_port: Port,
    ) -> Result<(), TopologyError> {
        let source = self.node(from).ok_or_else(|| invalid(format!("unknown node {:?}", from)))?;
        let sink = self.node(to).ok_or_else(|| invalid(format!("unknown node {:?}", to)))?;

        if !source.output_ports().contains(&from_port) {
            return Err(invalid(format!("{:?} has no output port {:?}", source, from_port)));
        }
        if !sink.input_ports().contains(&to_port) {
            return Err(invalid(format!("{:?} has no input port {:?}", sink, to_port)));
        }
        if from >= to {
            return Err(invalid(format!(
                "link {:?} -> {:?} does not point downstream",
                from, to
            )));
        }
        if self.producer(to, to_port).is_some() {
            return Err(invalid(format!("input {:?}.{:?} is already linked", to, to_port)));
        }

        self.links.push(Link {
            from,
            from_port,
            to,
            to_port,
        });
        Ok(())
    }

    /// Get a node by id
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    /// All nodes with their ids
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    /// All links
    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Node feeding the given input port
    pub fn producer(&self, to: NodeId, to_port: Port) -> Option<NodeId> {
        self.links
            .iter()
            .find(|l| l.to == to && l.to_port == to_port)
            .map(|l| l.from)
    }

    /// Nodes consuming any output of the given node
    pub fn consumers(&self, from: NodeId) -> Vec<(NodeId, Port)> {
        self.links
            .iter()
            .filter(|l| l.from == from)
            .map(|l| (l.to, l.to_port))
            .collect()
    }

    /// Output nodes and the streams they carry
    pub fn outputs(&self) -> impl Iterator<Item = (NodeId, StreamId)> + '_ {
        self.nodes().filter_map(|(id, node)| match node {
            Node::Output { stream } => Some((id, *stream)),
            _ => None,
        })
    }

    /// Names of all output queues
    pub fn output_names(&self) -> Vec<&'static str> {
        self.outputs().map(|(_, s)| s.as_str()).collect()
    }

    /// Output node for a stream
    pub fn output_for(&self, stream: StreamId) -> Option<NodeId> {
        self.outputs().find(|(_, s)| *s == stream).map(|(id, _)| id)
    }

    /// Frame rate of the encoder feeding an output
    pub fn output_fps(&self, stream: StreamId) -> Option<u32> {
        let output = self.output_for(stream)?;
        let encoder = self.producer(output, Port::Input)?;
        match self.node(encoder)? {
            Node::VideoEncoder { fps, .. } => Some(*fps),
            _ => None,
        }
    }

    /// The stereo depth node, if any
    pub fn stereo_depth(&self) -> Option<NodeId> {
        self.nodes()
            .find(|(_, n)| matches!(n, Node::StereoDepth(_)))
            .map(|(id, _)| id)
    }

    /// Capture nodes reachable upstream of a node, in node order
    pub fn upstream_captures(&self, id: NodeId) -> Vec<NodeId> {
        let mut found = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if self.node(current).is_some_and(Node::is_capture) && !found.contains(&current) {
                found.push(current);
            }
            for link in self.links.iter().filter(|l| l.to == current) {
                stack.push(link.from);
            }
        }
        found.sort();
        found
    }

    /// Check that the description can be instantiated
    ///
    /// Every input port must be linked, every output must be fed by an
    /// encoder bitstream, and no stream may be output twice.
    pub fn validate(&self) -> Result<(), TopologyError> {
        for (id, node) in self.nodes() {
            for port in node.input_ports() {
                if self.producer(id, *port).is_none() {
                    return Err(invalid(format!("input {:?}.{:?} of {:?} is not linked", id, port, node)));
                }
            }
        }

        let mut seen = Vec::new();
        for (id, stream) in self.outputs() {
            if seen.contains(&stream) {
                return Err(invalid(format!("stream '{}' is output twice", stream)));
            }
            seen.push(stream);

            let fed_by_encoder = self
                .producer(id, Port::Input)
                .and_then(|p| self.node(p))
                .is_some_and(|n| matches!(n, Node::VideoEncoder { .. }));
            if !fed_by_encoder {
                return Err(invalid(format!("output '{}' is not fed by an encoder", stream)));
            }
        }

        Ok(())
    }
}

fn invalid(message: String) -> TopologyError {
    TopologyError::InvalidPipeline(message)
}
