//! Stream catalog
//!
//! The fixed set of stream identities this relay knows how to serve. The
//! catalog is built once at startup and shared read-only (`Arc<Catalog>`) by
//! every component.

use std::path::{Path, PathBuf};

/// Stable key of a catalog stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StreamId {
    /// Colour camera (CAM_A)
    Rgb,
    /// Left mono camera (CAM_B)
    MonoLeft,
    /// Right mono camera (CAM_C)
    MonoRight,
    /// Stereo disparity computed from both mono cameras
    Depth,
}

impl StreamId {
    /// All identities in catalog order
    pub const ALL: [StreamId; 4] = [
        StreamId::Rgb,
        StreamId::MonoLeft,
        StreamId::MonoRight,
        StreamId::Depth,
    ];

    /// Identifier string, also used as the device output name
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamId::Rgb => "rgb",
            StreamId::MonoLeft => "mono_left",
            StreamId::MonoRight => "mono_right",
            StreamId::Depth => "depth",
        }
    }

    /// Parse an identifier string
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "rgb" => Some(StreamId::Rgb),
            "mono_left" => Some(StreamId::MonoLeft),
            "mono_right" => Some(StreamId::MonoRight),
            "depth" => Some(StreamId::Depth),
            _ => None,
        }
    }

    fn default_display_name(&self) -> &'static str {
        match self {
            StreamId::Rgb => "Oak-D RGB",
            StreamId::MonoLeft => "Oak-D Mono Left",
            StreamId::MonoRight => "Oak-D Mono Right",
            StreamId::Depth => "Oak-D Stereo Disparity",
        }
    }

    fn socket_file_name(&self) -> &'static str {
        match self {
            StreamId::Rgb => "socketrgb",
            StreamId::MonoLeft => "socketmonoleft",
            StreamId::MonoRight => "socketmonoright",
            StreamId::Depth => "socketdepth",
        }
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable description of one servable stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamIdentity {
    /// Stable key
    pub id: StreamId,
    /// Human-readable name, also the registry key
    pub display_name: String,
    /// Network mount point (without leading slash)
    pub endpoint_path: String,
    /// Local hand-off address of the relay channel
    pub transport_address: PathBuf,
}

impl StreamIdentity {
    /// Mount path as served by the stream server
    pub fn mount_path(&self) -> String {
        format!("/{}", self.endpoint_path)
    }
}

/// The four known stream identities
#[derive(Debug, Clone)]
pub struct Catalog {
    streams: [StreamIdentity; 4],
}

impl Catalog {
    /// Default directory holding transport endpoints
    pub const DEFAULT_TRANSPORT_DIR: &'static str = "/tmp";

    /// Build the catalog with transport endpoints under `transport_dir`
    pub fn new(transport_dir: impl AsRef<Path>) -> Self {
        let dir = transport_dir.as_ref();
        let streams = StreamId::ALL.map(|id| StreamIdentity {
            id,
            display_name: id.default_display_name().to_string(),
            endpoint_path: id.as_str().to_string(),
            transport_address: dir.join(id.socket_file_name()),
        });
        Self { streams }
    }

    /// Get the identity for a stream id
    pub fn get(&self, id: StreamId) -> &StreamIdentity {
        // Array order matches StreamId::ALL
        &self.streams[id as usize]
    }

    /// Look up an identity by its endpoint path (with or without leading slash)
    pub fn by_endpoint(&self, path: &str) -> Option<&StreamIdentity> {
        let path = path.trim_start_matches('/');
        self.streams.iter().find(|s| s.endpoint_path == path)
    }

    /// Iterate over all identities in catalog order
    pub fn iter(&self) -> impl Iterator<Item = &StreamIdentity> {
        self.streams.iter()
    }

    /// All transport endpoint paths
    pub fn transport_addresses(&self) -> impl Iterator<Item = &Path> {
        self.streams.iter().map(|s| s.transport_address.as_path())
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TRANSPORT_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog() {
        let catalog = Catalog::default();

        let rgb = catalog.get(StreamId::Rgb);
        assert_eq!(rgb.display_name, "Oak-D RGB");
        assert_eq!(rgb.endpoint_path, "rgb");
        assert_eq!(rgb.transport_address, PathBuf::from("/tmp/socketrgb"));

        let depth = catalog.get(StreamId::Depth);
        assert_eq!(depth.display_name, "Oak-D Stereo Disparity");
        assert_eq!(depth.transport_address, PathBuf::from("/tmp/socketdepth"));
    }

    #[test]
    fn test_get_matches_id() {
        let catalog = Catalog::default();
        for id in StreamId::ALL {
            assert_eq!(catalog.get(id).id, id);
        }
    }

    #[test]
    fn test_lookup_by_endpoint() {
        let catalog = Catalog::default();

        assert_eq!(catalog.by_endpoint("/mono_left").unwrap().id, StreamId::MonoLeft);
        assert_eq!(catalog.by_endpoint("mono_right").unwrap().id, StreamId::MonoRight);
        assert!(catalog.by_endpoint("/preview").is_none());
    }

    #[test]
    fn test_name_round_trip() {
        for id in StreamId::ALL {
            assert_eq!(StreamId::from_name(id.as_str()), Some(id));
        }
        assert!(StreamId::from_name("thermal").is_none());
    }

    #[test]
    fn test_custom_transport_dir() {
        let catalog = Catalog::new("/run/camrelay");
        let paths: Vec<_> = catalog.transport_addresses().collect();

        assert_eq!(paths.len(), 4);
        assert!(paths.iter().all(|p| p.starts_with("/run/camrelay")));
        assert_eq!(catalog.get(StreamId::MonoLeft).mount_path(), "/mono_left");
    }
}
