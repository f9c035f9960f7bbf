//! File-replay device backend
//!
//! Stands in for camera hardware by replaying recorded H.264 streams. The
//! replay root holds one directory per device:
//!
//! ```text
//! <root>/
//!   oak-d-lite/
//!     rgb.h264         CAM_A connected
//!     mono_left.h264   CAM_B connected
//!     mono_right.h264  CAM_C connected
//!     depth.h264       stereo depth output
//! ```
//!
//! Each output replays its file as Annex-B access units paced at the encoder
//! frame rate of the pipeline description. Removing the device directory while
//! a session runs is reported as a dropped link.

use std::collections::{BTreeSet, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::{CancellationToken, DropGuard};

use super::{
    CameraSocket, DeviceBackend, DeviceError, DeviceFrame, DeviceHandle, DeviceInfo,
    DeviceSession, OutputQueue, OutputSender,
};
use crate::catalog::StreamId;
use crate::media::h264;
use crate::topology::{Node, PipelineDescription};

const FILE_EXTENSION: &str = "h264";

/// Replay backend configuration
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Directory holding one subdirectory per device
    pub root: PathBuf,

    /// Frames buffered per output queue
    pub queue_depth: usize,

    /// Restart from the beginning when a file ends
    pub looping: bool,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./devices"),
            queue_depth: OutputQueue::DEFAULT_DEPTH,
            looping: true,
        }
    }
}

impl ReplayConfig {
    /// Create a config for the given root directory
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    /// Set the output queue depth
    pub fn queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth.max(1);
        self
    }

    /// Enable or disable looping
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }
}

/// Device backend replaying recorded streams from disk
#[derive(Debug, Clone)]
pub struct ReplayBackend {
    config: ReplayConfig,
}

impl ReplayBackend {
    pub fn new(config: ReplayConfig) -> Self {
        Self { config }
    }
}

impl DeviceBackend for ReplayBackend {
    type Handle = ReplayHandle;

    async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, DeviceError> {
        let mut entries = match tokio::fs::read_dir(&self.config.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(DeviceError::Unavailable(e.to_string())),
        };

        let mut devices = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| DeviceError::Unavailable(e.to_string()))?
        {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            devices.push(DeviceInfo::new(name, path.to_string_lossy()));
        }

        devices.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(devices)
    }

    async fn open_device(&self, info: &DeviceInfo) -> Result<ReplayHandle, DeviceError> {
        let dir = PathBuf::from(&info.id);
        if !device_present(&dir).await {
            return Err(DeviceError::Unavailable(format!(
                "device '{}' not found",
                info.name
            )));
        }

        Ok(ReplayHandle {
            dir,
            config: self.config.clone(),
        })
    }
}

/// Open replay device
#[derive(Debug)]
pub struct ReplayHandle {
    dir: PathBuf,
    config: ReplayConfig,
}

impl ReplayHandle {
    fn stream_file(&self, stream: StreamId) -> PathBuf {
        self.dir
            .join(stream.as_str())
            .with_extension(FILE_EXTENSION)
    }

    async fn load_units(&self, stream: StreamId) -> Result<Vec<Bytes>, DeviceError> {
        let path = self.stream_file(stream);
        let data = tokio::fs::read(&path).await.map_err(|e| {
            DeviceError::PipelineConstruction(format!(
                "cannot read source for '{}' ({}): {}",
                stream,
                path.display(),
                e
            ))
        })?;

        let units = h264::split_access_units(&Bytes::from(data));
        if units.is_empty() {
            return Err(DeviceError::PipelineConstruction(format!(
                "source for '{}' holds no H.264 access units",
                stream
            )));
        }
        Ok(units)
    }
}

impl DeviceHandle for ReplayHandle {
    type Session = ReplaySession;

    async fn connected_sources(&self) -> Result<BTreeSet<CameraSocket>, DeviceError> {
        if !device_present(&self.dir).await {
            return Err(DeviceError::Communication(format!(
                "device '{}' disconnected",
                self.dir.display()
            )));
        }

        let mut sources = BTreeSet::new();
        for (socket, stream) in [
            (CameraSocket::CamA, StreamId::Rgb),
            (CameraSocket::CamB, StreamId::MonoLeft),
            (CameraSocket::CamC, StreamId::MonoRight),
        ] {
            if tokio::fs::try_exists(self.stream_file(stream))
                .await
                .unwrap_or(false)
            {
                sources.insert(socket);
            }
        }
        Ok(sources)
    }

    async fn instantiate(
        self,
        pipeline: &PipelineDescription,
    ) -> Result<ReplaySession, DeviceError> {
        let connected = self.connected_sources().await?;
        let cancel = CancellationToken::new();
        let mut queues = HashMap::new();

        for (output, stream) in pipeline.outputs() {
            for capture in pipeline.upstream_captures(output) {
                let socket = match pipeline.node(capture) {
                    Some(Node::ColorCamera { socket, .. } | Node::MonoCamera { socket, .. }) => {
                        *socket
                    }
                    _ => continue,
                };
                if !connected.contains(&socket) {
                    return Err(DeviceError::PipelineConstruction(format!(
                        "output '{}' needs sensor {} which is not connected",
                        stream, socket
                    )));
                }
            }

            if stream == StreamId::Depth && pipeline.stereo_depth().is_none() {
                return Err(DeviceError::PipelineConstruction(
                    "depth output without a stereo depth stage".into(),
                ));
            }

            let units = self.load_units(stream).await?;
            let fps = pipeline.output_fps(stream).unwrap_or(30).max(1);
            let (tx, queue) = OutputQueue::channel(stream.as_str(), self.config.queue_depth);

            tokio::spawn(replay_output(
                self.dir.clone(),
                units,
                fps,
                self.config.looping,
                tx,
                cancel.child_token(),
            ));

            tracing::debug!(
                device = %self.dir.display(),
                output = %stream,
                fps = fps,
                "Replay output started"
            );
            queues.insert(stream.as_str().to_string(), queue);
        }

        Ok(ReplaySession {
            queues,
            _guard: cancel.drop_guard(),
        })
    }
}

/// Running replay session; dropping it stops all outputs
pub struct ReplaySession {
    queues: HashMap<String, OutputQueue>,
    _guard: DropGuard,
}

impl DeviceSession for ReplaySession {
    fn output_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.queues.keys().cloned().collect();
        names.sort();
        names
    }

    fn output_queue(&mut self, name: &str) -> Option<OutputQueue> {
        self.queues.remove(name)
    }
}

async fn device_present(dir: &Path) -> bool {
    tokio::fs::metadata(dir)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

async fn replay_output(
    dir: PathBuf,
    units: Vec<Bytes>,
    fps: u32,
    looping: bool,
    tx: OutputSender,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1) / fps);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sequence = 0u64;

    loop {
        for unit in &units {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }

            let item = if device_present(&dir).await {
                Ok(DeviceFrame::new(sequence, unit.clone()))
            } else {
                Err(DeviceError::Communication(format!(
                    "device '{}' disconnected",
                    dir.display()
                )))
            };
            let disconnected = item.is_err();
            sequence += 1;

            tokio::select! {
                _ = cancel.cancelled() => return,
                sent = tx.send(item) => {
                    if sent.is_err() || disconnected {
                        return;
                    }
                }
            }
        }

        if !looping {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::device::detect;
    use crate::topology;

    const AU_KEY: &[u8] = &[0, 0, 0, 1, 0x67, 0x42, 0, 0, 0, 1, 0x68, 0xCE, 0, 0, 1, 0x65, 0x88];
    const AU_INTER: &[u8] = &[0, 0, 1, 0x41, 0x9A, 0x02];

    fn write_stream(dir: &Path, name: &str) {
        std::fs::write(
            dir.join(format!("{}.h264", name)),
            [AU_KEY, AU_INTER, AU_INTER].concat(),
        )
        .unwrap();
    }

    fn device_dir(root: &Path, name: &str, streams: &[&str]) -> PathBuf {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        for stream in streams {
            write_stream(&dir, stream);
        }
        dir
    }

    #[tokio::test]
    async fn test_enumerate_missing_root() {
        let backend = ReplayBackend::new(ReplayConfig::with_root("/nonexistent/camrelay"));
        assert!(backend.enumerate_devices().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_enumerate_and_detect() {
        let root = tempfile::tempdir().unwrap();
        device_dir(root.path(), "b-device", &["mono_left", "mono_right"]);
        device_dir(root.path(), "a-device", &["rgb"]);
        std::fs::write(root.path().join("README"), b"not a device").unwrap();

        let backend = ReplayBackend::new(ReplayConfig::with_root(root.path()));
        let devices = backend.enumerate_devices().await.unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].name, "a-device");

        let rgb_only = detect(&backend, &devices[0]).await.unwrap();
        assert!(rgb_only.rgb() && !rgb_only.depth());

        let stereo = detect(&backend, &devices[1]).await.unwrap();
        assert!(!stereo.rgb() && stereo.depth());
    }

    #[tokio::test]
    async fn test_open_missing_device_is_unavailable() {
        let backend = ReplayBackend::new(ReplayConfig::default());
        let info = DeviceInfo::new("ghost", "/nonexistent/camrelay/ghost");

        let err = backend.open_device(&info).await.unwrap_err();
        assert!(matches!(err, DeviceError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_session_replays_frames_in_order() {
        let root = tempfile::tempdir().unwrap();
        device_dir(root.path(), "cam", &["rgb"]);
        let backend = ReplayBackend::new(ReplayConfig::with_root(root.path()).looping(false));
        let info = backend.enumerate_devices().await.unwrap().remove(0);

        let config = detect(&backend, &info).await.unwrap();
        let topology = topology::build(&config, &Catalog::default()).unwrap();

        let handle = backend.open_device(&info).await.unwrap();
        let mut session = handle.instantiate(topology.pipeline()).await.unwrap();
        assert_eq!(session.output_names(), vec!["rgb".to_string()]);

        let mut queue = session.output_queue("rgb").unwrap();
        assert!(session.output_queue("rgb").is_none());

        let first = queue.get().await.unwrap();
        assert_eq!(first.sequence, 0);
        assert_eq!(&first.data[..], AU_KEY);
        assert_eq!(queue.get().await.unwrap().sequence, 1);
        assert_eq!(queue.get().await.unwrap().sequence, 2);

        // Non-looping replay ends; the closed queue reads as a lost link
        assert!(matches!(queue.get().await, Err(DeviceError::Communication(_))));
    }

    #[tokio::test]
    async fn test_depth_without_source_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        device_dir(root.path(), "cam", &["mono_left", "mono_right"]);
        let backend = ReplayBackend::new(ReplayConfig::with_root(root.path()));
        let info = backend.enumerate_devices().await.unwrap().remove(0);

        let config = detect(&backend, &info).await.unwrap();
        let topology = topology::build(&config, &Catalog::default()).unwrap();

        let handle = backend.open_device(&info).await.unwrap();
        let err = handle.instantiate(topology.pipeline()).await.err().unwrap();
        assert!(matches!(err, DeviceError::PipelineConstruction(_)));
    }

    #[tokio::test]
    async fn test_removed_device_reports_lost_link() {
        let root = tempfile::tempdir().unwrap();
        let dir = device_dir(root.path(), "cam", &["rgb"]);
        let backend = ReplayBackend::new(ReplayConfig::with_root(root.path()));
        let info = backend.enumerate_devices().await.unwrap().remove(0);

        let topology =
            topology::build(&detect(&backend, &info).await.unwrap(), &Catalog::default()).unwrap();
        let handle = backend.open_device(&info).await.unwrap();
        let mut session = handle.instantiate(topology.pipeline()).await.unwrap();
        let mut queue = session.output_queue("rgb").unwrap();

        queue.get().await.unwrap();
        std::fs::remove_dir_all(&dir).unwrap();

        loop {
            match queue.get().await {
                Ok(_) => continue,
                Err(e) => {
                    assert!(matches!(e, DeviceError::Communication(_)));
                    break;
                }
            }
        }
    }
}
