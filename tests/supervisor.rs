//! End-to-end supervisor cycles against an in-memory device

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use camrelay::device::{
    CameraSocket, DeviceBackend, DeviceError, DeviceFrame, DeviceHandle, DeviceInfo, DeviceSession,
    OutputQueue, OutputSender,
};
use camrelay::registry::{MemoryRegistry, RegistryConfig};
use camrelay::topology::PipelineDescription;
use camrelay::{
    ErrorKind, Phase, RelayConfig, RestartPolicy, ServerConfig, StreamId, Supervisor,
    SupervisorEvent,
};

const SHORT: Duration = Duration::from_millis(10);
const LONG: Duration = Duration::from_millis(250);
const WAIT: Duration = Duration::from_secs(5);

const IDR: &[u8] = &[0x00, 0x00, 0x00, 0x01, 0x65, 0x88, 0x84, 0x21];

#[derive(Default)]
struct FakeState {
    present: bool,
    sources: BTreeSet<CameraSocket>,
    senders: Vec<OutputSender>,
    instantiated: usize,
}

/// Device whose sensors and link are driven by the test
#[derive(Clone, Default)]
struct FakeDevice {
    state: Arc<Mutex<FakeState>>,
}

impl FakeDevice {
    fn with_sources(sources: &[CameraSocket]) -> Self {
        let device = Self::default();
        {
            let mut state = device.state.lock().unwrap();
            state.present = true;
            state.sources = sources.iter().copied().collect();
        }
        device
    }

    fn instantiated(&self) -> usize {
        self.state.lock().unwrap().instantiated
    }

    fn send_frame(&self) {
        let state = self.state.lock().unwrap();
        for tx in &state.senders {
            let _ = tx.try_send(Ok(DeviceFrame::new(0, Bytes::from_static(IDR))));
        }
    }

    /// Report a dropped link on every output
    fn lose_link(&self) {
        let senders = std::mem::take(&mut self.state.lock().unwrap().senders);
        for tx in senders {
            let _ = tx.try_send(Err(DeviceError::Communication("link lost".into())));
        }
    }
}

impl DeviceBackend for FakeDevice {
    type Handle = FakeHandle;

    async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, DeviceError> {
        if self.state.lock().unwrap().present {
            Ok(vec![DeviceInfo::new("fake", "fake-0")])
        } else {
            Ok(Vec::new())
        }
    }

    async fn open_device(&self, _info: &DeviceInfo) -> Result<FakeHandle, DeviceError> {
        Ok(FakeHandle {
            device: self.clone(),
        })
    }
}

struct FakeHandle {
    device: FakeDevice,
}

impl DeviceHandle for FakeHandle {
    type Session = FakeSession;

    async fn connected_sources(&self) -> Result<BTreeSet<CameraSocket>, DeviceError> {
        Ok(self.device.state.lock().unwrap().sources.clone())
    }

    async fn instantiate(
        self,
        pipeline: &PipelineDescription,
    ) -> Result<FakeSession, DeviceError> {
        let mut state = self.device.state.lock().unwrap();
        state.instantiated += 1;

        let mut queues = HashMap::new();
        for name in pipeline.output_names() {
            let (tx, queue) = OutputQueue::channel(name, 8);
            state.senders.push(tx);
            queues.insert(name.to_string(), queue);
        }
        Ok(FakeSession { queues })
    }
}

struct FakeSession {
    queues: HashMap<String, OutputQueue>,
}

impl DeviceSession for FakeSession {
    fn output_names(&self) -> Vec<String> {
        self.queues.keys().cloned().collect()
    }

    fn output_queue(&mut self, name: &str) -> Option<OutputQueue> {
        self.queues.remove(name)
    }
}

fn relay_config(dir: &Path, registry: RegistryConfig) -> RelayConfig {
    RelayConfig::default()
        .transport_dir(dir)
        .server(ServerConfig::with_addr("127.0.0.1:0".parse().unwrap()))
        .registry(registry)
        .restart(RestartPolicy::default().short_delay(SHORT).long_delay(LONG))
}

fn registry_disabled() -> RegistryConfig {
    RegistryConfig::default().disable()
}

async fn wait_for<F>(rx: &mut broadcast::Receiver<SupervisorEvent>, mut matches: F) -> SupervisorEvent
where
    F: FnMut(&SupervisorEvent) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("supervisor event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for supervisor event")
}

#[tokio::test]
async fn test_no_device_retries_with_short_delay() {
    let dir = tempfile::tempdir().unwrap();
    let device = FakeDevice::default();
    let supervisor = Supervisor::new(
        device,
        MemoryRegistry::new(),
        relay_config(dir.path(), registry_disabled()),
    )
    .unwrap();
    let mut events = supervisor.subscribe();
    let cancel = CancellationToken::new();
    let task = tokio::spawn(supervisor.run(cancel.clone()));

    let failed = wait_for(&mut events, |e| matches!(e, SupervisorEvent::CycleFailed { .. })).await;
    assert_eq!(
        failed,
        SupervisorEvent::CycleFailed {
            cycle: 1,
            phase: Phase::Discovering,
            kind: ErrorKind::DeviceUnavailable,
            delay: SHORT,
        }
    );

    wait_for(&mut events, |e| {
        matches!(e, SupervisorEvent::PhaseEntered { cycle: 2, phase: Phase::Discovering })
    })
    .await;

    cancel.cancel();
    wait_for(&mut events, |e| *e == SupervisorEvent::Stopped).await;
    task.await.unwrap();
}

#[tokio::test]
async fn test_device_without_sensors_is_empty_capability() {
    let dir = tempfile::tempdir().unwrap();
    let device = FakeDevice::with_sources(&[]);
    let supervisor = Supervisor::new(
        device.clone(),
        MemoryRegistry::new(),
        relay_config(dir.path(), registry_disabled()),
    )
    .unwrap();
    let mut events = supervisor.subscribe();
    let cancel = CancellationToken::new();
    let task = tokio::spawn(supervisor.run(cancel.clone()));

    let failed = wait_for(&mut events, |e| matches!(e, SupervisorEvent::CycleFailed { .. })).await;
    assert_eq!(
        failed,
        SupervisorEvent::CycleFailed {
            cycle: 1,
            phase: Phase::Detecting,
            kind: ErrorKind::EmptyCapability,
            delay: SHORT,
        }
    );

    wait_for(&mut events, |e| {
        matches!(e, SupervisorEvent::PhaseEntered { cycle: 2, phase: Phase::Discovering })
    })
    .await;

    // Nothing was ever built or served
    assert_eq!(device.instantiated(), 0);
    assert!(!dir.path().join("socketrgb").exists());

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn test_lost_link_tears_down_and_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let device = FakeDevice::with_sources(&[CameraSocket::CamA]);
    let supervisor = Supervisor::new(
        device.clone(),
        MemoryRegistry::new(),
        relay_config(dir.path(), registry_disabled()),
    )
    .unwrap();
    let active = supervisor.active_streams();
    let mut events = supervisor.subscribe();
    let cancel = CancellationToken::new();
    let task = tokio::spawn(supervisor.run(cancel.clone()));

    let serving = wait_for(&mut events, |e| matches!(e, SupervisorEvent::Serving { .. })).await;
    assert_eq!(
        serving,
        SupervisorEvent::Serving {
            cycle: 1,
            streams: vec![StreamId::Rgb],
        }
    );
    wait_for(&mut events, |e| {
        matches!(e, SupervisorEvent::PhaseEntered { cycle: 1, phase: Phase::Streaming })
    })
    .await;

    let endpoint = dir.path().join("socketrgb");
    assert!(endpoint.exists());
    assert!(!dir.path().join("socketmonoleft").exists());
    assert_eq!(active.borrow().len(), 1);

    device.send_frame();
    device.lose_link();

    let failed = wait_for(&mut events, |e| matches!(e, SupervisorEvent::CycleFailed { .. })).await;
    assert_eq!(
        failed,
        SupervisorEvent::CycleFailed {
            cycle: 1,
            phase: Phase::Streaming,
            kind: ErrorKind::DeviceCommunication,
            delay: LONG,
        }
    );
    // Teardown completes before the failure is reported
    assert!(!endpoint.exists());
    assert!(active.borrow().is_empty());

    let serving = wait_for(&mut events, |e| matches!(e, SupervisorEvent::Serving { .. })).await;
    assert_eq!(
        serving,
        SupervisorEvent::Serving {
            cycle: 2,
            streams: vec![StreamId::Rgb],
        }
    );
    assert!(endpoint.exists());
    assert_eq!(device.instantiated(), 2);

    cancel.cancel();
    wait_for(&mut events, |e| *e == SupervisorEvent::Stopped).await;
    tokio_test::assert_ok!(task.await);
    assert!(!endpoint.exists());
}

#[tokio::test]
async fn test_stereo_pair_serves_depth_and_registers_streams() {
    let dir = tempfile::tempdir().unwrap();
    let device = FakeDevice::with_sources(&[CameraSocket::CamB, CameraSocket::CamC]);
    let registry = MemoryRegistry::with_names(["Oak-D Mono Left"]);
    let registry_config = RegistryConfig::default().poll_interval(Duration::from_millis(20));
    let supervisor = Supervisor::new(
        device,
        registry.clone(),
        relay_config(dir.path(), registry_config),
    )
    .unwrap();
    let mut events = supervisor.subscribe();
    let cancel = CancellationToken::new();
    let task = tokio::spawn(supervisor.run(cancel.clone()));

    let detected = wait_for(&mut events, |e| {
        matches!(e, SupervisorEvent::CapabilityDetected { .. })
    })
    .await;
    let SupervisorEvent::CapabilityDetected { config, .. } = detected else {
        unreachable!()
    };
    assert!(!config.rgb());
    assert!(config.depth());

    let serving = wait_for(&mut events, |e| matches!(e, SupervisorEvent::Serving { .. })).await;
    assert_eq!(
        serving,
        SupervisorEvent::Serving {
            cycle: 1,
            streams: vec![StreamId::MonoLeft, StreamId::MonoRight, StreamId::Depth],
        }
    );

    tokio::time::timeout(WAIT, async {
        while registry.inserts().len() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("streams were not registered");

    let mut inserted: Vec<_> = registry.inserts().into_iter().map(|s| s.name).collect();
    inserted.sort();
    assert_eq!(inserted, ["Oak-D Mono Right", "Oak-D Stereo Disparity"]);
    assert!(registry
        .inserts()
        .iter()
        .all(|s| s.source == "Redirect"));

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let config = RelayConfig::default().transport_dir("relative/dir");
    let result = Supervisor::new(FakeDevice::default(), MemoryRegistry::new(), config);
    let Err(err) = result else {
        panic!("relative transport directory accepted");
    };
    assert_eq!(err.kind(), ErrorKind::Config);
}

/// Device whose enumeration blocks forever, like a hung USB query
struct HungDevice;

impl DeviceBackend for HungDevice {
    type Handle = FakeHandle;

    async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, DeviceError> {
        std::future::pending().await
    }

    async fn open_device(&self, _info: &DeviceInfo) -> Result<FakeHandle, DeviceError> {
        Err(DeviceError::Unavailable("never enumerated".into()))
    }
}

#[tokio::test]
async fn test_cancel_while_device_call_blocks() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = Supervisor::new(
        HungDevice,
        MemoryRegistry::new(),
        relay_config(dir.path(), registry_disabled()),
    )
    .unwrap();
    let mut events = supervisor.subscribe();
    let cancel = CancellationToken::new();
    let task = tokio::spawn(supervisor.run(cancel.clone()));

    wait_for(&mut events, |e| {
        matches!(e, SupervisorEvent::PhaseEntered { cycle: 1, phase: Phase::Discovering })
    })
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    cancel.cancel();
    let stopped = tokio::time::timeout(Duration::from_secs(2), task).await;
    assert!(stopped.is_ok(), "supervisor kept waiting on the device");
    assert_eq!(events.recv().await.unwrap(), SupervisorEvent::Stopped);
}

#[tokio::test]
async fn test_registered_redirect_is_served() {
    let dir = tempfile::tempdir().unwrap();
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let server = ServerConfig::with_addr(([127, 0, 0, 1], port).into());
    let registry_config = RegistryConfig::default()
        .redirect_base(server.base_url())
        .poll_interval(Duration::from_millis(20));
    let registry = MemoryRegistry::new();
    let config = relay_config(dir.path(), registry_config).server(server);

    let device = FakeDevice::with_sources(&[CameraSocket::CamA]);
    let supervisor = Supervisor::new(device, registry.clone(), config).unwrap();
    let mut events = supervisor.subscribe();
    let cancel = CancellationToken::new();
    let task = tokio::spawn(supervisor.run(cancel.clone()));

    wait_for(&mut events, |e| matches!(e, SupervisorEvent::Serving { .. })).await;
    tokio::time::timeout(WAIT, async {
        while registry.inserts().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("stream was not registered");

    let url = registry.inserts()[0].stream_information.endpoints[0].clone();
    assert_eq!(url, format!("http://127.0.0.1:{}/rgb", port));

    let response = tokio::time::timeout(WAIT, reqwest::get(&url))
        .await
        .expect("redirect target did not answer")
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(
        response.headers()[reqwest::header::CONTENT_TYPE],
        "video/h264"
    );
    drop(response);

    cancel.cancel();
    task.await.unwrap();
}
