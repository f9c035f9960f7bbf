//! Supervisor loop

use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use super::state::{CycleFailure, Phase, SupervisorEvent};
use crate::catalog::{Catalog, StreamId, StreamIdentity};
use crate::config::RelayConfig;
use crate::device::{
    detect, DeviceBackend, DeviceError, DeviceFrame, DeviceHandle, DeviceInfo, DeviceSession,
};
use crate::error::{Error, ErrorKind, Result};
use crate::registry::{Reconciler, RegistryClient};
use crate::relay::remove_endpoint;
use crate::server::StreamServer;
use crate::topology::{self, Topology};

const EVENT_CAPACITY: usize = 64;

type OutputStream = BoxStream<'static, (StreamId, std::result::Result<DeviceFrame, DeviceError>)>;

/// Top-level control loop
///
/// Drives connection cycles against the first device of `B` and keeps the
/// registry behind `R` in step with what is served.
pub struct Supervisor<B, R> {
    backend: B,
    registry: Option<R>,
    config: RelayConfig,
    catalog: Arc<Catalog>,
    events: broadcast::Sender<SupervisorEvent>,
    active: watch::Sender<Vec<StreamIdentity>>,
}

impl<B: DeviceBackend, R: RegistryClient> Supervisor<B, R> {
    pub fn new(backend: B, registry: R, config: RelayConfig) -> Result<Self> {
        config.validate()?;
        let catalog = Arc::new(config.catalog());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (active, _) = watch::channel(Vec::new());

        Ok(Self {
            backend,
            registry: Some(registry),
            config,
            catalog,
            events,
            active,
        })
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Subscribe to supervisor events
    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.events.subscribe()
    }

    /// Streams currently served, as published to the registry
    pub fn active_streams(&self) -> watch::Receiver<Vec<StreamIdentity>> {
        self.active.subscribe()
    }

    /// Run until `cancel` fires
    pub async fn run(mut self, cancel: CancellationToken) {
        let reconciler = match self.registry.take() {
            Some(client) if self.config.registry.enabled => {
                let reconciler =
                    Reconciler::new(client, self.config.registry.clone(), self.active.subscribe());
                Some(tokio::spawn(reconciler.run(cancel.child_token())))
            }
            _ => {
                tracing::info!("Registry reconciliation disabled");
                None
            }
        };

        let mut cycle = 0u64;
        loop {
            cycle += 1;
            let failure = match self.run_cycle(cycle, &cancel).await {
                Ok(()) => break,
                Err(failure) => failure,
            };
            if cancel.is_cancelled() {
                break;
            }

            let kind = failure.kind();
            let delay = self.config.restart.retry_delay(failure.phase, kind);
            self.report(cycle, &failure, delay);
            self.emit(SupervisorEvent::CycleFailed {
                cycle,
                phase: failure.phase,
                kind,
                delay,
            });

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.active.send_replace(Vec::new());
        if let Some(task) = reconciler {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Registry reconciler failed");
            }
        }

        self.emit(SupervisorEvent::Stopped);
        tracing::info!(cycles = cycle, "Supervisor stopped");
    }

    fn report(&self, cycle: u64, failure: &CycleFailure, delay: std::time::Duration) {
        let delay_ms = delay.as_millis() as u64;
        match failure.kind() {
            ErrorKind::DeviceCommunication => tracing::error!(
                cycle = cycle,
                phase = %failure.phase,
                kind = %failure.kind(),
                error = %failure.error,
                delay_ms = delay_ms,
                "Lost connection to device, restarting"
            ),
            ErrorKind::PipelineConstruction => tracing::error!(
                cycle = cycle,
                phase = %failure.phase,
                kind = %failure.kind(),
                error = ?failure.error,
                delay_ms = delay_ms,
                "Pipeline construction failed, restarting"
            ),
            kind => tracing::warn!(
                cycle = cycle,
                phase = %failure.phase,
                kind = %kind,
                error = %failure.error,
                delay_ms = delay_ms,
                "Cycle failed, restarting"
            ),
        }
    }

    fn emit(&self, event: SupervisorEvent) {
        let _ = self.events.send(event);
    }

    fn enter(&self, cycle: u64, phase: Phase) {
        tracing::info!(cycle = cycle, phase = %phase, "Entering phase");
        self.emit(SupervisorEvent::PhaseEntered { cycle, phase });
    }

    fn remove_stale_endpoints(&self) {
        for path in self.catalog.transport_addresses() {
            match remove_endpoint(path) {
                Ok(true) => tracing::debug!(endpoint = %path.display(), "Removed stale endpoint"),
                Ok(false) => {}
                Err(e) => tracing::warn!(
                    endpoint = %path.display(),
                    error = %e,
                    "Failed to remove stale endpoint"
                ),
            }
        }
    }

    /// One connection cycle
    ///
    /// Returns `Ok` only when cancelled. Every device call and the server bind
    /// are raced against `cancel`, since device calls may block indefinitely.
    async fn run_cycle(
        &self,
        cycle: u64,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), CycleFailure> {
        self.enter(cycle, Phase::Discovering);
        self.remove_stale_endpoints();
        let Some(devices) = cancel
            .run_until_cancelled(self.backend.enumerate_devices())
            .await
        else {
            return Ok(());
        };
        let devices = devices.map_err(|e| CycleFailure::new(Phase::Discovering, e))?;
        let Some(device) = devices.into_iter().next() else {
            return Err(CycleFailure::new(
                Phase::Discovering,
                DeviceError::Unavailable("no devices found".into()),
            ));
        };
        tracing::info!(device = %device.name, id = %device.id, "Detected device");

        self.enter(cycle, Phase::Detecting);
        let Some(config) = cancel
            .run_until_cancelled(detect(&self.backend, &device))
            .await
        else {
            return Ok(());
        };
        let config = config.map_err(|e| CycleFailure::new(Phase::Detecting, e))?;
        if config.is_empty() {
            return Err(CycleFailure::new(Phase::Detecting, Error::EmptyCapability));
        }
        tracing::info!(
            rgb = config.rgb(),
            mono_left = config.mono_left(),
            mono_right = config.mono_right(),
            depth = config.depth(),
            "Supported configuration"
        );
        self.emit(SupervisorEvent::CapabilityDetected { cycle, config });

        self.enter(cycle, Phase::Building);
        let topology = topology::build(&config, &self.catalog)
            .map_err(|e| CycleFailure::new(Phase::Building, e))?;

        if cancel.is_cancelled() {
            return Ok(());
        }

        self.enter(cycle, Phase::Serving);
        let Some(server) = cancel
            .run_until_cancelled(StreamServer::start(self.config.server.clone()))
            .await
        else {
            return Ok(());
        };
        let server = server.map_err(|e| CycleFailure::new(Phase::Serving, e))?;
        for identity in topology.streams() {
            let mounted = cancel.run_until_cancelled(server.mount(identity.clone())).await;
            match mounted {
                Some(Ok(())) => {}
                Some(Err(e)) => {
                    server.shutdown().await;
                    return Err(CycleFailure::new(Phase::Serving, e));
                }
                None => {
                    server.shutdown().await;
                    return Ok(());
                }
            }
        }
        self.active.send_replace(topology.streams().to_vec());
        self.emit(SupervisorEvent::Serving {
            cycle,
            streams: topology.ids(),
        });

        self.enter(cycle, Phase::Streaming);
        let result = self.stream(&device, &topology, &server, cancel).await;

        self.active.send_replace(Vec::new());
        server.shutdown().await;
        tracing::info!(cycle = cycle, "Cycle torn down");

        result.map_err(|e| CycleFailure::new(Phase::Streaming, e))
    }

    /// Drain every active output into the server until a fault or cancellation
    async fn stream(
        &self,
        device: &DeviceInfo,
        topology: &Topology,
        server: &StreamServer,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let Some(handle) = cancel
            .run_until_cancelled(self.backend.open_device(device))
            .await
        else {
            return Ok(());
        };
        let Some(session) = cancel
            .run_until_cancelled(handle?.instantiate(topology.pipeline()))
            .await
        else {
            return Ok(());
        };
        let mut session = session?;

        let mut outputs: Vec<OutputStream> = Vec::new();
        for name in session.output_names() {
            let Some(id) = StreamId::from_name(&name) else {
                tracing::debug!(output = %name, "Ignoring unknown output");
                continue;
            };
            if !topology.config().check(id) {
                continue;
            }
            match session.output_queue(&name) {
                Some(queue) => outputs.push(queue.into_stream().map(move |item| (id, item)).boxed()),
                None => tracing::warn!(output = %name, "Output queue already taken"),
            }
        }
        if outputs.is_empty() {
            return Err(DeviceError::PipelineConstruction(
                "device exposes no output for the active streams".into(),
            )
            .into());
        }

        tracing::info!(
            outputs = outputs.len(),
            addr = %server.local_addr(),
            "Streaming video data"
        );

        let mut outputs = stream::select_all(outputs);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                next = outputs.next() => match next {
                    Some((id, Ok(frame))) => {
                        server.send_frame(id, frame.data).await;
                    }
                    Some((id, Err(e))) => {
                        tracing::debug!(stream = %id, error = %e, "Output failed");
                        return Err(e.into());
                    }
                    None => {
                        return Err(DeviceError::Communication("all outputs ended".into()).into());
                    }
                }
            }
        }
    }
}
