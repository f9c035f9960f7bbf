//! Stream server
//!
//! Binds the network endpoint, owns the mounts and their relay channels, and
//! runs the session sweep.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::config::ServerConfig;
use super::http::{self, AppState};
use super::mount::Mount;
use super::session::SessionTable;
use crate::catalog::{StreamId, StreamIdentity};
use crate::error::Result;
use crate::relay::ChannelError;
use crate::stats::{ChannelStatsSnapshot, ServerStats, ServerStatsSnapshot};

/// How long shutdown waits for open responses to finish
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Network-facing server with one mount per active stream
pub struct StreamServer {
    state: AppState,
    local_addr: SocketAddr,
    cancel: CancellationToken,
    serve_task: Option<JoinHandle<()>>,
    sweep_task: Option<JoinHandle<()>>,
}

impl StreamServer {
    /// Bind the listener and start serving
    pub async fn start(config: ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;

        let limiter = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        let cancel = CancellationToken::new();
        let stats = Arc::new(ServerStats::new());
        let sessions = Arc::new(SessionTable::new());
        let sweep_interval = config.session_sweep_interval;

        let state = AppState {
            mounts: Arc::new(RwLock::new(HashMap::new())),
            sessions: Arc::clone(&sessions),
            stats: Arc::clone(&stats),
            limiter,
            config: Arc::new(config),
            cancel: cancel.clone(),
        };

        let app = http::router(state.clone());
        let shutdown = cancel.clone().cancelled_owned();
        let serve_task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::error!(error = %e, "Stream server failed");
            }
        });

        let sweep_task =
            SessionTable::spawn_sweeper(sessions, sweep_interval, stats, cancel.clone());

        tracing::info!(addr = %local_addr, "Stream server listening");

        Ok(Self {
            state,
            local_addr,
            cancel,
            serve_task: Some(serve_task),
            sweep_task: Some(sweep_task),
        })
    }

    /// Get the bound address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Open the relay channel of `identity` and serve it at its mount path
    pub async fn mount(&self, identity: StreamIdentity) -> std::result::Result<(), ChannelError> {
        let mut mounts = self.state.mounts.write().await;
        if mounts.contains_key(&identity.id) {
            tracing::warn!(stream = %identity.id, "Stream already mounted");
            return Ok(());
        }

        let mount = Mount::open(identity, &self.state.config)?;
        tracing::info!(
            stream = %mount.identity().id,
            mount = %mount.identity().mount_path(),
            "Mounted stream"
        );
        mounts.insert(mount.identity().id, Arc::new(mount));
        Ok(())
    }

    /// Forward a frame into the relay channel of `id`
    ///
    /// Frames that cannot be accepted are dropped with a warning. Returns
    /// whether the frame was accepted without loss.
    pub async fn send_frame(&self, id: StreamId, data: Bytes) -> bool {
        let mounts = self.state.mounts.read().await;
        let Some(mount) = mounts.get(&id) else {
            tracing::warn!(stream = %id, "Frame for unmounted stream dropped");
            return false;
        };

        match mount.channel().push(data) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    stream = %id,
                    kind = %e.kind(),
                    error = %e,
                    "Buffer may be full, frame dropped"
                );
                false
            }
        }
    }

    /// Streams currently mounted
    pub async fn mounted(&self) -> Vec<StreamId> {
        let mut ids: Vec<_> = self.state.mounts.read().await.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Counters of the relay channel of `id`
    pub async fn channel_stats(&self, id: StreamId) -> Option<ChannelStatsSnapshot> {
        self.state
            .mounts
            .read()
            .await
            .get(&id)
            .map(|mount| mount.channel().stats())
    }

    /// Server counters
    pub fn stats(&self) -> ServerStatsSnapshot {
        self.state.stats.snapshot()
    }

    /// Tracked client sessions
    pub fn session_count(&self) -> usize {
        self.state.sessions.len()
    }

    /// Stop serving, disconnect clients and close every relay channel
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        let aborted = self.state.sessions.abort_all();

        let mounts: Vec<_> = self
            .state
            .mounts
            .write()
            .await
            .drain()
            .map(|(_, mount)| mount)
            .collect();
        for mount in &mounts {
            mount.close().await;
        }

        if let Some(mut task) = self.serve_task.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                task.abort();
            }
        }
        if let Some(task) = self.sweep_task.take() {
            let _ = task.await;
        }

        let stats = self.state.stats.snapshot();
        tracing::info!(
            mounts = mounts.len(),
            sessions_aborted = aborted,
            accepted = stats.accepted,
            swept = stats.swept,
            "Stream server stopped"
        );
    }
}

impl Drop for StreamServer {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.state.sessions.abort_all();
        if let Some(task) = self.serve_task.take() {
            task.abort();
        }
    }
}
