//! Client sessions
//!
//! Every client attached to a mount is served by one pump task that copies
//! access units from the mount's fan-out into the client's response body. The
//! session table tracks those tasks; a periodic sweep reclaims the entries of
//! clients that have gone away.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, OwnedSemaphorePermit};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::mount::Subscription;
use crate::catalog::StreamId;
use crate::stats::ServerStats;

/// Body chunks sent to a client
pub type BodySender = mpsc::Sender<Result<Bytes, io::Error>>;

/// Public description of a session
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: u64,
    pub stream: StreamId,
    pub started_at: Instant,
}

struct SessionEntry {
    info: SessionInfo,
    handle: JoinHandle<()>,
}

/// Table of client sessions
pub struct SessionTable {
    sessions: Mutex<HashMap<u64, SessionEntry>>,
    next_id: AtomicU64,
}

impl SessionTable {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, SessionEntry>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Allocate a session id
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn insert(&self, info: SessionInfo, handle: JoinHandle<()>) {
        self.lock().insert(info.id, SessionEntry { info, handle });
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sessions currently tracked for a stream
    pub fn sessions_for(&self, stream: StreamId) -> Vec<SessionInfo> {
        self.lock()
            .values()
            .filter(|entry| entry.info.stream == stream)
            .map(|entry| entry.info.clone())
            .collect()
    }

    /// Drop entries whose client has disconnected
    pub fn sweep(&self) -> usize {
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|_, entry| !entry.handle.is_finished());
        before - sessions.len()
    }

    /// Stop every session
    pub fn abort_all(&self) -> usize {
        let mut sessions = self.lock();
        let count = sessions.len();
        for (_, entry) in sessions.drain() {
            entry.handle.abort();
        }
        count
    }

    /// Run the sweep every `interval` until cancelled
    pub fn spawn_sweeper(
        table: Arc<Self>,
        interval: Duration,
        stats: Arc<ServerStats>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let swept = table.sweep();
                        if swept > 0 {
                            stats.record_swept(swept);
                            tracing::debug!(swept = swept, remaining = table.len(), "Session sweep");
                        }
                    }
                }
            }
        })
    }
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Copy a mount's units into a client body
///
/// Starts with the catch-up GOP when one is available, otherwise waits for the
/// next keyframe. A client that falls behind the fan-out skips ahead to the
/// next keyframe.
pub async fn pump(
    id: u64,
    stream: StreamId,
    subscription: Subscription,
    body: BodySender,
    stats: Arc<ServerStats>,
    cancel: CancellationToken,
    _permit: Option<OwnedSemaphorePermit>,
) {
    let Subscription { catchup, mut rx } = subscription;
    let mut synced = !catchup.is_empty();

    tracing::debug!(session_id = id, stream = %stream, catchup = catchup.len(), "Session started");

    let mut delivered = true;
    for unit in catchup {
        if !send(&body, unit, &cancel).await {
            delivered = false;
            break;
        }
    }

    while delivered {
        let unit = tokio::select! {
            _ = cancel.cancelled() => break,
            received = rx.recv() => received,
        };

        match unit {
            Ok(unit) => {
                if !synced {
                    if !unit.keyframe {
                        continue;
                    }
                    synced = true;
                }
                delivered = send(&body, unit.data, &cancel).await;
            }
            Err(RecvError::Lagged(skipped)) => {
                synced = false;
                tracing::debug!(session_id = id, stream = %stream, skipped = skipped, "Client lagging, waiting for keyframe");
            }
            Err(RecvError::Closed) => break,
        }
    }

    stats.session_closed();
    tracing::debug!(session_id = id, stream = %stream, "Session ended");
}

async fn send(body: &BodySender, data: Bytes, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        sent = body.send(Ok(data)) => sent.is_ok(),
    }
}
