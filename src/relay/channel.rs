//! Relay channel implementation

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use tokio::io::AsyncWriteExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};

use super::buffer::{Leak, LeakyQueue, PushOutcome};
use super::config::ChannelConfig;
use super::launch::{IngestLaunch, ServeLaunch};
use super::transport::{remove_endpoint, FrameReader, PtsClock, TransportFrame};
use super::ChannelError;
use crate::catalog::{StreamId, StreamIdentity};
use crate::stats::{ChannelStats, ChannelStatsSnapshot};

/// One-way frame transport for a single stream
///
/// Owns its transport endpoint for its whole lifetime. The endpoint is
/// removed on [`close`](Self::close) and again on drop if close was skipped.
pub struct RelayChannel {
    identity: StreamIdentity,
    config: ChannelConfig,
    ingress: Arc<LeakyQueue<TransportFrame>>,
    clock: PtsClock,
    live: AtomicBool,
    stats: Arc<ChannelStats>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
    endpoint_removed: AtomicBool,
    ingest: IngestLaunch,
    serve: ServeLaunch,
}

impl RelayChannel {
    /// Open the channel for `identity`
    ///
    /// Removes a stale endpoint, binds a fresh one and starts the ingress
    /// worker. Must be called from within a Tokio runtime.
    pub fn open(identity: StreamIdentity, config: ChannelConfig) -> Result<Self, ChannelError> {
        let ingest = IngestLaunch::new(&identity, &config)?;
        let serve = ServeLaunch::new(&identity, &config)?;

        let path = &identity.transport_address;
        if remove_endpoint(path)? {
            tracing::debug!(stream = %identity.id, endpoint = %path.display(), "Removed stale endpoint");
        }
        let listener = UnixListener::bind(path)?;

        let ingress = Arc::new(LeakyQueue::new(config.ingress_depth, Leak::DropOldest));
        let stats = Arc::new(ChannelStats::new());
        let cancel = CancellationToken::new();

        let worker = tokio::spawn(run_ingress(
            identity.id,
            listener,
            Arc::clone(&ingress),
            Arc::clone(&stats),
            cancel.clone(),
        ));

        tracing::info!(
            stream = %identity.id,
            endpoint = %path.display(),
            "Relay channel open"
        );
        tracing::debug!(stream = %identity.id, launch = %ingest.render(), "Ingest description");
        tracing::debug!(stream = %identity.id, launch = %serve.render(), "Serve description");

        Ok(Self {
            identity,
            config,
            ingress,
            clock: PtsClock::new(),
            live: AtomicBool::new(true),
            stats,
            cancel,
            worker: Mutex::new(Some(worker)),
            endpoint_removed: AtomicBool::new(false),
            ingest,
            serve,
        })
    }

    pub fn identity(&self) -> &StreamIdentity {
        &self.identity
    }

    pub fn id(&self) -> StreamId {
        self.identity.id
    }

    /// Whether the last push was accepted without loss
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> ChannelStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn ingest_launch(&self) -> &IngestLaunch {
        &self.ingest
    }

    pub fn serve_launch(&self) -> &ServeLaunch {
        &self.serve
    }

    /// Push one frame into the ingress side
    ///
    /// Never blocks. The frame is stamped with its arrival time. If the
    /// ingress queue is full the oldest queued frame is discarded and
    /// [`ChannelError::Backpressure`] is returned; the pushed frame is kept.
    pub fn push(&self, data: Bytes) -> Result<(), ChannelError> {
        if self.cancel.is_cancelled() {
            self.live.store(false, Ordering::Relaxed);
            return Err(ChannelError::Closed(self.identity.id));
        }
        if data.len() > self.config.max_frame_size {
            self.live.store(false, Ordering::Relaxed);
            return Err(ChannelError::FrameTooLarge {
                size: data.len(),
                limit: self.config.max_frame_size,
            });
        }

        let size = data.len();
        let frame = TransportFrame::new(self.clock.stamp(), data);
        match self.ingress.push(frame) {
            PushOutcome::Queued => {
                self.stats.record_push(size);
                self.live.store(true, Ordering::Relaxed);
                Ok(())
            }
            PushOutcome::Dropped(_) => {
                self.stats.record_push(size);
                self.stats.record_ingress_drop();
                self.live.store(false, Ordering::Relaxed);
                Err(ChannelError::Backpressure {
                    stream: self.identity.id,
                    dropped: 1,
                })
            }
            PushOutcome::Closed(_) => {
                self.live.store(false, Ordering::Relaxed);
                Err(ChannelError::Closed(self.identity.id))
            }
        }
    }

    /// Connect a reader to the transport endpoint
    ///
    /// Frames read from the endpoint are buffered in an egress queue that
    /// discards new arrivals while full. Dropping the reader disconnects it.
    pub async fn connect_egress(&self) -> Result<EgressReader, ChannelError> {
        if self.cancel.is_cancelled() {
            return Err(ChannelError::Closed(self.identity.id));
        }

        let stream = UnixStream::connect(&self.identity.transport_address).await?;
        let queue = Arc::new(LeakyQueue::new(self.config.egress_depth, Leak::DropNewest));
        let cancel = self.cancel.child_token();

        tokio::spawn(run_egress(
            self.identity.id,
            FrameReader::with_max_size(stream, self.config.max_frame_size),
            Arc::clone(&queue),
            Arc::clone(&self.stats),
            cancel.clone(),
        ));

        tracing::debug!(stream = %self.identity.id, "Egress connected");

        Ok(EgressReader {
            stream: self.identity.id,
            queue,
            _guard: cancel.drop_guard(),
        })
    }

    /// Stop both sides and remove the endpoint
    pub async fn close(&self) {
        self.cancel.cancel();
        self.ingress.close();

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::warn!(stream = %self.identity.id, error = %e, "Ingress worker failed");
            }
        }

        self.remove_endpoint();

        let stats = self.stats.snapshot();
        tracing::info!(
            stream = %self.identity.id,
            pushed = stats.pushed,
            forwarded = stats.forwarded,
            ingress_dropped = stats.ingress_dropped,
            egress_dropped = stats.egress_dropped,
            "Relay channel closed"
        );
    }

    fn remove_endpoint(&self) {
        if self.endpoint_removed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = remove_endpoint(&self.identity.transport_address) {
            tracing::warn!(
                stream = %self.identity.id,
                endpoint = %self.identity.transport_address.display(),
                error = %e,
                "Failed to remove transport endpoint"
            );
        }
    }
}

impl Drop for RelayChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.ingress.close();
        self.remove_endpoint();
    }
}

/// Network-side reader of a relay channel
pub struct EgressReader {
    stream: StreamId,
    queue: Arc<LeakyQueue<TransportFrame>>,
    _guard: DropGuard,
}

impl EgressReader {
    pub fn stream(&self) -> StreamId {
        self.stream
    }

    /// Next frame; `None` once the channel is gone and the queue drained
    pub async fn recv(&self) -> Option<TransportFrame> {
        self.queue.pop().await
    }

    /// Frames currently buffered
    pub fn buffered(&self) -> usize {
        self.queue.len()
    }
}

async fn run_ingress(
    stream: StreamId,
    listener: UnixListener,
    queue: Arc<LeakyQueue<TransportFrame>>,
    stats: Arc<ChannelStats>,
    cancel: CancellationToken,
) {
    let mut readers: Vec<UnixStream> = Vec::new();
    let mut buf = BytesMut::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((reader, _)) => {
                    readers.push(reader);
                    tracing::debug!(stream = %stream, readers = readers.len(), "Transport reader attached");
                }
                Err(e) => {
                    tracing::warn!(stream = %stream, error = %e, "Transport accept failed");
                }
            },
            frame = queue.pop() => {
                let Some(frame) = frame else { break };

                buf.clear();
                frame.encode(&mut buf);

                let mut attached = Vec::with_capacity(readers.len());
                for mut reader in readers.drain(..) {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        written = reader.write_all(&buf) => match written {
                            Ok(()) => attached.push(reader),
                            Err(e) => {
                                tracing::debug!(stream = %stream, error = %e, "Transport reader detached");
                            }
                        }
                    }
                }
                if !attached.is_empty() {
                    stats.record_forwarded();
                }
                readers = attached;
            }
        }
    }
}

async fn run_egress(
    stream: StreamId,
    mut reader: FrameReader<UnixStream>,
    queue: Arc<LeakyQueue<TransportFrame>>,
    stats: Arc<ChannelStats>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            next = reader.next_frame() => match next {
                Ok(Some(frame)) => {
                    let outcome = queue.push(frame);
                    stats.record_egress(!outcome.is_queued());
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(stream = %stream, error = %e, "Egress read failed");
                    break;
                }
            }
        }
    }
    queue.close();
}
