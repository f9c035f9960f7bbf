//! Mounted streams
//!
//! A mount binds one stream identity to its network path. The relay channel
//! is opened when the identity is mounted; the egress side is connected when
//! the first client arrives and then shared by every later client.

use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::config::ServerConfig;
use crate::catalog::StreamIdentity;
use crate::media::{h264, GopCache};
use crate::relay::{ChannelError, EgressReader, MediaProfile, RelayChannel, TransportFrame};

/// Access unit fanned out to clients
#[derive(Debug, Clone)]
pub struct MediaUnit {
    pub pts: u64,
    pub data: Bytes,
    pub keyframe: bool,
}

/// A client's view of a mount
pub struct Subscription {
    /// Parameter sets and current GOP, empty if no decodable start is cached
    pub catchup: Vec<Bytes>,
    /// Live units published after `catchup` was taken
    pub rx: broadcast::Receiver<MediaUnit>,
}

struct SharedMedia {
    tx: broadcast::Sender<MediaUnit>,
    gop: Option<Mutex<GopCache>>,
}

impl SharedMedia {
    fn lock_gop(&self) -> Option<MutexGuard<'_, GopCache>> {
        self.gop
            .as_ref()
            .map(|gop| gop.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }

    fn publish(&self, frame: TransportFrame) {
        let unit = MediaUnit {
            pts: frame.pts,
            keyframe: h264::is_keyframe(&frame.data),
            data: frame.data,
        };

        // Cache update and fan-out share one lock: a unit is either in a
        // subscriber's catch-up or on its receiver, never both.
        let mut gop = self.lock_gop();
        if let Some(gop) = gop.as_mut() {
            gop.push(unit.data.clone());
        }
        let _ = self.tx.send(unit);
    }

    fn subscribe(&self) -> Subscription {
        let gop = self.lock_gop();
        let rx = self.tx.subscribe();
        let catchup = gop.map(|gop| gop.catchup()).unwrap_or_default();
        Subscription { catchup, rx }
    }
}

/// One served stream
pub struct Mount {
    identity: StreamIdentity,
    channel: RelayChannel,
    media: Arc<SharedMedia>,
    egress: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Mount {
    /// Open the relay channel for `identity`
    pub fn open(identity: StreamIdentity, config: &ServerConfig) -> Result<Self, ChannelError> {
        let channel = RelayChannel::open(identity.clone(), config.channel.clone())?;
        let (tx, _) = broadcast::channel(config.subscriber_buffer.max(1));
        let gop = config
            .catchup_enabled
            .then(|| Mutex::new(GopCache::with_max_size(config.catchup_max_size)));

        Ok(Self {
            identity,
            channel,
            media: Arc::new(SharedMedia { tx, gop }),
            egress: tokio::sync::Mutex::new(None),
        })
    }

    pub fn identity(&self) -> &StreamIdentity {
        &self.identity
    }

    pub fn channel(&self) -> &RelayChannel {
        &self.channel
    }

    /// Media profile offered to clients
    pub fn profile(&self) -> MediaProfile {
        self.channel.serve_launch().profile
    }

    /// Number of attached clients
    pub fn subscribers(&self) -> usize {
        self.media.tx.receiver_count()
    }

    /// Whether the shared egress side is running
    pub async fn is_serving(&self) -> bool {
        self.egress
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Attach a client, starting the shared egress side on first use
    pub async fn subscribe(&self) -> Result<Subscription, ChannelError> {
        self.ensure_egress().await?;
        Ok(self.media.subscribe())
    }

    async fn ensure_egress(&self) -> Result<(), ChannelError> {
        let mut egress = self.egress.lock().await;
        if egress.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Ok(());
        }

        let reader = self.channel.connect_egress().await?;
        *egress = Some(tokio::spawn(run_shared_egress(
            reader,
            Arc::clone(&self.media),
        )));

        tracing::info!(
            stream = %self.identity.id,
            mount = %self.identity.mount_path(),
            profile = %self.profile(),
            "Shared egress started"
        );
        Ok(())
    }

    /// Close the relay channel and stop the egress side
    pub async fn close(&self) {
        self.channel.close().await;

        let egress = self.egress.lock().await.take();
        if let Some(handle) = egress {
            if let Err(e) = handle.await {
                tracing::warn!(stream = %self.identity.id, error = %e, "Egress worker failed");
            }
        }
    }
}

async fn run_shared_egress(reader: EgressReader, media: Arc<SharedMedia>) {
    while let Some(frame) = reader.recv().await {
        media.publish(frame);
    }
    tracing::debug!(stream = %reader.stream(), "Shared egress ended");
}
