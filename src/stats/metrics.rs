//! Statistics for relay channels and the stream server

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Live counters of one relay channel
///
/// Updated from the push path and the transport workers without locking.
#[derive(Debug)]
pub struct ChannelStats {
    started_at: Instant,
    pushed: AtomicU64,
    bytes_pushed: AtomicU64,
    ingress_dropped: AtomicU64,
    forwarded: AtomicU64,
    egress_received: AtomicU64,
    egress_dropped: AtomicU64,
}

impl ChannelStats {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            pushed: AtomicU64::new(0),
            bytes_pushed: AtomicU64::new(0),
            ingress_dropped: AtomicU64::new(0),
            forwarded: AtomicU64::new(0),
            egress_received: AtomicU64::new(0),
            egress_dropped: AtomicU64::new(0),
        }
    }

    pub fn record_push(&self, bytes: usize) {
        self.pushed.fetch_add(1, Ordering::Relaxed);
        self.bytes_pushed.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_ingress_drop(&self) {
        self.ingress_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forwarded(&self) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_egress(&self, dropped: bool) {
        self.egress_received.fetch_add(1, Ordering::Relaxed);
        if dropped {
            self.egress_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Point-in-time copy of the counters
    pub fn snapshot(&self) -> ChannelStatsSnapshot {
        ChannelStatsSnapshot {
            uptime: self.started_at.elapsed(),
            pushed: self.pushed.load(Ordering::Relaxed),
            bytes_pushed: self.bytes_pushed.load(Ordering::Relaxed),
            ingress_dropped: self.ingress_dropped.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            egress_received: self.egress_received.load(Ordering::Relaxed),
            egress_dropped: self.egress_dropped.load(Ordering::Relaxed),
        }
    }
}

impl Default for ChannelStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Copy of [`ChannelStats`] at one instant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStatsSnapshot {
    pub uptime: Duration,
    /// Frames accepted by push
    pub pushed: u64,
    pub bytes_pushed: u64,
    /// Frames evicted from the ingress queue
    pub ingress_dropped: u64,
    /// Frames written to the transport
    pub forwarded: u64,
    /// Frames read back on the egress side
    pub egress_received: u64,
    /// Frames refused by a full egress queue
    pub egress_dropped: u64,
}

impl ChannelStatsSnapshot {
    /// Average ingest bitrate in bits per second
    pub fn bitrate(&self) -> u64 {
        let secs = self.uptime.as_secs();
        if secs > 0 {
            (self.bytes_pushed * 8) / secs
        } else {
            0
        }
    }

    /// Fraction of pushed frames lost on either side
    pub fn loss_ratio(&self) -> f64 {
        if self.pushed == 0 {
            return 0.0;
        }
        (self.ingress_dropped + self.egress_dropped) as f64 / self.pushed as f64
    }
}

/// Counters of the stream server
#[derive(Debug, Default)]
pub struct ServerStats {
    accepted: AtomicU64,
    rejected: AtomicU64,
    active: AtomicU64,
    swept: AtomicU64,
}

impl ServerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_accept(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reject(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_opened(&self) {
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_closed(&self) {
        let _ = self
            .active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn record_swept(&self, count: usize) {
        self.swept.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ServerStatsSnapshot {
        ServerStatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
            swept: self.swept.load(Ordering::Relaxed),
        }
    }
}

/// Copy of [`ServerStats`] at one instant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStatsSnapshot {
    pub accepted: u64,
    /// Connections refused at the connection limit
    pub rejected: u64,
    pub active: u64,
    /// Sessions reclaimed by the sweep
    pub swept: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_counters() {
        let stats = ChannelStats::new();
        stats.record_push(100);
        stats.record_push(50);
        stats.record_ingress_drop();
        stats.record_forwarded();
        stats.record_egress(false);
        stats.record_egress(true);

        let snap = stats.snapshot();
        assert_eq!(snap.pushed, 2);
        assert_eq!(snap.bytes_pushed, 150);
        assert_eq!(snap.ingress_dropped, 1);
        assert_eq!(snap.forwarded, 1);
        assert_eq!(snap.egress_received, 2);
        assert_eq!(snap.egress_dropped, 1);
    }

    #[test]
    fn test_loss_ratio() {
        let snap = ChannelStatsSnapshot {
            pushed: 10,
            ingress_dropped: 1,
            egress_dropped: 1,
            ..Default::default()
        };
        assert!((snap.loss_ratio() - 0.2).abs() < f64::EPSILON);
        assert_eq!(ChannelStatsSnapshot::default().loss_ratio(), 0.0);
    }

    #[test]
    fn test_bitrate() {
        let snap = ChannelStatsSnapshot {
            uptime: Duration::from_secs(2),
            bytes_pushed: 1000,
            ..Default::default()
        };
        assert_eq!(snap.bitrate(), 4000);
    }

    #[test]
    fn test_server_active_never_underflows() {
        let stats = ServerStats::new();
        stats.session_opened();
        stats.session_closed();
        stats.session_closed();

        assert_eq!(stats.snapshot().active, 0);
    }

    #[test]
    fn test_server_counters() {
        let stats = ServerStats::new();
        stats.record_accept();
        stats.record_accept();
        stats.record_reject();
        stats.session_opened();
        stats.record_swept(3);

        let snap = stats.snapshot();
        assert_eq!(snap.accepted, 2);
        assert_eq!(snap.rejected, 1);
        assert_eq!(snap.active, 1);
        assert_eq!(snap.swept, 3);
    }
}
