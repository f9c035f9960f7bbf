//! Local transport framing
//!
//! Frames cross the Unix domain socket of a relay channel as:
//!
//! ```text
//! +----------------+--------------+-------------------+
//! | pts (u64 BE)   | len (u32 BE) | payload (len)     |
//! | microseconds   |              | Annex-B access    |
//! |                |              | unit              |
//! +----------------+--------------+-------------------+
//! ```
//!
//! The pts counts microseconds since the channel opened and is strictly
//! increasing per channel.

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::ChannelError;

/// Size of the frame header on the wire
pub const HEADER_LEN: usize = 12;

/// Largest payload accepted on the transport
pub const MAX_FRAME_SIZE: usize = 8 * 1024 * 1024;

/// A timestamped frame on the local transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportFrame {
    /// Presentation timestamp in microseconds
    pub pts: u64,
    pub data: Bytes,
}

impl TransportFrame {
    pub fn new(pts: u64, data: Bytes) -> Self {
        Self { pts, data }
    }

    /// Size on the wire
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.data.len()
    }

    /// Append the encoded frame to `buf`
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(self.encoded_len());
        buf.put_u64(self.pts);
        buf.put_u32(self.data.len() as u32);
        buf.put_slice(&self.data);
    }

    /// Decode one frame from the front of `buf`
    ///
    /// Returns `Ok(None)` when more bytes are needed; consumed bytes are
    /// removed from `buf`.
    pub fn decode(buf: &mut BytesMut, max_size: usize) -> Result<Option<Self>, ChannelError> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let len = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]) as usize;
        if len > max_size {
            return Err(ChannelError::FrameTooLarge {
                size: len,
                limit: max_size,
            });
        }
        if buf.len() < HEADER_LEN + len {
            buf.reserve(HEADER_LEN + len - buf.len());
            return Ok(None);
        }

        let pts = buf.get_u64();
        buf.advance(4);
        let data = buf.split_to(len).freeze();
        Ok(Some(Self { pts, data }))
    }
}

/// Incremental frame reader over a transport stream
pub struct FrameReader<R> {
    reader: R,
    buf: BytesMut,
    max_size: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_max_size(reader, MAX_FRAME_SIZE)
    }

    pub fn with_max_size(reader: R, max_size: usize) -> Self {
        Self {
            reader,
            buf: BytesMut::with_capacity(64 * 1024),
            max_size,
        }
    }

    /// Read the next frame; `Ok(None)` on clean end of stream
    pub async fn next_frame(&mut self) -> Result<Option<TransportFrame>, ChannelError> {
        loop {
            if let Some(frame) = TransportFrame::decode(&mut self.buf, self.max_size)? {
                return Ok(Some(frame));
            }

            if self.reader.read_buf(&mut self.buf).await? == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(ChannelError::Transport(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "transport closed mid-frame",
                )));
            }
        }
    }
}

/// Presentation clock stamping frames at arrival
///
/// Stamps are microseconds since the clock was created, bumped by one when two
/// arrivals fall in the same microsecond.
#[derive(Debug)]
pub struct PtsClock {
    origin: Instant,
    last: AtomicU64,
}

impl PtsClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last: AtomicU64::new(0),
        }
    }

    /// Stamp an arrival
    pub fn stamp(&self) -> u64 {
        let now = self.origin.elapsed().as_micros() as u64;
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let next = now.max(last + 1);
            match self
                .last
                .compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }
}

impl Default for PtsClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Remove a transport endpoint if present
///
/// Returns whether something was removed.
pub fn remove_endpoint(path: &Path) -> io::Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn test_encode_layout() {
        let frame = TransportFrame::new(0x0102, Bytes::from_static(&[0xAA, 0xBB]));
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);

        assert_eq!(
            &buf[..],
            &[0, 0, 0, 0, 0, 0, 0x01, 0x02, 0, 0, 0, 2, 0xAA, 0xBB]
        );
    }

    #[test]
    fn test_decode_partial_then_complete() {
        let frame = TransportFrame::new(77, Bytes::from_static(b"access-unit"));
        let mut encoded = BytesMut::new();
        frame.encode(&mut encoded);

        let mut buf = BytesMut::from(&encoded[..5]);
        assert_eq!(TransportFrame::decode(&mut buf, MAX_FRAME_SIZE).unwrap(), None);

        buf.extend_from_slice(&encoded[5..]);
        let decoded = TransportFrame::decode(&mut buf, MAX_FRAME_SIZE).unwrap();
        assert_eq!(decoded, Some(frame));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_rejects_oversized() {
        let mut buf = BytesMut::new();
        buf.put_u64(1);
        buf.put_u32(1024);

        let err = TransportFrame::decode(&mut buf, 512).unwrap_err();
        assert!(matches!(
            err,
            ChannelError::FrameTooLarge { size: 1024, limit: 512 }
        ));
    }

    #[test]
    fn test_pts_strictly_increasing() {
        let clock = PtsClock::new();
        let mut last = 0;
        for _ in 0..1000 {
            let pts = clock.stamp();
            assert!(pts > last);
            last = pts;
        }
    }

    #[test]
    fn test_remove_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("socketrgb");

        assert!(!remove_endpoint(&path).unwrap());
        std::fs::write(&path, b"").unwrap();
        assert!(remove_endpoint(&path).unwrap());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_reader_over_stream() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let frames = vec![
            TransportFrame::new(1, Bytes::from_static(b"first")),
            TransportFrame::new(2, Bytes::from(vec![7u8; 200])),
        ];

        let writer = {
            let frames = frames.clone();
            tokio::spawn(async move {
                let mut buf = BytesMut::new();
                for frame in &frames {
                    buf.clear();
                    frame.encode(&mut buf);
                    tx.write_all(&buf).await.unwrap();
                }
            })
        };

        let mut reader = FrameReader::new(rx);
        assert_eq!(reader.next_frame().await.unwrap().as_ref(), Some(&frames[0]));
        assert_eq!(reader.next_frame().await.unwrap().as_ref(), Some(&frames[1]));
        writer.await.unwrap();
        assert_eq!(reader.next_frame().await.unwrap(), None);
    }
}
