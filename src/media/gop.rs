//! GOP (Group of Pictures) cache for late-joiner support
//!
//! When a new client attaches to a mount that is already streaming, it needs:
//! 1. The parameter sets (SPS/PPS)
//! 2. The most recent keyframe
//! 3. All access units since that keyframe
//!
//! This allows the decoder to start from the keyframe without waiting for the
//! next one.

use std::collections::VecDeque;

use bytes::Bytes;

use super::h264;

/// A cached access unit
#[derive(Debug, Clone)]
struct CachedUnit {
    data: Bytes,
    keyframe: bool,
}

/// GOP cache for late-joiner support
#[derive(Debug)]
pub struct GopCache {
    /// Maximum cache size in bytes
    max_size: usize,
    /// Current cache size in bytes
    current_size: usize,
    /// Latest SPS/PPS
    parameter_sets: Option<Bytes>,
    /// Access units since the last keyframe
    units: VecDeque<CachedUnit>,
    /// Whether the cache starts with a keyframe
    has_complete_gop: bool,
}

impl GopCache {
    /// Create a new cache with default max size (4MB)
    pub fn new() -> Self {
        Self::with_max_size(4 * 1024 * 1024)
    }

    /// Create a new cache with specified max size
    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            max_size,
            current_size: 0,
            parameter_sets: None,
            units: VecDeque::new(),
            has_complete_gop: false,
        }
    }

    /// Add an access unit
    ///
    /// A keyframe clears the cache first. Returns false if the unit alone is
    /// larger than the cache.
    pub fn push(&mut self, unit: Bytes) -> bool {
        let keyframe = h264::is_keyframe(&unit);
        if let Some(params) = h264::parameter_sets(&unit) {
            self.parameter_sets = Some(params);
        }

        if keyframe {
            self.clear_units();
            self.has_complete_gop = true;
        }

        let size = unit.len();
        while self.current_size + size > self.max_size && !self.units.is_empty() {
            if let Some(old) = self.units.pop_front() {
                self.current_size -= old.data.len();
                if old.keyframe {
                    // The GOP head is gone; late joiners must wait for the next keyframe
                    self.has_complete_gop = false;
                }
            }
        }

        if self.current_size + size > self.max_size {
            return false;
        }

        self.units.push_back(CachedUnit {
            data: unit,
            keyframe,
        });
        self.current_size += size;
        true
    }

    /// Clear cached access units (but keep parameter sets)
    fn clear_units(&mut self) {
        self.units.clear();
        self.current_size = 0;
        self.has_complete_gop = false;
    }

    /// Latest parameter sets
    pub fn parameter_sets(&self) -> Option<&Bytes> {
        self.parameter_sets.as_ref()
    }

    /// Check if we have a complete GOP
    pub fn has_complete_gop(&self) -> bool {
        self.has_complete_gop
    }

    /// Check if the cache can serve a late joiner
    pub fn is_ready(&self) -> bool {
        self.parameter_sets.is_some() && self.has_complete_gop
    }

    /// Get catch-up data for a late joiner
    ///
    /// Returns parameter sets followed by the cached GOP, or nothing if the
    /// cache cannot start a decoder yet.
    pub fn catchup(&self) -> Vec<Bytes> {
        if !self.is_ready() {
            return Vec::new();
        }

        let mut result = Vec::with_capacity(self.units.len() + 1);
        if let Some(params) = &self.parameter_sets {
            result.push(params.clone());
        }
        result.extend(self.units.iter().map(|u| u.data.clone()));
        result
    }

    /// Get the number of cached access units
    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    /// Get the current cache size in bytes
    pub fn size(&self) -> usize {
        self.current_size
    }
}

impl Default for GopCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyframe(size: usize) -> Bytes {
        let mut data = vec![0, 0, 0, 1, 0x67, 0x42, 0, 0, 0, 1, 0x68, 0xCE, 0, 0, 1, 0x65, 0x88];
        data.resize(size.max(data.len()), 0x11);
        Bytes::from(data)
    }

    fn inter(size: usize) -> Bytes {
        let mut data = vec![0, 0, 1, 0x41, 0x9A];
        data.resize(size.max(data.len()), 0x22);
        Bytes::from(data)
    }

    #[test]
    fn test_gop_cache_basic() {
        let mut cache = GopCache::new();
        assert!(!cache.is_ready());

        cache.push(keyframe(500));
        assert!(cache.is_ready());
        assert!(cache.parameter_sets().is_some());

        cache.push(inter(200));
        cache.push(inter(200));
        assert_eq!(cache.unit_count(), 3);
    }

    #[test]
    fn test_keyframe_clears() {
        let mut cache = GopCache::new();

        cache.push(keyframe(500));
        cache.push(inter(200));
        assert_eq!(cache.unit_count(), 2);

        cache.push(keyframe(500));
        assert_eq!(cache.unit_count(), 1);
    }

    #[test]
    fn test_not_ready_without_keyframe() {
        let mut cache = GopCache::new();

        cache.push(inter(100));
        cache.push(inter(100));

        assert!(!cache.has_complete_gop());
        assert!(cache.catchup().is_empty());
    }

    #[test]
    fn test_catchup_starts_with_parameter_sets() {
        let mut cache = GopCache::new();

        cache.push(keyframe(100));
        cache.push(inter(50));

        let catchup = cache.catchup();
        assert_eq!(catchup.len(), 3);
        assert_eq!(&catchup[0][..], &[0, 0, 0, 1, 0x67, 0x42, 0, 0, 0, 1, 0x68, 0xCE][..]);
        assert!(h264::is_keyframe(&catchup[1]));
    }

    #[test]
    fn test_size_limit_drops_gop_head() {
        let mut cache = GopCache::with_max_size(500);

        cache.push(keyframe(200));
        cache.push(inter(200));
        assert!(cache.push(inter(200)));

        assert!(cache.size() <= 500);
        assert!(!cache.has_complete_gop());

        // Single unit larger than the cache is rejected
        assert!(!cache.push(inter(600)));
    }

    #[test]
    fn test_clear() {
        let mut cache = GopCache::new();
        cache.push(keyframe(100));

        cache.clear_units();
        assert!(cache.parameter_sets().is_some());
        assert_eq!(cache.unit_count(), 0);
        assert_eq!(cache.size(), 0);
    }
}
