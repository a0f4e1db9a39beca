//! Per-layer recurrent state for autoregressive decoding.
//!
//! Each [`LayerCache`] holds the K and V state one model layer has produced
//! so far, one fixed-width row per cached position. The model's forward pass
//! appends to it; the decode loop only creates, validates, and hands it
//! around. Caches are either unbounded or capacity-bounded: a bounded cache
//! evicts its oldest position once full, except for a fixed number of
//! leading "sink" positions that are retained unconditionally.

use crate::error::{GenError, Result};

/// Leading positions a bounded cache never evicts.
pub const SINK_TOKENS: usize = 4;

/// K/V state for a single model layer.
///
/// Rows are stored flat: position `p` occupies
/// `keys[p * width .. (p + 1) * width]` and likewise in `values`.
/// `PartialEq` compares full contents, so two caches filled through
/// different chunkings of the same token sequence compare equal.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerCache {
    keys: Vec<f32>,
    values: Vec<f32>,
    width: usize,
    max_size: Option<usize>,
    keep: usize,
}

impl LayerCache {
    /// Create an unbounded cache with `width` floats per position.
    pub fn new(width: usize) -> Self {
        LayerCache {
            keys: Vec::new(),
            values: Vec::new(),
            width,
            max_size: None,
            keep: 0,
        }
    }

    /// Create a capacity-bounded cache retaining the first `keep` positions.
    pub fn bounded(width: usize, max_size: usize, keep: usize) -> Self {
        LayerCache {
            keys: Vec::new(),
            values: Vec::new(),
            width,
            max_size: Some(max_size),
            keep: keep.min(max_size),
        }
    }

    /// Append state rows for one or more positions.
    ///
    /// `k` and `v` must be equal-length multiples of the row width. On a
    /// bounded cache at capacity, the oldest position past the sink prefix
    /// is evicted per appended row.
    ///
    /// # Errors
    /// Returns [`GenError::ShapeMismatch`] on ragged or unequal input.
    pub fn append(&mut self, k: &[f32], v: &[f32]) -> Result<()> {
        if k.len() != v.len() || self.width == 0 || k.len() % self.width != 0 {
            return Err(GenError::ShapeMismatch {
                expected: self.width.max(1),
                got: if k.len() != v.len() { v.len() } else { k.len() },
            });
        }
        for row in 0..k.len() / self.width {
            let start = row * self.width;
            self.push_row(&k[start..start + self.width], &v[start..start + self.width]);
        }
        Ok(())
    }

    fn push_row(&mut self, k: &[f32], v: &[f32]) {
        if let Some(max) = self.max_size {
            if max == 0 {
                return;
            }
            if self.len() >= max {
                // Evict the oldest position after the sink prefix.
                let evict = self.keep.min(self.len() - 1);
                let range = evict * self.width..(evict + 1) * self.width;
                self.keys.drain(range.clone());
                self.values.drain(range);
            }
        }
        self.keys.extend_from_slice(k);
        self.values.extend_from_slice(v);
    }

    /// Number of positions currently cached.
    pub fn len(&self) -> usize {
        self.keys.len() / self.width.max(1)
    }

    /// Whether the cache holds no positions.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Floats per cached position.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Capacity bound, if any.
    pub fn max_size(&self) -> Option<usize> {
        self.max_size
    }

    /// All cached K state, row-major.
    pub fn keys(&self) -> &[f32] {
        &self.keys
    }

    /// All cached V state, row-major.
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Drop all cached positions, keeping the configuration.
    pub fn clear(&mut self) {
        self.keys.clear();
        self.values.clear();
    }

    /// Bytes currently held by K and V storage.
    pub fn memory_bytes(&self) -> usize {
        (self.keys.len() + self.values.len()) * std::mem::size_of::<f32>()
    }
}

/// Build one cache entry per model layer.
///
/// When `max_size` is given, every layer is bounded and retains
/// [`SINK_TOKENS`] leading positions under eviction.
pub fn make_cache<M: crate::model::Model + ?Sized>(
    model: &M,
    max_size: Option<usize>,
) -> Vec<LayerCache> {
    let width = model.state_width();
    (0..model.num_layers())
        .map(|_| match max_size {
            Some(max) => LayerCache::bounded(width, max, SINK_TOKENS),
            None => LayerCache::new(width),
        })
        .collect()
}

/// Check a cache against the model's layer count.
///
/// Called once per generation session before any forward pass.
pub fn validate_layers(cache: &[LayerCache], num_layers: usize) -> Result<()> {
    if cache.len() != num_layers {
        return Err(GenError::LayerCount {
            expected: num_layers,
            got: cache.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_grows_cache() {
        let mut cache = LayerCache::new(2);
        assert!(cache.is_empty());
        cache.append(&[1.0, 2.0], &[3.0, 4.0]).unwrap();
        cache.append(&[5.0, 6.0, 7.0, 8.0], &[5.0, 6.0, 7.0, 8.0]).unwrap();
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.keys(), &[1.0, 2.0, 5.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn append_rejects_ragged_rows() {
        let mut cache = LayerCache::new(2);
        let result = cache.append(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]);
        assert!(matches!(result, Err(GenError::ShapeMismatch { .. })));
    }

    #[test]
    fn append_rejects_unequal_kv() {
        let mut cache = LayerCache::new(1);
        let result = cache.append(&[1.0, 2.0], &[1.0]);
        assert!(matches!(result, Err(GenError::ShapeMismatch { .. })));
    }

    #[test]
    fn bounded_evicts_past_sinks() {
        let mut cache = LayerCache::bounded(1, 4, 2);
        for t in 0..6 {
            cache.append(&[t as f32], &[t as f32]).unwrap();
        }
        // Sinks 0 and 1 retained; oldest non-sink positions evicted.
        assert_eq!(cache.len(), 4);
        assert_eq!(cache.keys(), &[0.0, 1.0, 4.0, 5.0]);
    }

    #[test]
    fn unbounded_never_evicts() {
        let mut cache = LayerCache::new(1);
        for t in 0..100 {
            cache.append(&[t as f32], &[0.0]).unwrap();
        }
        assert_eq!(cache.len(), 100);
    }

    #[test]
    fn equal_contents_compare_equal() {
        let mut a = LayerCache::new(2);
        let mut b = LayerCache::new(2);
        a.append(&[1.0, 2.0, 3.0, 4.0], &[0.0; 4]).unwrap();
        b.append(&[1.0, 2.0], &[0.0, 0.0]).unwrap();
        b.append(&[3.0, 4.0], &[0.0, 0.0]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn validate_layers_mismatch() {
        let cache = vec![LayerCache::new(1), LayerCache::new(1)];
        let err = validate_layers(&cache, 4).unwrap_err();
        assert!(matches!(err, GenError::LayerCount { expected: 4, got: 2 }));
        assert!(validate_layers(&cache, 2).is_ok());
    }

    #[test]
    fn clear_keeps_configuration() {
        let mut cache = LayerCache::bounded(2, 8, 4);
        cache.append(&[1.0, 2.0], &[3.0, 4.0]).unwrap();
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.width(), 2);
        assert_eq!(cache.max_size(), Some(8));
    }
}
