//! The model collaborator trait and its score output type.
//!
//! The generation loop never computes a forward pass itself. It drives an
//! opaque [`Model`] that maps a batch of input tokens plus the per-layer
//! cache to a score matrix, mutating the cache as a side effect. Backends
//! with deferred execution (GPU graphs, lazy tensors) additionally implement
//! the evaluation primitives [`Model::synchronize`] and
//! [`Model::release_buffers`]; host-memory models can leave the defaults.

use crate::cache::LayerCache;
use crate::error::{GenError, Result};

/// Dense scores over `(position, vocabulary)` from one forward pass.
///
/// Stored row-major: `data[p * vocab_size + v]` is the score of vocabulary
/// id `v` at position `p`. The decode loop only ever consumes the last row;
/// earlier rows exist because a prefill or first-step call covers several
/// positions at once.
#[derive(Debug, Clone)]
pub struct Logits {
    data: Vec<f32>,
    vocab_size: usize,
}

impl Logits {
    /// Wrap a flat score buffer.
    ///
    /// # Errors
    /// Returns [`GenError::ShapeMismatch`] if the buffer length is not a
    /// positive multiple of `vocab_size`.
    pub fn new(data: Vec<f32>, vocab_size: usize) -> Result<Self> {
        if vocab_size == 0 || data.is_empty() || data.len() % vocab_size != 0 {
            return Err(GenError::ShapeMismatch {
                expected: vocab_size.max(1),
                got: data.len(),
            });
        }
        Ok(Logits { data, vocab_size })
    }

    /// Number of positions covered by this forward pass.
    pub fn positions(&self) -> usize {
        self.data.len() / self.vocab_size
    }

    /// Vocabulary size (score count per position).
    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    /// Scores at the last position.
    pub fn last_row(&self) -> &[f32] {
        &self.data[self.data.len() - self.vocab_size..]
    }

    /// Consume the matrix, keeping only the last position's scores.
    pub fn into_last(mut self) -> Vec<f32> {
        let start = self.data.len() - self.vocab_size;
        self.data.split_off(start)
    }
}

/// A causal sequence model driven by the generation loop.
///
/// `forward` must append state for every input token to every layer of the
/// supplied cache. The loop validates the cache's layer count against
/// [`Model::num_layers`] once per session, before any forward pass runs.
pub trait Model: Send + Sync {
    /// Number of layers; must match the cache's entry count.
    fn num_layers(&self) -> usize;

    /// Vocabulary size; the width of every score row.
    fn vocab_size(&self) -> usize;

    /// Floats of recurrent state per cached position (per K and per V).
    fn state_width(&self) -> usize;

    /// Run the forward pass over `tokens`, mutating `cache` in place.
    ///
    /// # Errors
    /// Device or resource failures propagate unchanged; the loop never
    /// retries them.
    fn forward(&self, tokens: &[u32], cache: &mut [LayerCache]) -> Result<Logits>;

    /// Force any pending computation on the cache to materialize now.
    ///
    /// Called after each prefill chunk so peak memory stays bounded by the
    /// chunk size. No-op for eagerly evaluated models.
    fn synchronize(&self, _cache: &[LayerCache]) -> Result<()> {
        Ok(())
    }

    /// Release transient compute buffers held by the backend.
    ///
    /// Called after each forced prefill synchronization.
    fn release_buffers(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logits_last_row() {
        let l = Logits::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 3).unwrap();
        assert_eq!(l.positions(), 2);
        assert_eq!(l.last_row(), &[4.0, 5.0, 6.0]);
        assert_eq!(l.into_last(), vec![4.0, 5.0, 6.0]);
    }

    #[test]
    fn logits_single_position() {
        let l = Logits::new(vec![0.5, 0.25], 2).unwrap();
        assert_eq!(l.positions(), 1);
        assert_eq!(l.last_row(), &[0.5, 0.25]);
    }

    #[test]
    fn logits_rejects_ragged_buffer() {
        assert!(Logits::new(vec![1.0, 2.0, 3.0], 2).is_err());
        assert!(Logits::new(vec![], 4).is_err());
        assert!(Logits::new(vec![1.0], 0).is_err());
    }
}
