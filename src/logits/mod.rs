//! Score transforms applied between the forward pass and the sampler.
//!
//! Processors run as an ordered chain over the last-position scores. The
//! built-in order is fixed: repetition penalty first, then the fixed logit
//! bias, then any caller-supplied stages, each consuming the previous
//! stage's output.

use crate::error::{GenError, Result};

/// A score transform: `(token history, scores) -> scores`.
///
/// `history` is every token the decode loop has consumed so far (prompt
/// remainder plus generated tokens), in order. Stages mutate `scores` in
/// place and may rescale or replace any entry.
pub trait LogitsProcessor: Send {
    fn process(&self, history: &[u32], scores: &mut [f32]);
}

/// Penalizes tokens that appear in the trailing context window.
///
/// For each distinct id among the last `context_size` history tokens,
/// a negative score is multiplied by the penalty and a non-negative score
/// divided by it, pushing recently used tokens away from being resampled.
#[derive(Debug, Clone)]
pub struct RepetitionPenalty {
    penalty: f32,
    context_size: usize,
}

impl RepetitionPenalty {
    /// # Errors
    /// Returns [`GenError::Config`] unless `penalty` is a finite
    /// non-negative number.
    pub fn new(penalty: f32, context_size: usize) -> Result<Self> {
        if !penalty.is_finite() || penalty < 0.0 {
            return Err(GenError::Config(format!(
                "repetition_penalty must be a non-negative number, got {penalty}"
            )));
        }
        Ok(RepetitionPenalty {
            penalty,
            context_size,
        })
    }
}

impl LogitsProcessor for RepetitionPenalty {
    fn process(&self, history: &[u32], scores: &mut [f32]) {
        let start = history.len().saturating_sub(self.context_size);
        let window = &history[start..];
        // Each distinct id is rescaled exactly once, from its original score.
        let mut seen: Vec<u32> = Vec::with_capacity(window.len());
        for &token in window {
            if seen.contains(&token) {
                continue;
            }
            seen.push(token);
            if let Some(score) = scores.get_mut(token as usize) {
                if *score < 0.0 {
                    *score *= self.penalty;
                } else {
                    *score /= self.penalty;
                }
            }
        }
    }
}

/// Adds a constant offset to scores at a fixed set of vocabulary ids.
///
/// Independent of history; applied once per step by construction.
#[derive(Debug, Clone)]
pub struct LogitBias {
    entries: Vec<(u32, f32)>,
}

impl LogitBias {
    /// Build a bias stage, validating every id against the vocabulary.
    ///
    /// # Errors
    /// Returns [`GenError::Config`] if any biased id is out of vocabulary.
    pub fn new(entries: impl IntoIterator<Item = (u32, f32)>, vocab_size: usize) -> Result<Self> {
        let mut entries: Vec<(u32, f32)> = entries.into_iter().collect();
        if let Some(&(id, _)) = entries.iter().find(|(id, _)| *id as usize >= vocab_size) {
            return Err(GenError::Config(format!(
                "logit_bias id {id} out of vocabulary (size {vocab_size})"
            )));
        }
        entries.sort_by_key(|&(id, _)| id);
        Ok(LogitBias { entries })
    }
}

impl LogitsProcessor for LogitBias {
    fn process(&self, _history: &[u32], scores: &mut [f32]) {
        for &(id, bias) in &self.entries {
            if let Some(score) = scores.get_mut(id as usize) {
                *score += bias;
            }
        }
    }
}
