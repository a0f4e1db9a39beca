//! Token sampling strategies for the decode loop.
//!
//! After the logits pipeline runs, the sampler selects the next token from
//! the processed scores. Exactly one strategy executes per call, chosen by
//! priority:
//!
//! 1. `temperature == 0` — deterministic argmax (top_p/min_p ignored)
//! 2. `top_p` strictly inside (0, 1) — nucleus sampling at temperature
//! 3. `min_p != 0` — min-p sampling at temperature
//! 4. otherwise — plain temperature-scaled categorical sampling
//!
//! `min_tokens_to_keep` floors the nucleus and min-p filters: the highest-
//! probability tokens below that count are never excluded, whatever the
//! nominal threshold says.

use serde::Deserialize;

/// Sampling configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SamplingConfig {
    /// Temperature for score scaling. Zero means greedy argmax.
    #[serde(default)]
    pub temperature: f32,

    /// Nucleus threshold. Values outside (0, 1) disable nucleus sampling.
    #[serde(default = "default_top_p")]
    pub top_p: f32,

    /// Min-p threshold, scaled by the top token's probability. 0 disables.
    #[serde(default)]
    pub min_p: f32,

    /// Tokens the nucleus/min-p filters must always retain.
    #[serde(default = "default_min_tokens_to_keep")]
    pub min_tokens_to_keep: usize,
}

fn default_top_p() -> f32 {
    1.0
}
fn default_min_tokens_to_keep() -> usize {
    1
}

impl Default for SamplingConfig {
    fn default() -> Self {
        SamplingConfig {
            temperature: 0.0,
            top_p: default_top_p(),
            min_p: 0.0,
            min_tokens_to_keep: default_min_tokens_to_keep(),
        }
    }
}

impl SamplingConfig {
    /// Greedy decoding (temperature 0).
    pub fn greedy() -> Self {
        SamplingConfig::default()
    }
}

/// Deterministic RNG for reproducible sampling.
///
/// xorshift64; fast and good enough for inverse-CDF draws.
#[derive(Debug, Clone)]
pub struct SeededRng {
    state: u64,
}

impl SeededRng {
    pub fn new(seed: u64) -> Self {
        // Zero state would produce all zeros.
        SeededRng {
            state: if seed == 0 { 1 } else { seed },
        }
    }

    /// Next random float in [0, 1).
    pub fn next_f32(&mut self) -> f32 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        (self.state >> 40) as f32 / (1u64 << 24) as f32
    }
}

/// Samples tokens from processed scores under a [`SamplingConfig`].
#[derive(Debug, Clone)]
pub struct Sampler {
    config: SamplingConfig,
    rng: SeededRng,
}

impl Sampler {
    pub fn new(config: SamplingConfig, seed: u64) -> Self {
        Sampler {
            config,
            rng: SeededRng::new(seed),
        }
    }

    /// Select the next token id from `scores`.
    ///
    /// `scores` must be non-empty (the vocabulary is never empty).
    pub fn sample(&mut self, scores: &[f32]) -> u32 {
        debug_assert!(!scores.is_empty());
        if scores.is_empty() {
            return 0;
        }
        let c = &self.config;
        if c.temperature == 0.0 {
            argmax(scores)
        } else if c.top_p > 0.0 && c.top_p < 1.0 {
            self.top_p_sample(scores)
        } else if c.min_p != 0.0 {
            self.min_p_sample(scores)
        } else {
            self.categorical(scores)
        }
    }

    fn top_p_sample(&mut self, scores: &[f32]) -> u32 {
        let probs = softmax_t(scores, self.config.temperature);
        let order = sorted_desc(&probs);
        let sorted: Vec<f32> = order.iter().map(|&i| probs[i]).collect();
        let kept = nucleus_keep_count(&sorted, self.config.top_p, self.config.min_tokens_to_keep);
        self.draw_from_prefix(&order, &probs, kept)
    }

    fn min_p_sample(&mut self, scores: &[f32]) -> u32 {
        let probs = softmax_t(scores, self.config.temperature);
        let order = sorted_desc(&probs);
        let sorted: Vec<f32> = order.iter().map(|&i| probs[i]).collect();
        let kept = min_p_keep_count(&sorted, self.config.min_p, self.config.min_tokens_to_keep);
        self.draw_from_prefix(&order, &probs, kept)
    }

    fn categorical(&mut self, scores: &[f32]) -> u32 {
        let probs = softmax_t(scores, self.config.temperature);
        let r = self.rng.next_f32();
        let mut cumsum = 0.0;
        for (i, &p) in probs.iter().enumerate() {
            cumsum += p;
            if r < cumsum {
                return i as u32;
            }
        }
        last_nonzero(&probs)
    }

    /// Draw among the first `kept` entries of the descending order,
    /// renormalized over the retained mass.
    fn draw_from_prefix(&mut self, order: &[usize], probs: &[f32], kept: usize) -> u32 {
        let mass: f32 = order[..kept].iter().map(|&i| probs[i]).sum();
        let r = self.rng.next_f32() * mass;
        let mut cumsum = 0.0;
        for &i in &order[..kept] {
            cumsum += probs[i];
            if r < cumsum {
                return i as u32;
            }
        }
        order[kept - 1] as u32
    }
}

/// Log-probabilities over the full vocabulary via log-sum-exp.
///
/// Computed from the pipeline-output scores, independent of any filtering
/// the sampler applies afterwards.
pub fn log_softmax(scores: &[f32]) -> Vec<f32> {
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let sum: f32 = scores.iter().map(|&s| (s - max).exp()).sum();
    let lse = max + sum.ln();
    scores.iter().map(|&s| s - lse).collect()
}

fn argmax(scores: &[f32]) -> u32 {
    let mut best = 0;
    for (i, &s) in scores.iter().enumerate() {
        if s > scores[best] {
            best = i;
        }
    }
    best as u32
}

/// Probabilities of `scores / temperature`, max-shifted for stability.
fn softmax_t(scores: &[f32], temperature: f32) -> Vec<f32> {
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = scores
        .iter()
        .map(|&s| ((s - max) / temperature).exp())
        .collect();
    let sum: f32 = exps.iter().sum();
    if sum > 0.0 {
        exps.iter().map(|&e| e / sum).collect()
    } else {
        vec![1.0 / scores.len() as f32; scores.len()]
    }
}

/// Indices of `probs` sorted by descending probability.
fn sorted_desc(probs: &[f32]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..probs.len()).collect();
    order.sort_by(|&a, &b| {
        probs[b]
            .partial_cmp(&probs[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    order
}

fn last_nonzero(probs: &[f32]) -> u32 {
    for (i, &p) in probs.iter().enumerate().rev() {
        if p > 0.0 {
            return i as u32;
        }
    }
    0
}

/// Size of the nucleus: the smallest prefix of the descending distribution
/// whose mass reaches `top_p`, floored by `min_keep`.
fn nucleus_keep_count(sorted_probs: &[f32], top_p: f32, min_keep: usize) -> usize {
    let mut mass = 0.0;
    let mut kept = sorted_probs.len();
    for (rank, &p) in sorted_probs.iter().enumerate() {
        mass += p;
        if mass >= top_p {
            kept = rank + 1;
            break;
        }
    }
    kept.max(min_keep.max(1)).min(sorted_probs.len())
}

/// Tokens retained by min-p: probability at least `min_p` times the top
/// token's, floored by `min_keep`.
fn min_p_keep_count(sorted_probs: &[f32], min_p: f32, min_keep: usize) -> usize {
    let threshold = min_p * sorted_probs[0];
    let kept = sorted_probs.iter().take_while(|&&p| p >= threshold).count();
    kept.max(min_keep.max(1)).min(sorted_probs.len())
}
