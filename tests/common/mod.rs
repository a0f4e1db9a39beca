//! Deterministic fakes shared by the integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};

use genstream::cache::LayerCache;
use genstream::error::Result;
use genstream::model::{Logits, Model};
use genstream::tokenizer::Tokenizer;

/// Model whose top-scored id is `max id seen in the cache + 1`.
///
/// Scores depend only on the accumulated cache state, so any chunking of
/// the same prompt must produce the same output distribution.
pub struct MaxTrackModel {
    pub layers: usize,
    pub vocab: usize,
    pub forward_calls: AtomicUsize,
    pub sync_calls: AtomicUsize,
}

impl MaxTrackModel {
    pub fn new(layers: usize, vocab: usize) -> Self {
        MaxTrackModel {
            layers,
            vocab,
            forward_calls: AtomicUsize::new(0),
            sync_calls: AtomicUsize::new(0),
        }
    }
}

impl Model for MaxTrackModel {
    fn num_layers(&self) -> usize {
        self.layers
    }

    fn vocab_size(&self) -> usize {
        self.vocab
    }

    fn state_width(&self) -> usize {
        1
    }

    fn forward(&self, tokens: &[u32], cache: &mut [LayerCache]) -> Result<Logits> {
        self.forward_calls.fetch_add(1, Ordering::SeqCst);
        let mut data = Vec::with_capacity(tokens.len() * self.vocab);
        for &t in tokens {
            for layer in cache.iter_mut() {
                layer.append(&[t as f32], &[t as f32])?;
            }
            let max_seen = cache[0].keys().iter().copied().fold(0.0, f32::max) as usize;
            let top = (max_seen + 1).min(self.vocab - 1);
            let mut row = vec![0.0f32; self.vocab];
            row[top] = 10.0;
            data.extend(row);
        }
        Logits::new(data, self.vocab)
    }

    fn synchronize(&self, _cache: &[LayerCache]) -> Result<()> {
        self.sync_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Model that emits a fixed token script after the prompt, using the cache
/// length to know which step it is on.
pub struct ScriptedModel {
    pub layers: usize,
    pub vocab: usize,
    pub prompt_len: usize,
    pub script: Vec<u32>,
}

impl Model for ScriptedModel {
    fn num_layers(&self) -> usize {
        self.layers
    }

    fn vocab_size(&self) -> usize {
        self.vocab
    }

    fn state_width(&self) -> usize {
        1
    }

    fn forward(&self, tokens: &[u32], cache: &mut [LayerCache]) -> Result<Logits> {
        let mut data = Vec::with_capacity(tokens.len() * self.vocab);
        for &t in tokens {
            for layer in cache.iter_mut() {
                layer.append(&[t as f32], &[t as f32])?;
            }
            // Steps past the prompt index into the script.
            let step = cache[0].len().saturating_sub(self.prompt_len);
            let idx = step.min(self.script.len() - 1);
            let mut row = vec![0.0f32; self.vocab];
            row[self.script[idx] as usize] = 10.0;
            data.extend(row);
        }
        Logits::new(data, self.vocab)
    }
}

/// Model with the same constant score row every step.
pub struct ConstModel {
    pub layers: usize,
    pub scores: Vec<f32>,
}

impl Model for ConstModel {
    fn num_layers(&self) -> usize {
        self.layers
    }

    fn vocab_size(&self) -> usize {
        self.scores.len()
    }

    fn state_width(&self) -> usize {
        1
    }

    fn forward(&self, tokens: &[u32], cache: &mut [LayerCache]) -> Result<Logits> {
        let mut data = Vec::with_capacity(tokens.len() * self.scores.len());
        for &t in tokens {
            for layer in cache.iter_mut() {
                layer.append(&[t as f32], &[t as f32])?;
            }
            data.extend(&self.scores);
        }
        Logits::new(data, self.scores.len())
    }
}

/// Tokenizer over raw byte vocab entries, so tests can exercise tokens
/// that end mid-character.
pub struct ByteTokenizer {
    pub vocab: Vec<Vec<u8>>,
    pub eos: u32,
}

impl Tokenizer for ByteTokenizer {
    fn encode(&self, text: &str) -> Vec<u32> {
        // Greedy longest match is enough for test prompts.
        let bytes = text.as_bytes();
        let mut out = Vec::new();
        let mut pos = 0;
        while pos < bytes.len() {
            let mut best: Option<(usize, u32)> = None;
            for (id, tok) in self.vocab.iter().enumerate() {
                if !tok.is_empty()
                    && bytes[pos..].starts_with(tok)
                    && best.map_or(true, |(len, _)| tok.len() > len)
                {
                    best = Some((tok.len(), id as u32));
                }
            }
            match best {
                Some((len, id)) => {
                    out.push(id);
                    pos += len;
                }
                None => pos += 1,
            }
        }
        out
    }

    fn token_bytes(&self, token: u32) -> Option<&[u8]> {
        self.vocab.get(token as usize).map(Vec::as_slice)
    }

    fn eos_token_id(&self) -> u32 {
        self.eos
    }

    fn vocab_size(&self) -> usize {
        self.vocab.len()
    }
}

/// Vocab `["t0", "t1", ...]` with the last id as EOS.
pub fn labeled_tokenizer(vocab_size: usize) -> ByteTokenizer {
    let vocab = (0..vocab_size)
        .map(|i| format!("t{i} ").into_bytes())
        .collect();
    ByteTokenizer {
        vocab,
        eos: vocab_size as u32 - 1,
    }
}
