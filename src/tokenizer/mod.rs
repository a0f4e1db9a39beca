//! Tokenizer integration and incremental detokenization.
//!
//! The generation loop talks to tokenizers through the [`Tokenizer`] trait:
//! encode a prompt, map a generated id back to its bytes, and expose the
//! end-of-sequence id. [`Detokenizer`] turns the per-token byte stream into
//! text fragments without ever splitting a multi-byte UTF-8 character
//! across fragments.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{GenError, Result};

/// Vocabulary access for the generation loop.
pub trait Tokenizer: Send + Sync {
    /// Encode text into token ids.
    fn encode(&self, text: &str) -> Vec<u32>;

    /// Raw bytes of a single token, or `None` for an unknown id.
    fn token_bytes(&self, token: u32) -> Option<&[u8]>;

    /// The id that terminates generation.
    fn eos_token_id(&self) -> u32;

    /// Vocabulary size.
    fn vocab_size(&self) -> usize;
}

/// Streams token bytes out as valid UTF-8 text fragments.
///
/// Token boundaries and character boundaries do not coincide: a token may
/// end mid-character. Bytes accumulate in a pending buffer and only the
/// longest valid UTF-8 prefix is flushed per push, so every fragment a
/// consumer sees is well-formed text.
#[derive(Debug, Default)]
pub struct Detokenizer {
    pending: Vec<u8>,
}

impl Detokenizer {
    pub fn new() -> Self {
        Detokenizer::default()
    }

    /// Add one token's bytes; returns the text newly flushable, if any.
    pub fn push(&mut self, bytes: &[u8]) -> Option<String> {
        self.pending.extend_from_slice(bytes);
        let valid = match std::str::from_utf8(&self.pending) {
            Ok(_) => self.pending.len(),
            Err(e) => e.valid_up_to(),
        };
        if valid == 0 {
            return None;
        }
        let rest = self.pending.split_off(valid);
        let flushed = std::mem::replace(&mut self.pending, rest);
        // `valid` came from the UTF-8 validator, so this cannot fail.
        Some(String::from_utf8(flushed).unwrap_or_default())
    }

    /// Drain whatever remains, replacing malformed trailing bytes.
    ///
    /// Called exactly once, at the end of a stream.
    pub fn finalize(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

#[derive(Deserialize)]
struct VocabFile {
    vocab: Vec<String>,
    eos_token_id: u32,
}

/// A plain-vocabulary tokenizer with greedy longest-match encoding.
///
/// Suited to small and test vocabularies; a subword tokenizer implements
/// [`Tokenizer`] directly for real models.
pub struct VocabTokenizer {
    vocab: Vec<Vec<u8>>,
    token_to_id: HashMap<Vec<u8>, u32>,
    eos_token_id: u32,
}

impl VocabTokenizer {
    /// Build from an ordered vocabulary; index is token id.
    ///
    /// # Errors
    /// Returns [`GenError::Tokenizer`] if `eos_token_id` is out of range.
    pub fn new(vocab: Vec<String>, eos_token_id: u32) -> Result<Self> {
        if eos_token_id as usize >= vocab.len() {
            return Err(GenError::Tokenizer(format!(
                "eos_token_id {eos_token_id} out of vocabulary (size {})",
                vocab.len()
            )));
        }
        let vocab: Vec<Vec<u8>> = vocab.into_iter().map(String::into_bytes).collect();
        let token_to_id = vocab
            .iter()
            .enumerate()
            .map(|(id, bytes)| (bytes.clone(), id as u32))
            .collect();
        Ok(VocabTokenizer {
            vocab,
            token_to_id,
            eos_token_id,
        })
    }

    /// Load from a JSON file with `vocab` and `eos_token_id` fields.
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let file: VocabFile = serde_json::from_str(&data)?;
        VocabTokenizer::new(file.vocab, file.eos_token_id)
    }
}

impl Tokenizer for VocabTokenizer {
    fn encode(&self, text: &str) -> Vec<u32> {
        let bytes = text.as_bytes();
        let mut tokens = Vec::new();
        let mut pos = 0;
        while pos < bytes.len() {
            // Longest vocabulary entry matching at this offset.
            let mut best: Option<(usize, u32)> = None;
            for (candidate, &id) in &self.token_to_id {
                if bytes[pos..].starts_with(candidate) {
                    let longer = best.map_or(true, |(len, _)| candidate.len() > len);
                    if longer && !candidate.is_empty() {
                        best = Some((candidate.len(), id));
                    }
                }
            }
            match best {
                Some((len, id)) => {
                    tokens.push(id);
                    pos += len;
                }
                // No entry covers this byte; skip it.
                None => pos += 1,
            }
        }
        tokens
    }

    fn token_bytes(&self, token: u32) -> Option<&[u8]> {
        self.vocab.get(token as usize).map(Vec::as_slice)
    }

    fn eos_token_id(&self) -> u32 {
        self.eos_token_id
    }

    fn vocab_size(&self) -> usize {
        self.vocab.len()
    }
}
