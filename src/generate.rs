//! Text-level streaming on top of the token stream.
//!
//! [`TextStream`] bounds the unbounded decode loop with a max-token cutoff
//! and end-of-sequence detection, and turns token bytes into UTF-8 text
//! fragments incrementally. Whatever bytes remain buffered when the stream
//! ends are flushed exactly once, whether termination came from the cutoff
//! or from EOS.

use std::sync::Arc;
use std::time::Instant;

use crate::engine::{GenerateParams, TokenStream};
use crate::error::{GenError, Result};
use crate::model::Model;
use crate::tokenizer::{Detokenizer, Tokenizer};

/// One streamed step: the text that became flushable, plus the token that
/// produced it. `token` is `None` only for the final buffered flush.
#[derive(Debug, Clone)]
pub struct TextChunk {
    pub text: String,
    pub token: Option<u32>,
    pub logprob: f32,
}

/// Bounded, detokenized generation stream.
pub struct TextStream {
    // Dropped at termination so the decode worker stops promptly.
    inner: Option<TokenStream>,
    tokenizer: Arc<dyn Tokenizer>,
    detok: Detokenizer,
    eos: u32,
    max_tokens: usize,
    emitted: usize,
    prompt_tokens: usize,
    finalized: bool,
}

impl TextStream {
    pub fn new(
        model: Arc<dyn Model>,
        tokenizer: Arc<dyn Tokenizer>,
        prompt: &[u32],
        max_tokens: usize,
        params: GenerateParams,
    ) -> Result<Self> {
        let inner = TokenStream::builder(model).params(params).start(prompt)?;
        let eos = tokenizer.eos_token_id();
        Ok(TextStream {
            inner: Some(inner),
            tokenizer,
            detok: Detokenizer::new(),
            eos,
            max_tokens,
            emitted: 0,
            prompt_tokens: prompt.len(),
            finalized: false,
        })
    }

    /// Wrap an already-started token stream, for sessions that configured
    /// it directly (pre-warmed cache, caller pipeline stages).
    pub fn from_token_stream(
        inner: TokenStream,
        tokenizer: Arc<dyn Tokenizer>,
        prompt_tokens: usize,
        max_tokens: usize,
    ) -> Self {
        let eos = tokenizer.eos_token_id();
        TextStream {
            inner: Some(inner),
            tokenizer,
            detok: Detokenizer::new(),
            eos,
            max_tokens,
            emitted: 0,
            prompt_tokens,
            finalized: false,
        }
    }

    /// Tokens emitted so far. EOS is never counted.
    pub fn tokens_emitted(&self) -> usize {
        self.emitted
    }

    pub fn prompt_tokens(&self) -> usize {
        self.prompt_tokens
    }

    /// Stop generating and flush the remaining buffered text, if any.
    fn finish(&mut self) -> Option<TextChunk> {
        self.finalized = true;
        self.inner = None;
        self.detok.finalize().map(|text| TextChunk {
            text,
            token: None,
            logprob: 0.0,
        })
    }
}

impl Iterator for TextStream {
    type Item = Result<TextChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finalized {
            return None;
        }
        if self.emitted >= self.max_tokens {
            return self.finish().map(Ok);
        }
        let step = match self.inner.as_mut()?.next() {
            Some(Ok(step)) => step,
            Some(Err(e)) => {
                self.finalized = true;
                self.inner = None;
                return Some(Err(e));
            }
            None => return self.finish().map(Ok),
        };
        if step.token == self.eos {
            return self.finish().map(Ok);
        }
        let bytes = match self.tokenizer.token_bytes(step.token) {
            Some(bytes) => bytes,
            None => {
                self.finalized = true;
                self.inner = None;
                return Some(Err(GenError::Tokenizer(format!(
                    "model produced unknown token id {}",
                    step.token
                ))));
            }
        };
        let text = self.detok.push(bytes).unwrap_or_default();
        self.emitted += 1;
        Some(Ok(TextChunk {
            text,
            token: Some(step.token),
            logprob: step.token_logprob(),
        }))
    }
}

/// Stream generation from a text prompt.
pub fn stream_generate(
    model: Arc<dyn Model>,
    tokenizer: Arc<dyn Tokenizer>,
    prompt: &str,
    max_tokens: usize,
    params: GenerateParams,
) -> Result<TextStream> {
    let tokens = tokenizer.encode(prompt);
    TextStream::new(model, tokenizer, &tokens, max_tokens, params)
}

/// Throughput and volume figures for one completed generation.
#[derive(Debug, Clone)]
pub struct GenerationStats {
    pub prompt_tokens: usize,
    pub generated_tokens: usize,
    pub tokens_per_second: f64,
}

impl GenerationStats {
    fn from_run(prompt_tokens: usize, generated_tokens: usize, elapsed_secs: f64) -> Self {
        // Instant EOS is a valid outcome; report zero throughput for it.
        let tokens_per_second = if generated_tokens == 0 || elapsed_secs <= 0.0 {
            0.0
        } else {
            generated_tokens as f64 / elapsed_secs
        };
        GenerationStats {
            prompt_tokens,
            generated_tokens,
            tokens_per_second,
        }
    }
}

/// Run a full generation and collect the text.
pub fn generate(
    model: Arc<dyn Model>,
    tokenizer: Arc<dyn Tokenizer>,
    prompt: &str,
    max_tokens: usize,
    params: GenerateParams,
) -> Result<(String, GenerationStats)> {
    let mut stream = stream_generate(model, tokenizer, prompt, max_tokens, params)?;
    let start = Instant::now();
    let mut text = String::new();
    for chunk in &mut stream {
        text.push_str(&chunk?.text);
    }
    let stats = GenerationStats::from_run(
        stream.prompt_tokens(),
        stream.tokens_emitted(),
        start.elapsed().as_secs_f64(),
    );
    tracing::info!(
        prompt_tokens = stats.prompt_tokens,
        generated_tokens = stats.generated_tokens,
        tokens_per_second = stats.tokens_per_second,
        "generation finished"
    );
    Ok((text, stats))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_guard_zero_tokens() {
        let stats = GenerationStats::from_run(5, 0, 0.0);
        assert_eq!(stats.generated_tokens, 0);
        assert_eq!(stats.tokens_per_second, 0.0);
    }

    #[test]
    fn stats_compute_throughput() {
        let stats = GenerationStats::from_run(5, 10, 2.0);
        assert_eq!(stats.prompt_tokens, 5);
        assert!((stats.tokens_per_second - 5.0).abs() < 1e-9);
    }
}
