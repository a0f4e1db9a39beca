//! The decode loop: chunked prefill plus pipelined per-token stepping.
//!
//! [`TokenStream`] is the pull-based core of the crate. Construction
//! validates all configuration and runs the chunked prefill; each `next()`
//! yields one `(token, log-probabilities)` pair. After the first token,
//! step N+1 is always computing on the worker thread while the consumer
//! processes step N, so text assembly and pacing overlap with model
//! compute. Dropping the stream cancels generation; at most the one
//! in-flight step is wasted.
//!
//! Termination bounds (max tokens, end-of-sequence) are the caller's
//! concern; this loop generates until dropped or until the model fails.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;

use crate::cache::{make_cache, validate_layers, LayerCache};
use crate::error::{GenError, Result};
use crate::limiter::RateLimiter;
use crate::logits::{LogitBias, LogitsProcessor, RepetitionPenalty};
use crate::model::Model;
use crate::sampling::{log_softmax, Sampler, SamplingConfig};

mod worker;

use worker::StepWorker;

/// Configuration for one generation session.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenerateParams {
    /// Sampling strategy settings.
    pub sampling: SamplingConfig,

    /// RNG seed for the sampler.
    pub seed: u64,

    /// Repetition penalty factor; `None` disables the stage.
    pub repetition_penalty: Option<f32>,

    /// Trailing-window size the repetition penalty looks at.
    pub repetition_context_size: usize,

    /// Constant score offsets by vocabulary id; `None` disables the stage.
    pub logit_bias: Option<HashMap<u32, f32>>,

    /// Prompt tokens evaluated per prefill forward pass.
    pub prefill_chunk_size: usize,

    /// Capacity bound for newly created caches; `None` means unbounded.
    pub max_kv_size: Option<usize>,

    /// Emission ceiling in tokens per second; `None` disables pacing.
    pub max_tokens_per_second: Option<f64>,
}

impl Default for GenerateParams {
    fn default() -> Self {
        GenerateParams {
            sampling: SamplingConfig::default(),
            seed: 42,
            repetition_penalty: None,
            repetition_context_size: 20,
            logit_bias: None,
            prefill_chunk_size: 512,
            max_kv_size: None,
            max_tokens_per_second: None,
        }
    }
}

impl GenerateParams {
    /// Parse params from a JSON document, filling omitted fields with
    /// defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// One generated token with its full-vocabulary log-probabilities.
///
/// Log-probabilities are the log-sum-exp normalization of the pipeline
/// output scores, so they reflect every configured processor but none of
/// the sampler's filtering.
#[derive(Debug, Clone)]
pub struct GeneratedToken {
    pub token: u32,
    pub logprobs: Vec<f32>,
}

impl GeneratedToken {
    /// Log-probability of the sampled token itself.
    pub fn token_logprob(&self) -> f32 {
        self.logprobs
            .get(self.token as usize)
            .copied()
            .unwrap_or(f32::NEG_INFINITY)
    }
}

/// Everything one decode step reads and mutates. Moves to the worker
/// thread and back between steps.
pub(crate) struct StepState {
    cache: Vec<LayerCache>,
    history: Vec<u32>,
    processors: Vec<Box<dyn LogitsProcessor>>,
    sampler: Sampler,
}

pub(crate) struct StepOutput {
    token: u32,
    logprobs: Vec<f32>,
}

/// One decode step: forward pass, processor pipeline, sampling.
///
/// `input` is the prompt remainder on the first step and the single
/// previously sampled token afterwards. Only the last position's scores
/// are used.
pub(crate) fn run_step(
    model: &dyn Model,
    state: &mut StepState,
    input: &[u32],
) -> Result<StepOutput> {
    let logits = model.forward(input, &mut state.cache)?;
    let mut scores = logits.into_last();

    if !state.processors.is_empty() {
        // History exists only for the pipeline's sake, so it grows only
        // while a processor is configured.
        state.history.extend_from_slice(input);
        for stage in &state.processors {
            stage.process(&state.history, &mut scores);
        }
    }

    let logprobs = log_softmax(&scores);
    let token = state.sampler.sample(&scores);
    Ok(StepOutput { token, logprobs })
}

enum Phase {
    /// Prefill done; the prompt remainder still needs its synchronous pass.
    First { state: Box<StepState>, remainder: Vec<u32> },
    /// One step is in flight on the worker.
    Steady,
    Finished,
}

/// Configures and starts a [`TokenStream`].
pub struct TokenStreamBuilder {
    model: Arc<dyn Model>,
    params: GenerateParams,
    cache: Option<Vec<LayerCache>>,
    extra_processors: Vec<Box<dyn LogitsProcessor>>,
}

impl TokenStreamBuilder {
    pub fn new(model: Arc<dyn Model>) -> Self {
        TokenStreamBuilder {
            model,
            params: GenerateParams::default(),
            cache: None,
            extra_processors: Vec::new(),
        }
    }

    pub fn params(mut self, params: GenerateParams) -> Self {
        self.params = params;
        self
    }

    /// Supply a pre-warmed cache instead of a fresh one. The stream owns
    /// it for the session.
    pub fn cache(mut self, cache: Vec<LayerCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Append a caller-supplied pipeline stage. Runs after the built-in
    /// repetition-penalty and bias stages, in insertion order.
    pub fn processor(mut self, stage: Box<dyn LogitsProcessor>) -> Self {
        self.extra_processors.push(stage);
        self
    }

    /// Validate configuration, run the chunked prefill, and start the
    /// decode worker.
    ///
    /// # Errors
    /// All configuration problems surface here, before any token is
    /// produced: empty prompt, zero chunk size, invalid penalty or rate,
    /// out-of-vocabulary bias ids, cache/layer-count mismatch.
    pub fn start(self, prompt: &[u32]) -> Result<TokenStream> {
        let TokenStreamBuilder {
            model,
            params,
            cache,
            extra_processors,
        } = self;

        if prompt.is_empty() {
            return Err(GenError::Config("prompt must not be empty".into()));
        }
        if params.prefill_chunk_size == 0 {
            return Err(GenError::Config("prefill_chunk_size must be positive".into()));
        }

        let mut processors: Vec<Box<dyn LogitsProcessor>> = Vec::new();
        if let Some(penalty) = params.repetition_penalty {
            processors.push(Box::new(RepetitionPenalty::new(
                penalty,
                params.repetition_context_size,
            )?));
        }
        if let Some(bias) = &params.logit_bias {
            processors.push(Box::new(LogitBias::new(
                bias.iter().map(|(&id, &b)| (id, b)),
                model.vocab_size(),
            )?));
        }
        processors.extend(extra_processors);

        let limiter = params
            .max_tokens_per_second
            .map(RateLimiter::new)
            .transpose()?;

        let mut cache = match cache {
            Some(cache) => cache,
            None => make_cache(model.as_ref(), params.max_kv_size),
        };
        validate_layers(&cache, model.num_layers())?;

        // Chunked prefill: bulk-evaluate all but the trailing chunk of the
        // prompt, forcing materialization after each chunk so peak memory
        // tracks the chunk size rather than the prompt length.
        let chunk = params.prefill_chunk_size;
        let mut offset = 0;
        while prompt.len() - offset > chunk {
            let _ = model.forward(&prompt[offset..offset + chunk], &mut cache)?;
            model.synchronize(&cache)?;
            model.release_buffers();
            offset += chunk;
            tracing::debug!(processed = offset, total = prompt.len(), "prefill chunk done");
        }
        let remainder = prompt[offset..].to_vec();

        let state = StepState {
            cache,
            history: Vec::new(),
            processors,
            sampler: Sampler::new(params.sampling, params.seed),
        };
        let worker = StepWorker::spawn(Arc::clone(&model))?;

        Ok(TokenStream {
            model,
            worker,
            limiter,
            phase: Phase::First {
                state: Box::new(state),
                remainder,
            },
        })
    }
}

/// Pull-based, single-pass token sequence.
///
/// Unbounded: the consumer stops pulling (or drops the stream) to stop
/// generation. Tokens arrive in strict generation order.
pub struct TokenStream {
    model: Arc<dyn Model>,
    worker: StepWorker,
    limiter: Option<RateLimiter>,
    phase: Phase,
}

impl TokenStream {
    pub fn builder(model: Arc<dyn Model>) -> TokenStreamBuilder {
        TokenStreamBuilder::new(model)
    }

    fn step(&mut self) -> Result<Option<GeneratedToken>> {
        let output = match std::mem::replace(&mut self.phase, Phase::Finished) {
            Phase::First { state, remainder } => {
                // The prompt remainder runs synchronously; there is nothing
                // to overlap with yet.
                let mut state = *state;
                let output = run_step(self.model.as_ref(), &mut state, &remainder)?;
                self.worker.submit(state, vec![output.token])?;
                output
            }
            Phase::Steady => {
                let (output, state) = self.worker.recv()?;
                self.worker.submit(state, vec![output.token])?;
                output
            }
            Phase::Finished => return Ok(None),
        };
        self.phase = Phase::Steady;

        if let Some(limiter) = &mut self.limiter {
            limiter.pace();
        }
        Ok(Some(GeneratedToken {
            token: output.token,
            logprobs: output.logprobs,
        }))
    }
}

impl Iterator for TokenStream {
    type Item = Result<GeneratedToken>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.step() {
            Ok(Some(token)) => Some(Ok(token)),
            Ok(None) => None,
            Err(e) => {
                self.phase = Phase::Finished;
                Some(Err(e))
            }
        }
    }
}
