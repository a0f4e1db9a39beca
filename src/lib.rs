//! Autoregressive token generation for causal sequence models.
//!
//! The crate drives an opaque [`Model`] through chunked prompt prefill and
//! a depth-1 pipelined decode loop, applying configurable score transforms
//! and sampling strategies per step, with optional throughput pacing and
//! incremental detokenization. See [`TokenStream`] for the token-level
//! loop and [`stream_generate`] / [`generate`] for the text-level surface.

pub mod cache;
pub mod engine;
pub mod error;
pub mod generate;
pub mod limiter;
pub mod logits;
pub mod model;
pub mod sampling;
pub mod tokenizer;

pub use cache::{make_cache, LayerCache, SINK_TOKENS};
pub use engine::{GenerateParams, GeneratedToken, TokenStream, TokenStreamBuilder};
pub use error::{GenError, Result};
pub use generate::{generate, stream_generate, GenerationStats, TextChunk, TextStream};
pub use limiter::RateLimiter;
pub use logits::{LogitBias, LogitsProcessor, RepetitionPenalty};
pub use model::{Logits, Model};
pub use sampling::{Sampler, SamplingConfig, SeededRng};
pub use tokenizer::{Detokenizer, Tokenizer, VocabTokenizer};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
