//! Single-sequence CPU inference for Llama-style decoder transformers.
//!
//! The engine walks one token at a time: a forward pass turns the current
//! token and position into logits over the vocabulary, the sampler picks
//! the next token, and the decode loop streams decoded text to a sink.
//! Weights load from either checkpoint container, buffered or zero-copy
//! memory-mapped, and stay immutable so sessions can share them.

pub mod cache;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod generate;
pub mod model;
pub mod ops;
pub mod sample;
pub mod state;
pub mod tokenizer;
pub mod weights;

#[cfg(test)]
mod testutil;

pub use cache::KvCache;
pub use checkpoint::{CheckpointFormat, load_checkpoint};
pub use config::ModelConfig;
pub use error::{EngineError, Result};
pub use generate::{GenerateOptions, GenerationStats, generate};
pub use model::forward;
pub use sample::sample;
pub use state::RunState;
pub use tokenizer::{TOKEN_BOS, TOKEN_EOS, TOKEN_UNK, Tokenizer, is_reserved, load_tokenizer};
pub use weights::ModelWeights;
