//! Error types for the inference engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid checkpoint: {0}")]
    InvalidCheckpoint(String),

    #[error("Invalid model configuration: {0}")]
    InvalidConfig(String),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("Invalid sampling parameters: {0}")]
    InvalidSampling(String),

    #[error("position {pos} exceeds context capacity {seq_len}")]
    ContextOverflow { pos: usize, seq_len: usize },

    #[error("token id {token} outside vocabulary of size {vocab_size}")]
    InvalidToken { token: i32, vocab_size: usize },
}

pub type Result<T> = std::result::Result<T, EngineError>;
