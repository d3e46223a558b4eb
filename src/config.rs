//! Model configuration.

use crate::error::{EngineError, Result};

/// Transformer hyperparameters, fixed for the lifetime of a loaded model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelConfig {
    /// Transformer embedding dimension
    pub dim: usize,
    /// FFN intermediate dimension
    pub hidden_dim: usize,
    /// Number of decoder layers
    pub n_layers: usize,
    /// Number of query attention heads
    pub n_heads: usize,
    /// Number of key/value heads (< n_heads enables grouped-query attention)
    pub n_kv_heads: usize,
    /// Vocabulary size
    pub vocab_size: usize,
    /// Maximum context length
    pub seq_len: usize,
}

impl ModelConfig {
    /// Returns the per-head dimension.
    #[inline]
    pub fn head_size(&self) -> usize {
        self.dim / self.n_heads
    }

    /// Returns the combined key/value dimension across all KV heads.
    #[inline]
    pub fn kv_dim(&self) -> usize {
        (self.dim * self.n_kv_heads) / self.n_heads
    }

    /// Returns the number of query heads sharing one KV head.
    #[inline]
    pub fn group_size(&self) -> usize {
        self.n_heads / self.n_kv_heads
    }

    /// Checks the structural invariants the forward pass relies on.
    ///
    /// Called by the checkpoint loaders so a malformed model is rejected
    /// before any inference runs.
    pub fn validate(&self) -> Result<()> {
        if self.dim == 0
            || self.hidden_dim == 0
            || self.n_layers == 0
            || self.n_heads == 0
            || self.n_kv_heads == 0
            || self.vocab_size == 0
            || self.seq_len == 0
        {
            return Err(EngineError::InvalidConfig(format!(
                "all dimensions must be positive, got {self:?}"
            )));
        }
        if self.dim % self.n_heads != 0 {
            return Err(EngineError::InvalidConfig(format!(
                "dim {} not divisible by n_heads {}",
                self.dim, self.n_heads
            )));
        }
        if self.head_size() % 2 != 0 {
            return Err(EngineError::InvalidConfig(format!(
                "head size {} must be even for rotary pairing",
                self.head_size()
            )));
        }
        if self.n_kv_heads > self.n_heads || self.n_heads % self.n_kv_heads != 0 {
            return Err(EngineError::InvalidConfig(format!(
                "n_kv_heads {} must evenly divide n_heads {}",
                self.n_kv_heads, self.n_heads
            )));
        }
        Ok(())
    }
}
