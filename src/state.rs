//! Per-session runtime buffers.

use crate::cache::KvCache;
use crate::config::ModelConfig;

/// Mutable state for one generation session.
///
/// One RunState belongs to exactly one session at a time; concurrent
/// sessions each allocate their own and share only the read-only config and
/// weights. Buffers other than the caches are overwritten every step, so a
/// RunState only needs [`reset`](RunState::reset) when it is reused for a
/// fresh session.
#[derive(Debug, Clone)]
pub struct RunState {
    /// Residual stream at the current position (dim)
    pub x: Vec<f32>,
    /// Normalized activations / attention output (dim)
    pub xb: Vec<f32>,
    /// Attention projection output (dim)
    pub xb2: Vec<f32>,
    /// FFN gate activations (hidden_dim)
    pub hb: Vec<f32>,
    /// FFN up-projection activations (hidden_dim)
    pub hb2: Vec<f32>,
    /// Query vector (dim)
    pub q: Vec<f32>,
    /// Key vector for the current position (kv_dim)
    pub k: Vec<f32>,
    /// Value vector for the current position (kv_dim)
    pub v: Vec<f32>,
    /// Attention scores, one seq_len row per head (n_heads * seq_len)
    pub att: Vec<f32>,
    /// Output logits (vocab_size)
    pub logits: Vec<f32>,
    /// Cached keys for all layers and positions
    pub key_cache: KvCache,
    /// Cached values for all layers and positions
    pub value_cache: KvCache,
}

impl RunState {
    /// Allocate all buffers for a model described by `config`.
    pub fn new(config: &ModelConfig) -> Self {
        let kv_dim = config.kv_dim();
        let head_size = config.head_size();

        RunState {
            x: vec![0.0; config.dim],
            xb: vec![0.0; config.dim],
            xb2: vec![0.0; config.dim],
            hb: vec![0.0; config.hidden_dim],
            hb2: vec![0.0; config.hidden_dim],
            q: vec![0.0; config.dim],
            k: vec![0.0; kv_dim],
            v: vec![0.0; kv_dim],
            att: vec![0.0; config.n_heads * config.seq_len],
            logits: vec![0.0; config.vocab_size],
            key_cache: KvCache::new(config.n_layers, config.seq_len, kv_dim, head_size),
            value_cache: KvCache::new(config.n_layers, config.seq_len, kv_dim, head_size),
        }
    }

    /// Clear all buffers and both caches so the state can serve a new
    /// session as if freshly allocated.
    pub fn reset(&mut self) {
        self.x.fill(0.0);
        self.xb.fill(0.0);
        self.xb2.fill(0.0);
        self.hb.fill(0.0);
        self.hb2.fill(0.0);
        self.q.fill(0.0);
        self.k.fill(0.0);
        self.v.fill(0.0);
        self.att.fill(0.0);
        self.logits.fill(0.0);
        self.key_cache.reset();
        self.value_cache.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ModelConfig {
        ModelConfig {
            dim: 8,
            hidden_dim: 12,
            n_layers: 3,
            n_heads: 2,
            n_kv_heads: 1,
            vocab_size: 10,
            seq_len: 5,
        }
    }

    #[test]
    fn buffers_are_sized_from_config() {
        let state = RunState::new(&config());
        assert_eq!(state.x.len(), 8);
        assert_eq!(state.hb.len(), 12);
        assert_eq!(state.q.len(), 8);
        // One KV head of size 4.
        assert_eq!(state.k.len(), 4);
        assert_eq!(state.v.len(), 4);
        assert_eq!(state.att.len(), 2 * 5);
        assert_eq!(state.logits.len(), 10);
        assert_eq!(state.key_cache.capacity(), 5);
    }

    #[test]
    fn reset_returns_state_to_zero() {
        let mut state = RunState::new(&config());
        state.x[0] = 3.0;
        state.logits[9] = -1.0;
        state.key_cache.row_mut(2, 4)[0] = 5.0;
        state.reset();
        assert_eq!(state.x[0], 0.0);
        assert_eq!(state.logits[9], 0.0);
        assert_eq!(state.key_cache.row(2, 4)[0], 0.0);
    }
}
