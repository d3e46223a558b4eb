//! Key/value cache for incremental decoding.
//!
//! Attention at position `pos` reads every cached key/value row at positions
//! `0..=pos` of the same layer, so rows persist for the whole session and
//! nothing is ever evicted. Capacity is fixed at `seq_len` rows per layer.

/// One flat f32 buffer holding either the key or the value plane.
///
/// Layout is `[layer][position][kv_head][head_size]` with strides
/// `layer_stride = seq_len * kv_dim` and `pos_stride = kv_dim`, where
/// `kv_dim = n_kv_heads * head_size`. Rows beyond the current position hold
/// stale data from earlier sessions; the causal window keeps them unread, so
/// no zeroing happens between positions.
#[derive(Debug, Clone)]
pub struct KvCache {
    data: Vec<f32>,
    n_layers: usize,
    seq_len: usize,
    kv_dim: usize,
    head_size: usize,
}

impl KvCache {
    /// Allocate a zeroed cache with room for `seq_len` positions per layer.
    pub fn new(n_layers: usize, seq_len: usize, kv_dim: usize, head_size: usize) -> Self {
        debug_assert!(head_size > 0 && kv_dim % head_size == 0);
        KvCache {
            data: vec![0.0; n_layers * seq_len * kv_dim],
            n_layers,
            seq_len,
            kv_dim,
            head_size,
        }
    }

    /// Number of positions the cache can hold per layer.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.seq_len
    }

    #[inline]
    fn offset(&self, layer: usize, pos: usize) -> usize {
        assert!(layer < self.n_layers, "layer {layer} out of {}", self.n_layers);
        assert!(pos < self.seq_len, "cache position {pos} out of {}", self.seq_len);
        layer * self.seq_len * self.kv_dim + pos * self.kv_dim
    }

    /// The full `kv_dim` row for one (layer, position).
    #[inline]
    pub fn row(&self, layer: usize, pos: usize) -> &[f32] {
        let off = self.offset(layer, pos);
        &self.data[off..off + self.kv_dim]
    }

    /// Mutable row for one (layer, position); written once per forward call.
    #[inline]
    pub fn row_mut(&mut self, layer: usize, pos: usize) -> &mut [f32] {
        let off = self.offset(layer, pos);
        &mut self.data[off..off + self.kv_dim]
    }

    /// One KV head's slice of a row.
    #[inline]
    pub fn head(&self, layer: usize, pos: usize, kv_head: usize) -> &[f32] {
        assert!(kv_head * self.head_size < self.kv_dim, "kv head {kv_head} out of range");
        let off = self.offset(layer, pos) + kv_head * self.head_size;
        &self.data[off..off + self.head_size]
    }

    /// Zero every row, for reusing the cache across sessions.
    pub fn reset(&mut self) {
        self.data.fill(0.0);
    }
}
