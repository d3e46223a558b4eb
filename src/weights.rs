//! Model parameters over one contiguous f32 region.
//!
//! Every tensor lives in a single flat buffer, either owned after a buffered
//! read or borrowed zero-copy out of a memory map. A [`WeightLayout`] built
//! from the config records where each tensor sits, and the accessors hand
//! out bounds-checked slices, so the owned and mapped paths share all of the
//! indexing logic.

use std::ops::Range;

use memmap2::Mmap;

use crate::config::ModelConfig;
use crate::error::{EngineError, Result};

/// Element ranges of every tensor inside the flat weight region.
///
/// The on-disk order is: token embedding `(vocab, dim)`; per-layer attention
/// norms `(dim)`; wq `(dim, dim)`; wk and wv `(kv_dim, dim)`; wo `(dim,
/// dim)`; per-layer FFN norms `(dim)`; w_gate `(hidden, dim)`; w_down `(dim,
/// hidden)`; w_up `(hidden, dim)`; final norm `(dim)`; rotary cosine and
/// sine tables `(seq_len, head_size/2)` each; classifier `(vocab, dim)` only
/// when not shared with the embedding table. All matrices are row-major
/// `(out_dim, in_dim)`, per-layer tensors are concatenated layer by layer.
#[derive(Debug, Clone)]
pub(crate) struct WeightLayout {
    config: ModelConfig,
    token_embedding: Range<usize>,
    rms_att: Range<usize>,
    wq: Range<usize>,
    wk: Range<usize>,
    wv: Range<usize>,
    wo: Range<usize>,
    rms_ffn: Range<usize>,
    w_gate: Range<usize>,
    w_down: Range<usize>,
    w_up: Range<usize>,
    rms_final: Range<usize>,
    rope_cos: Range<usize>,
    rope_sin: Range<usize>,
    classifier: Option<Range<usize>>,
}

/// Checked element count of a tensor with the given dimensions.
fn tensor_elems(dims: &[usize]) -> Option<usize> {
    dims.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
}

impl WeightLayout {
    /// Compute per-tensor ranges. Dimensions come straight from a header,
    /// so every size and running offset is checked; overflow is an invalid
    /// checkpoint.
    pub(crate) fn new(config: &ModelConfig, shared_classifier: bool) -> Result<Self> {
        let dim = config.dim;
        let hidden = config.hidden_dim;
        let layers = config.n_layers;
        let vocab = config.vocab_size;
        let kv_dim = config.kv_dim();
        let rope_half = config.head_size() / 2;

        let mut offset = 0usize;
        let mut take = |len: Option<usize>| -> Result<Range<usize>> {
            let end = len.and_then(|len| offset.checked_add(len)).ok_or_else(|| {
                EngineError::InvalidCheckpoint("tensor sizes overflow the weight layout".into())
            })?;
            let range = offset..end;
            offset = end;
            Ok(range)
        };

        let token_embedding = take(tensor_elems(&[vocab, dim]))?;
        let rms_att = take(tensor_elems(&[layers, dim]))?;
        let wq = take(tensor_elems(&[layers, dim, dim]))?;
        let wk = take(tensor_elems(&[layers, kv_dim, dim]))?;
        let wv = take(tensor_elems(&[layers, kv_dim, dim]))?;
        let wo = take(tensor_elems(&[layers, dim, dim]))?;
        let rms_ffn = take(tensor_elems(&[layers, dim]))?;
        let w_gate = take(tensor_elems(&[layers, hidden, dim]))?;
        let w_down = take(tensor_elems(&[layers, dim, hidden]))?;
        let w_up = take(tensor_elems(&[layers, hidden, dim]))?;
        let rms_final = take(tensor_elems(&[dim]))?;
        let rope_cos = take(tensor_elems(&[config.seq_len, rope_half]))?;
        let rope_sin = take(tensor_elems(&[config.seq_len, rope_half]))?;
        let classifier = if shared_classifier {
            None
        } else {
            Some(take(tensor_elems(&[vocab, dim]))?)
        };

        Ok(WeightLayout {
            config: *config,
            token_embedding,
            rms_att,
            wq,
            wk,
            wv,
            wo,
            rms_ffn,
            w_gate,
            w_down,
            w_up,
            rms_final,
            rope_cos,
            rope_sin,
            classifier,
        })
    }

    /// Total element count of the weight region.
    pub(crate) fn total_len(&self) -> usize {
        match &self.classifier {
            Some(range) => range.end,
            None => self.rope_sin.end,
        }
    }
}

/// Backing storage for the weight region.
enum WeightData {
    Owned(Vec<f32>),
    /// Zero-copy view into a memory-mapped checkpoint. `offset` is the byte
    /// position of the tensor region, `len` its element count; alignment and
    /// length are validated once at construction.
    Mapped { map: Mmap, offset: usize, len: usize },
}

impl WeightData {
    fn as_slice(&self) -> &[f32] {
        match self {
            WeightData::Owned(v) => v,
            WeightData::Mapped { map, offset, len } => {
                let bytes = &map[*offset..*offset + *len * 4];
                // SAFETY: construction checked that the region is 4-byte
                // aligned and exactly len * 4 bytes long; any bit pattern is
                // a valid f32, and the map lives as long as self.
                unsafe { std::slice::from_raw_parts(bytes.as_ptr().cast::<f32>(), *len) }
            }
        }
    }
}

/// Immutable model parameters, shared read-only across sessions.
pub struct ModelWeights {
    data: WeightData,
    layout: WeightLayout,
}

impl ModelWeights {
    /// Wrap an owned buffer produced by a buffered checkpoint read.
    pub(crate) fn from_vec(layout: WeightLayout, data: Vec<f32>) -> Result<Self> {
        if data.len() != layout.total_len() {
            return Err(EngineError::InvalidCheckpoint(format!(
                "weight buffer holds {} floats, layout needs {}",
                data.len(),
                layout.total_len()
            )));
        }
        Ok(ModelWeights { data: WeightData::Owned(data), layout })
    }

    /// Borrow the tensor region of a memory-mapped checkpoint, zero-copy.
    ///
    /// `offset` is the byte position right after the header.
    pub(crate) fn from_mmap(layout: WeightLayout, map: Mmap, offset: usize) -> Result<Self> {
        let len = layout.total_len();
        let expected_bytes =
            len.checked_mul(4).and_then(|bytes| bytes.checked_add(offset)).ok_or_else(|| {
                EngineError::InvalidCheckpoint("tensor region exceeds the address space".into())
            })?;
        if map.len() != expected_bytes {
            return Err(EngineError::InvalidCheckpoint(format!(
                "checkpoint is {} bytes, layout needs {}",
                map.len(),
                expected_bytes
            )));
        }
        if (map.as_ptr() as usize + offset) % align_of::<f32>() != 0 {
            return Err(EngineError::InvalidCheckpoint(
                "tensor region is not 4-byte aligned".into(),
            ));
        }
        Ok(ModelWeights { data: WeightData::Mapped { map, offset, len }, layout })
    }

    #[inline]
    fn region(&self, range: &Range<usize>) -> &[f32] {
        &self.data.as_slice()[range.start..range.end]
    }

    #[inline]
    fn layer_slice(&self, range: &Range<usize>, layer: usize, size: usize) -> &[f32] {
        debug_assert!(layer < self.layout.config.n_layers);
        let start = range.start + layer * size;
        &self.data.as_slice()[start..start + size]
    }

    /// Token embedding table, row-major `(vocab_size, dim)`.
    #[inline]
    pub fn token_embedding(&self) -> &[f32] {
        self.region(&self.layout.token_embedding)
    }

    /// Attention RMSNorm scale for one layer.
    #[inline]
    pub fn attn_norm(&self, layer: usize) -> &[f32] {
        self.layer_slice(&self.layout.rms_att, layer, self.layout.config.dim)
    }

    /// Query projection for one layer, `(dim, dim)`.
    #[inline]
    pub fn wq(&self, layer: usize) -> &[f32] {
        let dim = self.layout.config.dim;
        self.layer_slice(&self.layout.wq, layer, dim * dim)
    }

    /// Key projection for one layer, `(kv_dim, dim)`.
    #[inline]
    pub fn wk(&self, layer: usize) -> &[f32] {
        let size = self.layout.config.kv_dim() * self.layout.config.dim;
        self.layer_slice(&self.layout.wk, layer, size)
    }

    /// Value projection for one layer, `(kv_dim, dim)`.
    #[inline]
    pub fn wv(&self, layer: usize) -> &[f32] {
        let size = self.layout.config.kv_dim() * self.layout.config.dim;
        self.layer_slice(&self.layout.wv, layer, size)
    }

    /// Attention output projection for one layer, `(dim, dim)`.
    #[inline]
    pub fn wo(&self, layer: usize) -> &[f32] {
        let dim = self.layout.config.dim;
        self.layer_slice(&self.layout.wo, layer, dim * dim)
    }

    /// FFN RMSNorm scale for one layer.
    #[inline]
    pub fn ffn_norm(&self, layer: usize) -> &[f32] {
        self.layer_slice(&self.layout.rms_ffn, layer, self.layout.config.dim)
    }

    /// FFN gate projection for one layer, `(hidden_dim, dim)`.
    #[inline]
    pub fn w_gate(&self, layer: usize) -> &[f32] {
        let size = self.layout.config.hidden_dim * self.layout.config.dim;
        self.layer_slice(&self.layout.w_gate, layer, size)
    }

    /// FFN down projection for one layer, `(dim, hidden_dim)`.
    #[inline]
    pub fn w_down(&self, layer: usize) -> &[f32] {
        let size = self.layout.config.dim * self.layout.config.hidden_dim;
        self.layer_slice(&self.layout.w_down, layer, size)
    }

    /// FFN up projection for one layer, `(hidden_dim, dim)`.
    #[inline]
    pub fn w_up(&self, layer: usize) -> &[f32] {
        let size = self.layout.config.hidden_dim * self.layout.config.dim;
        self.layer_slice(&self.layout.w_up, layer, size)
    }

    /// Final RMSNorm scale.
    #[inline]
    pub fn final_norm(&self) -> &[f32] {
        self.region(&self.layout.rms_final)
    }

    /// Rotary cosine row for one position, `head_size / 2` entries.
    #[inline]
    pub fn rope_cos(&self, pos: usize) -> &[f32] {
        let seq_len = self.layout.config.seq_len;
        debug_assert!(pos < seq_len, "rope position {pos} out of {seq_len}");
        let half = self.layout.config.head_size() / 2;
        let start = self.layout.rope_cos.start + pos * half;
        &self.data.as_slice()[start..start + half]
    }

    /// Rotary sine row for one position, `head_size / 2` entries.
    #[inline]
    pub fn rope_sin(&self, pos: usize) -> &[f32] {
        let seq_len = self.layout.config.seq_len;
        debug_assert!(pos < seq_len, "rope position {pos} out of {seq_len}");
        let half = self.layout.config.head_size() / 2;
        let start = self.layout.rope_sin.start + pos * half;
        &self.data.as_slice()[start..start + half]
    }

    /// Classifier matrix `(vocab_size, dim)`; the embedding table doubles as
    /// the classifier when the checkpoint shares them.
    #[inline]
    pub fn classifier(&self) -> &[f32] {
        match &self.layout.classifier {
            Some(range) => self.region(range),
            None => self.token_embedding(),
        }
    }

    /// True when the classifier aliases the token embedding table.
    #[inline]
    pub fn shared_classifier(&self) -> bool {
        self.layout.classifier.is_none()
    }
}
