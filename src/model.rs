//! Single-token decoder forward pass.
//!
//! One call advances the model by one position: embed the token, run every
//! decoder layer (attention over the KV cache, then the gated FFN), apply
//! the final norm and project to vocabulary logits. The caches in
//! [`RunState`] keep all earlier positions, so each call only pays for the
//! new one.

use rayon::prelude::*;

use crate::config::ModelConfig;
use crate::error::{EngineError, Result};
use crate::ops::{accum, matmul, rms_norm, rotate, softmax, swiglu};
use crate::state::RunState;
use crate::weights::ModelWeights;

/// Run the forward pass for `token` at `pos`, leaving vocabulary logits in
/// `state.logits`.
///
/// Positions must arrive in order starting at 0; the pass writes the KV
/// cache row for `pos` and attends over rows `0..=pos`. A position at or
/// past the context capacity or a token outside the vocabulary is fatal.
pub fn forward(
    token: i32,
    pos: usize,
    config: &ModelConfig,
    state: &mut RunState,
    weights: &ModelWeights,
) -> Result<()> {
    if pos >= config.seq_len {
        return Err(EngineError::ContextOverflow { pos, seq_len: config.seq_len });
    }
    if token < 0 || token as usize >= config.vocab_size {
        return Err(EngineError::InvalidToken { token, vocab_size: config.vocab_size });
    }

    // Token embedding.
    let dim = config.dim;
    let emb_offset = token as usize * dim;
    state.x.copy_from_slice(&weights.token_embedding()[emb_offset..emb_offset + dim]);

    // Rotation table rows for this position, shared by every layer and head.
    let cos_row = weights.rope_cos(pos);
    let sin_row = weights.rope_sin(pos);

    // Decoder layers.
    for l in 0..config.n_layers {
        attention(l, pos, config, state, weights, cos_row, sin_row);
        mlp(l, state, weights);
    }

    // Final norm, then project to logits. The classifier is the embedding
    // table when the checkpoint shares them.
    rms_norm(&mut state.xb, &state.x, weights.final_norm());
    matmul(&mut state.logits, &state.xb, weights.classifier());

    Ok(())
}

/// Self-attention for one layer at one position.
fn attention(
    layer: usize,
    pos: usize,
    config: &ModelConfig,
    state: &mut RunState,
    weights: &ModelWeights,
    cos_row: &[f32],
    sin_row: &[f32],
) {
    let head_size = config.head_size();
    let group_size = config.group_size();
    let seq_len = config.seq_len;

    // Input norm.
    rms_norm(&mut state.xb, &state.x, weights.attn_norm(layer));

    // QKV projections.
    matmul(&mut state.q, &state.xb, weights.wq(layer));
    matmul(&mut state.k, &state.xb, weights.wk(layer));
    matmul(&mut state.v, &state.xb, weights.wv(layer));

    // Rotate queries and keys by this position's table row.
    rotate(&mut state.q, cos_row, sin_row, head_size);
    rotate(&mut state.k, cos_row, sin_row, head_size);

    // Cache K and V for this position.
    state.key_cache.row_mut(layer, pos).copy_from_slice(&state.k);
    state.value_cache.row_mut(layer, pos).copy_from_slice(&state.v);

    // Multi-head attention over positions 0..=pos. Each head owns a
    // disjoint slice of xb and its own score row, so heads run in parallel.
    let q = &state.q;
    let key_cache = &state.key_cache;
    let value_cache = &state.value_cache;
    let scale = 1.0 / (head_size as f32).sqrt();

    state
        .xb
        .par_chunks_mut(head_size)
        .zip(state.att.par_chunks_mut(seq_len))
        .enumerate()
        .for_each(|(h, (out, att_row))| {
            let q_off = h * head_size;
            let q = &q[q_off..q_off + head_size];
            let kv_h = h / group_size;

            // Scores against every cached key.
            let att = &mut att_row[..=pos];
            for (t, score) in att.iter_mut().enumerate() {
                let k = key_cache.head(layer, t, kv_h);
                let mut dot = 0.0f32;
                for i in 0..head_size {
                    dot += q[i] * k[i];
                }
                *score = dot * scale;
            }

            softmax(att);

            // Weighted sum of the cached values.
            out.fill(0.0);
            for (t, &a) in att.iter().enumerate() {
                let v = value_cache.head(layer, t, kv_h);
                for i in 0..head_size {
                    out[i] += a * v[i];
                }
            }
        });

    // Output projection and residual add.
    matmul(&mut state.xb2, &state.xb, weights.wo(layer));
    accum(&mut state.x, &state.xb2);
}

/// Gated FFN for one layer.
fn mlp(layer: usize, state: &mut RunState, weights: &ModelWeights) {
    // Input norm.
    rms_norm(&mut state.xb, &state.x, weights.ffn_norm(layer));

    // Gate and up projections.
    matmul(&mut state.hb, &state.xb, weights.w_gate(layer));
    matmul(&mut state.hb2, &state.xb, weights.w_up(layer));

    // SwiGLU activation.
    swiglu(&mut state.hb, &state.hb2);

    // Down projection and residual add.
    matmul(&mut state.xb, &state.hb, weights.w_down(layer));
    accum(&mut state.x, &state.xb);
}
