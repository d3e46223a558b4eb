//! Shared fixtures for unit tests.

use crate::config::ModelConfig;
use crate::tokenizer::Tokenizer;
use crate::weights::{ModelWeights, WeightLayout};

pub(crate) fn identity(n: usize) -> Vec<f32> {
    let mut m = vec![0.0; n * n];
    for i in 0..n {
        m[i * n + i] = 1.0;
    }
    m
}

/// Single-layer model with identity projections, unit norms, a zeroed FFN
/// and rotation tables frozen at angle zero. The forward pass then reduces
/// to two norms and a residual add, which a few lines of scalar math can
/// reproduce, and the shared classifier reads logits straight off the
/// embedding rows.
pub(crate) fn rigged_weights(cfg: &ModelConfig, embedding: Vec<f32>) -> ModelWeights {
    assert_eq!(cfg.n_layers, 1);
    assert_eq!(cfg.n_kv_heads, cfg.n_heads);
    let dim = cfg.dim;
    let hidden = cfg.hidden_dim;
    let rope_len = cfg.seq_len * cfg.head_size() / 2;

    let mut data = embedding;
    data.extend(vec![1.0; dim]); // attn norm
    data.extend(identity(dim)); // wq
    data.extend(identity(dim)); // wk
    data.extend(identity(dim)); // wv
    data.extend(identity(dim)); // wo
    data.extend(vec![1.0; dim]); // ffn norm
    data.extend(vec![0.0; hidden * dim]); // gate
    data.extend(vec![0.0; dim * hidden]); // down
    data.extend(vec![0.0; hidden * dim]); // up
    data.extend(vec![1.0; dim]); // final norm
    data.extend(vec![1.0; rope_len]); // cos
    data.extend(vec![0.0; rope_len]); // sin

    ModelWeights::from_vec(WeightLayout::new(cfg, true).unwrap(), data).unwrap()
}

/// Tokenizer over a literal piece table.
pub(crate) fn toy_tokenizer(entries: &[(&str, f32)]) -> Tokenizer {
    Tokenizer::from_parts(
        entries.iter().map(|(p, _)| p.to_string()).collect(),
        entries.iter().map(|(_, s)| *s).collect(),
    )
}
