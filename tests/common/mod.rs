//! Builders for on-disk fixtures: small random checkpoints in both
//! container formats and a byte-complete tokenizer sidecar.

use byteorder::{LittleEndian, WriteBytesExt};
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};
use tempfile::NamedTempFile;
use tinylm::ModelConfig;
use tinylm::checkpoint::{V1_HEADER_LEN, V1_MAGIC, V1_VERSION};

pub fn small_config() -> ModelConfig {
    ModelConfig {
        dim: 8,
        hidden_dim: 16,
        n_layers: 2,
        n_heads: 2,
        n_kv_heads: 2,
        vocab_size: 261,
        seq_len: 16,
    }
}

pub fn gqa_config() -> ModelConfig {
    ModelConfig { n_kv_heads: 1, ..small_config() }
}

fn noise(rng: &mut StdRng, n: usize) -> Vec<f32> {
    (0..n).map(|_| rng.random::<f32>() * 0.2 - 0.1).collect()
}

fn norm_weights(rng: &mut StdRng, n: usize) -> Vec<f32> {
    (0..n).map(|_| 1.0 + rng.random::<f32>() * 0.1 - 0.05).collect()
}

/// Full tensor payload in checkpoint order: small random projections,
/// near-unit norms and genuine rotary tables.
pub fn model_payload(cfg: &ModelConfig, shared: bool, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let dim = cfg.dim;
    let hidden = cfg.hidden_dim;
    let layers = cfg.n_layers;
    let vocab = cfg.vocab_size;
    let kv_dim = cfg.kv_dim();
    let head_size = cfg.head_size();

    let mut data = noise(&mut rng, vocab * dim);
    data.extend(norm_weights(&mut rng, layers * dim));
    data.extend(noise(&mut rng, layers * dim * dim));
    data.extend(noise(&mut rng, layers * kv_dim * dim));
    data.extend(noise(&mut rng, layers * kv_dim * dim));
    data.extend(noise(&mut rng, layers * dim * dim));
    data.extend(norm_weights(&mut rng, layers * dim));
    data.extend(noise(&mut rng, layers * hidden * dim));
    data.extend(noise(&mut rng, layers * dim * hidden));
    data.extend(noise(&mut rng, layers * hidden * dim));
    data.extend(norm_weights(&mut rng, dim));

    // Rotary tables with the standard inverse-power frequencies.
    let half = head_size / 2;
    let mut cos = Vec::with_capacity(cfg.seq_len * half);
    let mut sin = Vec::with_capacity(cfg.seq_len * half);
    for pos in 0..cfg.seq_len {
        for i in 0..half {
            let freq = 1.0 / 10000f32.powf(2.0 * i as f32 / head_size as f32);
            let angle = pos as f32 * freq;
            cos.push(angle.cos());
            sin.push(angle.sin());
        }
    }
    data.extend(cos);
    data.extend(sin);

    if !shared {
        data.extend(noise(&mut rng, vocab * dim));
    }
    data
}

pub fn legacy_checkpoint(cfg: &ModelConfig, shared: bool, payload: &[f32]) -> Vec<u8> {
    let mut out = Vec::new();
    for v in [cfg.dim, cfg.hidden_dim, cfg.n_layers, cfg.n_heads, cfg.n_kv_heads] {
        out.write_i32::<LittleEndian>(v as i32).unwrap();
    }
    let vocab = cfg.vocab_size as i32;
    out.write_i32::<LittleEndian>(if shared { vocab } else { -vocab }).unwrap();
    out.write_i32::<LittleEndian>(cfg.seq_len as i32).unwrap();
    for &v in payload {
        out.write_f32::<LittleEndian>(v).unwrap();
    }
    out
}

pub fn v1_checkpoint(cfg: &ModelConfig, shared: bool, payload: &[f32]) -> Vec<u8> {
    let mut out = Vec::new();
    out.write_u32::<LittleEndian>(V1_MAGIC).unwrap();
    out.write_i32::<LittleEndian>(V1_VERSION).unwrap();
    for v in [
        cfg.dim,
        cfg.hidden_dim,
        cfg.n_layers,
        cfg.n_heads,
        cfg.n_kv_heads,
        cfg.vocab_size,
        cfg.seq_len,
    ] {
        out.write_i32::<LittleEndian>(v as i32).unwrap();
    }
    out.push(if shared { 1 } else { 0 });
    out.resize(V1_HEADER_LEN, 0);
    for &v in payload {
        out.write_f32::<LittleEndian>(v).unwrap();
    }
    out
}

/// Sidecar bytes for the standard 261-entry test vocabulary: three control
/// pieces, all 256 byte pieces at the fallback offset, then " " and "a".
pub fn tokenizer_file() -> Vec<u8> {
    let mut pieces: Vec<(String, f32)> =
        vec![("<unk>".into(), 0.0), ("<s>".into(), 0.0), ("</s>".into(), 0.0)];
    for b in 0..=255u8 {
        pieces.push((format!("<0x{b:02X}>"), -100.0));
    }
    pieces.push((" ".into(), -1.0));
    pieces.push(("a".into(), -2.0));

    let max_len = pieces.iter().map(|(p, _)| p.len()).max().unwrap() as u32;
    let mut out = Vec::new();
    out.write_u32::<LittleEndian>(max_len).unwrap();
    for (piece, score) in &pieces {
        out.write_f32::<LittleEndian>(*score).unwrap();
        out.write_i32::<LittleEndian>(piece.len() as i32).unwrap();
        out.extend_from_slice(piece.as_bytes());
    }
    out
}

pub fn write_temp(bytes: &[u8]) -> NamedTempFile {
    let file = NamedTempFile::new().unwrap();
    std::fs::write(file.path(), bytes).unwrap();
    file
}
