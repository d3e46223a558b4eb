//! Core numeric operations for the forward pass.

use rayon::prelude::*;

/// RMSNorm epsilon added to the mean square before the square root.
pub const RMS_EPS: f32 = 1e-5;

/// RMS normalization: `dest[i] = weight[i] * src[i] / sqrt(mean(src^2) + eps)`.
///
/// No mean subtraction, which is what separates this from LayerNorm.
#[inline]
pub fn rms_norm(dest: &mut [f32], src: &[f32], weight: &[f32]) {
    let n = src.len();
    let ss: f32 = src.iter().map(|v| v * v).sum();
    let inv = 1.0 / (ss / n as f32 + RMS_EPS).sqrt();
    for i in 0..dest.len() {
        dest[i] = weight[i] * (inv * src[i]);
    }
}

/// Matrix-vector product `xout = w @ x`, w row-major `(out_dim, in_dim)`.
///
/// Output rows are independent and computed in parallel; each row's dot
/// product stays sequential, so the result is identical to a serial run.
#[inline]
pub fn matmul(xout: &mut [f32], x: &[f32], w: &[f32]) {
    let in_dim = x.len();
    xout.par_iter_mut().enumerate().for_each(|(i, out)| {
        let off = i * in_dim;
        let mut val = 0.0f32;
        for j in 0..in_dim {
            val += w[off + j] * x[j];
        }
        *out = val;
    });
}

/// Element-wise accumulation: a += b.
#[inline]
pub fn accum(a: &mut [f32], b: &[f32]) {
    for (ai, bi) in a.iter_mut().zip(b.iter()) {
        *ai += *bi;
    }
}

/// Softmax in-place, max-subtracted for numerical stability.
#[inline]
pub fn softmax(x: &mut [f32]) {
    if x.is_empty() {
        return;
    }
    let max_val = x.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0f32;
    for xi in x.iter_mut() {
        *xi = (*xi - max_val).exp();
        sum += *xi;
    }
    for xi in x.iter_mut() {
        *xi /= sum;
    }
}

/// Rotate adjacent pairs of `x` by the per-pair angles in `cos_row`/`sin_row`.
///
/// `x` holds one or more complete heads back to back; the pair index resets
/// at each head boundary, so the same `head_size / 2` table row serves every
/// head. This is the rotary position embedding applied to a query or key
/// vector at one position.
#[inline]
pub fn rotate(x: &mut [f32], cos_row: &[f32], sin_row: &[f32], head_size: usize) {
    let mut i = 0;
    while i < x.len() {
        let pair = (i % head_size) / 2;
        let fcr = cos_row[pair];
        let fci = sin_row[pair];

        let x0 = x[i];
        let x1 = x[i + 1];
        x[i] = x0 * fcr - x1 * fci;
        x[i + 1] = x0 * fci + x1 * fcr;

        i += 2;
    }
}

/// SwiGLU activation: gate = gate * sigmoid(gate) * up.
#[inline]
pub fn swiglu(gate: &mut [f32], up: &[f32]) {
    for (g, u) in gate.iter_mut().zip(up.iter()) {
        let sigmoid = 1.0 / (1.0 + (-*g).exp());
        *g = *g * sigmoid * u;
    }
}
