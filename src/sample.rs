//! Token selection from the logit vector.

use rand::{Rng, RngExt};

use crate::ops::softmax;

/// Probability paired with its vocabulary index, for nucleus sorting.
#[derive(Clone, Copy)]
struct ProbIndex {
    prob: f32,
    index: usize,
}

/// Pick the next token id from raw logits.
///
/// Temperature 0 is greedy decoding: the lowest index among maximal logits
/// wins and the RNG is never consulted. A positive temperature divides the
/// logits before softmax; `top_p` inside (0, 1) then restricts the draw to
/// the smallest prefix of the sorted distribution whose mass exceeds it,
/// while values outside that interval leave the full distribution in play.
/// Rounding in a CDF walk can leave the draw past every bucket, in which
/// case the last candidate is returned.
///
/// Options validation rejects negative temperatures before the decode loop
/// starts; reaching this function with one is a caller bug.
pub fn sample<R: Rng>(logits: &mut [f32], temperature: f32, top_p: f32, rng: &mut R) -> i32 {
    assert!(temperature >= 0.0, "negative temperature {temperature}");

    // Greedy decoding.
    if temperature == 0.0 {
        return argmax(logits) as i32;
    }

    // Scale by temperature, then normalize.
    for l in logits.iter_mut() {
        *l /= temperature;
    }
    softmax(logits);

    let r: f32 = rng.random();
    if top_p <= 0.0 || top_p >= 1.0 {
        multinomial(logits, r)
    } else {
        nucleus(logits, top_p, r)
    }
}

/// Index of the maximum element; ties resolve to the lowest index.
#[inline]
fn argmax(x: &[f32]) -> usize {
    let mut max_idx = 0;
    let mut max_val = x[0];
    for (i, &v) in x.iter().enumerate().skip(1) {
        if v > max_val {
            max_val = v;
            max_idx = i;
        }
    }
    max_idx
}

/// Draw from the full distribution by walking the CDF.
fn multinomial(probs: &[f32], r: f32) -> i32 {
    let mut cdf = 0.0f32;
    for (i, &p) in probs.iter().enumerate() {
        cdf += p;
        if r < cdf {
            return i as i32;
        }
    }
    // Rounding left the draw past every bucket.
    (probs.len() - 1) as i32
}

/// Draw from the smallest probability prefix whose mass exceeds `top_p`.
fn nucleus(probs: &[f32], top_p: f32, r: f32) -> i32 {
    let mut ranked: Vec<ProbIndex> = probs
        .iter()
        .enumerate()
        .map(|(index, &prob)| ProbIndex { prob, index })
        .collect();
    // Probabilities come out of softmax, never NaN.
    ranked.sort_unstable_by(|a, b| b.prob.total_cmp(&a.prob));

    let mut cutoff = ranked.len() - 1;
    let mut mass = 0.0f32;
    for (i, pi) in ranked.iter().enumerate() {
        mass += pi.prob;
        if mass > top_p {
            cutoff = i;
            break;
        }
    }

    // Rescale the draw into the truncated distribution.
    let r = r * mass;
    let mut cdf = 0.0f32;
    for pi in &ranked[..=cutoff] {
        cdf += pi.prob;
        if r < cdf {
            return pi.index as i32;
        }
    }
    ranked[cutoff].index as i32
}
