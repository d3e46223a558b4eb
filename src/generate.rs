//! Autoregressive decode loop.
//!
//! Drives the forward pass and the sampler position by position: prompt
//! tokens are forced in order, then sampling takes over, and decoded
//! fragments stream to a caller-supplied sink as they are chosen.

use std::io::Write;
use std::time::Instant;

use rand::Rng;

use crate::config::ModelConfig;
use crate::error::{EngineError, Result};
use crate::model::forward;
use crate::sample::sample;
use crate::state::RunState;
use crate::tokenizer::{TOKEN_BOS, Tokenizer, is_reserved};
use crate::weights::ModelWeights;

/// Session options assembled once before the decode loop starts.
#[derive(Debug, Clone, Copy)]
pub struct GenerateOptions {
    /// Sampling temperature; 0 selects greedy decoding.
    pub temperature: f32,
    /// Nucleus cutoff; values outside (0, 1) disable nucleus truncation.
    pub top_p: f32,
    /// Step budget; 0 means the full context, larger values clamp to it.
    pub steps: usize,
    /// Halt without emitting when a control id is chosen.
    pub stop_on_special: bool,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        GenerateOptions { temperature: 1.0, top_p: 0.9, steps: 256, stop_on_special: true }
    }
}

impl GenerateOptions {
    /// Reject option values the sampler has no defined behavior for.
    pub fn validate(&self) -> Result<()> {
        if self.temperature.is_nan() || self.temperature < 0.0 {
            return Err(EngineError::InvalidSampling(format!(
                "temperature must be >= 0, got {}",
                self.temperature
            )));
        }
        if self.top_p.is_nan() {
            return Err(EngineError::InvalidSampling("top_p must not be NaN".into()));
        }
        Ok(())
    }
}

/// Decode-loop control state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Forcing prompt tokens; sampled distributions are discarded.
    ProcessingPrompt,
    /// Sampling freely.
    Generating,
    /// Terminal; the loop exits.
    Stopped,
}

/// Summary of one generation session.
#[derive(Debug, Clone, Copy)]
pub struct GenerationStats {
    /// Prompt tokens supplied by the caller.
    pub prompt_tokens: usize,
    /// Forward passes run.
    pub steps: usize,
    /// Text fragments written to the sink.
    pub emitted: usize,
    /// Wall-clock throughput between the first and last emission; absent
    /// with fewer than two emissions.
    pub tokens_per_sec: Option<f64>,
}

/// Drive the model autoregressively, streaming decoded fragments to `out`.
///
/// The session starts from the BOS sentinel at position 0. While prompt
/// tokens remain they are forced in order and the sampled distribution is
/// discarded; afterwards the sampler picks every next token. The loop halts
/// once the step budget (clamped to the context length) is spent, or, with
/// `stop_on_special` set, as soon as a control id is chosen, in which case
/// that step emits nothing.
#[allow(clippy::too_many_arguments)]
pub fn generate<R: Rng, W: Write>(
    config: &ModelConfig,
    weights: &ModelWeights,
    tokenizer: &Tokenizer,
    state: &mut RunState,
    prompt_tokens: &[i32],
    opts: &GenerateOptions,
    rng: &mut R,
    out: &mut W,
) -> Result<GenerationStats> {
    opts.validate()?;
    if let Some(&bad) =
        prompt_tokens.iter().find(|&&t| t < 0 || t as usize >= config.vocab_size)
    {
        return Err(EngineError::InvalidToken { token: bad, vocab_size: config.vocab_size });
    }

    let budget = if opts.steps == 0 { config.seq_len } else { opts.steps.min(config.seq_len) };

    let mut token = TOKEN_BOS;
    let mut pos = 0usize;
    let mut phase =
        if prompt_tokens.is_empty() { Phase::Generating } else { Phase::ProcessingPrompt };

    let mut steps = 0usize;
    let mut emitted = 0usize;
    let mut first_emit = None;
    let mut last_emit = None;

    while phase != Phase::Stopped {
        if pos >= budget {
            phase = Phase::Stopped;
            continue;
        }

        forward(token, pos, config, state, weights)?;
        steps += 1;

        let next = if pos < prompt_tokens.len() {
            prompt_tokens[pos]
        } else {
            phase = Phase::Generating;
            sample(&mut state.logits, opts.temperature, opts.top_p, rng)
        };

        if opts.stop_on_special && is_reserved(next) {
            phase = Phase::Stopped;
            continue;
        }

        if let Some(piece) = tokenizer.decode(next) {
            // Decoding convention: one leading space is implicit after BOS.
            let mut text: &str = &piece;
            if token == TOKEN_BOS {
                text = text.strip_prefix(' ').unwrap_or(text);
            }
            if !text.is_empty() {
                out.write_all(text.as_bytes())?;
                out.flush()?;
                let now = Instant::now();
                first_emit.get_or_insert(now);
                last_emit = Some(now);
                emitted += 1;
            }
        }

        token = next;
        pos += 1;
    }

    let tokens_per_sec = match (first_emit, last_emit) {
        (Some(first), Some(last)) if emitted >= 2 => {
            let secs = last.duration_since(first).as_secs_f64();
            (secs > 0.0).then(|| (emitted - 1) as f64 / secs)
        }
        _ => None,
    };

    Ok(GenerationStats { prompt_tokens: prompt_tokens.len(), steps, emitted, tokens_per_sec })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{rigged_weights, toy_tokenizer};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn config() -> ModelConfig {
        ModelConfig {
            dim: 4,
            hidden_dim: 4,
            n_layers: 1,
            n_heads: 2,
            n_kv_heads: 2,
            vocab_size: 8,
            seq_len: 6,
        }
    }

    /// Every row positive, one row large enough to win every dot product
    /// with the (positive) normalized stream, so greedy decoding always
    /// picks `peak`.
    fn embedding_with_peak(peak: usize) -> Vec<f32> {
        let mut rows = vec![
            [0.1, 0.2, 0.1, 0.3],
            [0.5, 0.1, 0.4, 0.2],
            [0.35, 0.45, 0.55, 0.25],
            [0.3, 0.7, 0.2, 0.4],
            [0.9, 0.1, 0.6, 0.5],
            [0.4, 0.8, 0.3, 0.9],
            [0.2, 0.5, 0.7, 0.1],
            [0.6, 0.3, 0.9, 0.8],
        ];
        rows[peak] = [5.0, 5.0, 5.0, 5.0];
        rows.concat()
    }

    fn tokenizer() -> Tokenizer {
        toy_tokenizer(&[
            ("<unk>", 0.0),
            ("<s>", 0.0),
            ("</s>", 0.0),
            (" the", 0.0),
            (" quick", 0.0),
            (" fox", 0.0),
            (" jumps", 0.0),
            (" over", 0.0),
        ])
    }

    fn greedy(steps: usize, stop_on_special: bool) -> GenerateOptions {
        GenerateOptions { temperature: 0.0, top_p: 0.9, steps, stop_on_special }
    }

    #[test]
    fn prompt_tokens_are_forced_in_order() {
        let cfg = config();
        let weights = rigged_weights(&cfg, embedding_with_peak(2));
        let tok = tokenizer();
        let mut state = RunState::new(&cfg);
        let mut out = Vec::new();

        let stats = generate(
            &cfg,
            &weights,
            &tok,
            &mut state,
            &[5, 7],
            &greedy(6, true),
            &mut StdRng::seed_from_u64(0),
            &mut out,
        )
        .unwrap();

        // " fox" loses its leading space right after BOS, " over" keeps it,
        // and the first sampled token is the EOS peak, which stops the loop
        // without emitting.
        assert_eq!(String::from_utf8(out).unwrap(), "fox over");
        assert_eq!(stats.prompt_tokens, 2);
        assert_eq!(stats.steps, 3);
        assert_eq!(stats.emitted, 2);
    }

    #[test]
    fn sampled_bos_halts_without_emitting() {
        let cfg = config();
        let weights = rigged_weights(&cfg, embedding_with_peak(1));
        let tok = tokenizer();
        let mut state = RunState::new(&cfg);
        let mut out = Vec::new();

        let stats = generate(
            &cfg,
            &weights,
            &tok,
            &mut state,
            &[5, 7],
            &greedy(6, true),
            &mut StdRng::seed_from_u64(0),
            &mut out,
        )
        .unwrap();

        // The third step samples BOS and halts before emitting anything
        // for it.
        assert_eq!(String::from_utf8(out).unwrap(), "fox over");
        assert_eq!(stats.steps, 3);
        assert_eq!(stats.emitted, 2);
    }

    #[test]
    fn stop_flag_off_rides_through_control_ids() {
        let cfg = config();
        let weights = rigged_weights(&cfg, embedding_with_peak(2));
        let tok = tokenizer();
        let mut state = RunState::new(&cfg);
        let mut out = Vec::new();

        let stats = generate(
            &cfg,
            &weights,
            &tok,
            &mut state,
            &[],
            &greedy(3, false),
            &mut StdRng::seed_from_u64(0),
            &mut out,
        )
        .unwrap();

        assert_eq!(String::from_utf8(out).unwrap(), "</s></s></s>");
        assert_eq!(stats.steps, 3);
        assert_eq!(stats.emitted, 3);
    }

    #[test]
    fn zero_step_budget_means_full_context() {
        let cfg = config();
        let weights = rigged_weights(&cfg, embedding_with_peak(3));
        let tok = tokenizer();
        let mut state = RunState::new(&cfg);
        let mut out = Vec::new();

        let stats = generate(
            &cfg,
            &weights,
            &tok,
            &mut state,
            &[],
            &greedy(0, true),
            &mut StdRng::seed_from_u64(0),
            &mut out,
        )
        .unwrap();

        assert_eq!(stats.steps, cfg.seq_len);
        assert_eq!(String::from_utf8(out).unwrap(), "the the the the the the");
    }

    #[test]
    fn oversized_step_budget_clamps_to_context() {
        let cfg = config();
        let weights = rigged_weights(&cfg, embedding_with_peak(3));
        let tok = tokenizer();
        let mut state = RunState::new(&cfg);
        let mut out = Vec::new();

        let stats = generate(
            &cfg,
            &weights,
            &tok,
            &mut state,
            &[],
            &greedy(100, true),
            &mut StdRng::seed_from_u64(0),
            &mut out,
        )
        .unwrap();

        assert_eq!(stats.steps, cfg.seq_len);
    }

    #[test]
    fn seeded_sampling_is_reproducible() {
        let cfg = config();
        let weights = rigged_weights(&cfg, embedding_with_peak(2));
        let tok = tokenizer();
        let opts =
            GenerateOptions { temperature: 0.9, top_p: 0.9, steps: 5, stop_on_special: false };

        let mut sinks = Vec::new();
        for _ in 0..2 {
            let mut state = RunState::new(&cfg);
            let mut out = Vec::new();
            generate(
                &cfg,
                &weights,
                &tok,
                &mut state,
                &[4],
                &opts,
                &mut StdRng::seed_from_u64(11),
                &mut out,
            )
            .unwrap();
            sinks.push(out);
        }

        assert_eq!(sinks[0], sinks[1]);
    }

    #[test]
    fn reset_state_reproduces_a_fresh_session() {
        let cfg = config();
        let weights = rigged_weights(&cfg, embedding_with_peak(4));
        let tok = tokenizer();
        let opts = greedy(5, false);
        let mut state = RunState::new(&cfg);

        let mut first = Vec::new();
        generate(
            &cfg,
            &weights,
            &tok,
            &mut state,
            &[3, 6],
            &opts,
            &mut StdRng::seed_from_u64(0),
            &mut first,
        )
        .unwrap();

        state.reset();
        let mut second = Vec::new();
        generate(
            &cfg,
            &weights,
            &tok,
            &mut state,
            &[3, 6],
            &opts,
            &mut StdRng::seed_from_u64(0),
            &mut second,
        )
        .unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn out_of_vocab_prompt_fails_before_any_step() {
        let cfg = config();
        let weights = rigged_weights(&cfg, embedding_with_peak(2));
        let tok = tokenizer();
        let mut state = RunState::new(&cfg);
        let mut out = Vec::new();

        let err = generate(
            &cfg,
            &weights,
            &tok,
            &mut state,
            &[3, 99],
            &greedy(6, true),
            &mut StdRng::seed_from_u64(0),
            &mut out,
        );

        assert!(matches!(err, Err(EngineError::InvalidToken { token: 99, .. })));
        assert!(out.is_empty());
    }

    #[test]
    fn negative_temperature_is_rejected_up_front() {
        let cfg = config();
        let weights = rigged_weights(&cfg, embedding_with_peak(2));
        let tok = tokenizer();
        let mut state = RunState::new(&cfg);
        let mut out = Vec::new();

        let opts =
            GenerateOptions { temperature: -0.5, top_p: 0.9, steps: 4, stop_on_special: true };
        let err = generate(
            &cfg,
            &weights,
            &tok,
            &mut state,
            &[],
            &opts,
            &mut StdRng::seed_from_u64(0),
            &mut out,
        );

        assert!(matches!(err, Err(EngineError::InvalidSampling(_))));
        assert!(out.is_empty());
    }
}
