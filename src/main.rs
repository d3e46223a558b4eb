use std::env;
use std::io::{self, Write};

use rand::SeedableRng;
use rand::rngs::StdRng;

use tinylm::{CheckpointFormat, GenerateOptions, RunState, generate, load_checkpoint, load_tokenizer};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 3 {
        eprintln!("Usage: {} <checkpoint> <tokenizer> [prompt] [options]", args[0]);
        eprintln!("Options:");
        eprintln!("  --temp <float>      Temperature (default: 1.0, 0 = greedy)");
        eprintln!("  --topp <float>      Top-p sampling (default: 0.9)");
        eprintln!("  --steps <int>       Max positions to run (default: 256, 0 = full context)");
        eprintln!("  --seed <int>        Random seed (default: 0)");
        eprintln!("  --format <name>     Checkpoint format: legacy, v1 or auto (default: auto)");
        eprintln!("  --mmap              Memory-map the checkpoint instead of reading it");
        eprintln!("  --no-stop-special   Keep generating through control tokens");
        std::process::exit(1);
    }

    let checkpoint_path = &args[1];
    let tokenizer_path = &args[2];
    let (prompt, opt_start) = match args.get(3) {
        Some(s) if !s.starts_with("--") => (s.as_str(), 4),
        _ => ("", 3),
    };

    // Parse optional arguments
    let mut temperature = 1.0f32;
    let mut top_p = 0.9f32;
    let mut steps = 256usize;
    let mut seed = 0u64;
    let mut format: Option<CheckpointFormat> = None;
    let mut use_mmap = false;
    let mut stop_on_special = true;

    let mut i = opt_start;
    while i < args.len() {
        match args[i].as_str() {
            "--temp" => {
                temperature = args.get(i + 1).and_then(|s| s.parse().ok()).unwrap_or(1.0);
                i += 2;
            }
            "--topp" => {
                top_p = args.get(i + 1).and_then(|s| s.parse().ok()).unwrap_or(0.9);
                i += 2;
            }
            "--steps" => {
                steps = args.get(i + 1).and_then(|s| s.parse().ok()).unwrap_or(256);
                i += 2;
            }
            "--seed" => {
                seed = args.get(i + 1).and_then(|s| s.parse().ok()).unwrap_or(0);
                i += 2;
            }
            "--format" => {
                let value = args.get(i + 1).map(|s| s.as_str()).unwrap_or("auto");
                format = match value {
                    "auto" => None,
                    other => Some(other.parse()?),
                };
                i += 2;
            }
            "--mmap" => {
                use_mmap = true;
                i += 1;
            }
            "--no-stop-special" => {
                stop_on_special = false;
                i += 1;
            }
            _ => i += 1,
        }
    }

    let opts = GenerateOptions { temperature, top_p, steps, stop_on_special };

    // Load model and tokenizer
    eprintln!("Loading model from: {checkpoint_path}");
    let (config, weights) = load_checkpoint(checkpoint_path, format, use_mmap)?;
    eprintln!(
        "Config: dim={}, layers={}, heads={}, kv_heads={}, vocab={}, seq_len={}",
        config.dim, config.n_layers, config.n_heads, config.n_kv_heads, config.vocab_size, config.seq_len
    );

    let tokenizer = load_tokenizer(tokenizer_path, config.vocab_size)?;
    eprintln!("Loaded tokenizer with {} tokens", tokenizer.vocab_size());

    let mut state = RunState::new(&config);
    let mut rng = StdRng::seed_from_u64(seed);

    let prompt_tokens = tokenizer.encode(prompt, false, false)?;
    if !prompt_tokens.is_empty() {
        eprintln!("Prompt tokens: {prompt_tokens:?}");
    }

    // Generate to stdout as tokens are chosen
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let stats = generate(
        &config,
        &weights,
        &tokenizer,
        &mut state,
        &prompt_tokens,
        &opts,
        &mut rng,
        &mut out,
    )?;
    writeln!(out)?;

    if let Some(tps) = stats.tokens_per_sec {
        eprintln!("achieved tok/s: {tps:.2}");
    }

    Ok(())
}
