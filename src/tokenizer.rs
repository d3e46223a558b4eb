//! Binary tokenizer loading, BPE encoding and piece decoding.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::{EngineError, Result};

/// Unknown-piece control id.
pub const TOKEN_UNK: i32 = 0;
/// Beginning-of-sequence control id.
pub const TOKEN_BOS: i32 = 1;
/// End-of-sequence control id.
pub const TOKEN_EOS: i32 = 2;

/// First raw-byte fallback id; byte `b` encodes as `b + BYTE_OFFSET`.
const BYTE_OFFSET: usize = 3;

/// True for the control ids that never carry prompt text.
#[inline]
pub fn is_reserved(token: i32) -> bool {
    matches!(token, TOKEN_UNK | TOKEN_BOS | TOKEN_EOS)
}

/// Vocabulary with merge scores, loaded from the binary sidecar file.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    vocab: Vec<String>,
    scores: Vec<f32>,
    vocab_map: HashMap<String, i32>,
    max_token_len: u32,
}

/// Load a tokenizer from its binary file.
///
/// The format is a `u32` maximum piece length followed by `vocab_size`
/// records of `f32` merge score, `i32` byte length and the raw piece bytes.
pub fn load_tokenizer<P: AsRef<Path>>(path: P, vocab_size: usize) -> Result<Tokenizer> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let max_token_len = reader.read_u32::<LittleEndian>()?;

    let mut vocab = Vec::with_capacity(vocab_size);
    let mut scores = Vec::with_capacity(vocab_size);
    let mut vocab_map = HashMap::with_capacity(vocab_size);

    for i in 0..vocab_size {
        let score = reader.read_f32::<LittleEndian>()?;
        scores.push(score);

        let len = reader.read_i32::<LittleEndian>()?;
        if len < 0 {
            return Err(EngineError::Tokenizer(format!(
                "piece {i} has negative length {len}"
            )));
        }
        let mut buf = vec![0u8; len as usize];
        reader.read_exact(&mut buf)?;

        let piece = String::from_utf8_lossy(&buf).into_owned();
        vocab_map.insert(piece.clone(), i as i32);
        vocab.push(piece);
    }

    Ok(Tokenizer { vocab, scores, vocab_map, max_token_len })
}

impl Tokenizer {
    /// Assemble a tokenizer from in-memory pieces, for test fixtures.
    #[cfg(test)]
    pub(crate) fn from_parts(vocab: Vec<String>, scores: Vec<f32>) -> Tokenizer {
        let vocab_map = vocab
            .iter()
            .enumerate()
            .map(|(i, p)| (p.clone(), i as i32))
            .collect();
        let max_token_len = vocab.iter().map(|p| p.len()).max().unwrap_or(0) as u32;
        Tokenizer { vocab, scores, vocab_map, max_token_len }
    }

    /// Number of vocabulary entries.
    #[inline]
    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    /// Longest piece length declared by the file, in bytes.
    #[inline]
    pub fn max_token_len(&self) -> u32 {
        self.max_token_len
    }

    /// Encode text into token ids by greedy highest-score pair merging.
    ///
    /// Non-empty text gets a dummy prefix space before the first character.
    /// Characters missing from the vocabulary fall back to one token per
    /// UTF-8 byte at the byte-fallback offset.
    pub fn encode(&self, text: &str, bos: bool, eos: bool) -> Result<Vec<i32>> {
        let mut tokens: Vec<i32> = Vec::with_capacity(text.len() + 3);

        if bos {
            tokens.push(TOKEN_BOS);
        }

        if !text.is_empty() {
            let dummy_prefix = self.vocab_map.get(" ").ok_or_else(|| {
                EngineError::Tokenizer("dummy prefix \" \" not found in vocabulary".into())
            })?;
            tokens.push(*dummy_prefix);
        }

        let mut char_buf = [0u8; 4];
        for c in text.chars() {
            let piece = c.encode_utf8(&mut char_buf);
            if let Some(&id) = self.vocab_map.get(&*piece) {
                tokens.push(id);
            } else {
                // Byte fallback; a byte id past the vocabulary can only come
                // from a malformed sidecar and degrades to unknown.
                for &b in piece.as_bytes() {
                    let id = b as usize + BYTE_OFFSET;
                    tokens.push(if id < self.vocab.len() { id as i32 } else { TOKEN_UNK });
                }
            }
        }

        // Merge the best-scoring adjacent pair until none merges.
        loop {
            let mut best_score = f32::NEG_INFINITY;
            let mut best_id = TOKEN_UNK;
            let mut best_idx = None;

            for i in 0..tokens.len().saturating_sub(1) {
                let merged = format!(
                    "{}{}",
                    self.vocab[tokens[i] as usize],
                    self.vocab[tokens[i + 1] as usize]
                );
                if let Some(&id) = self.vocab_map.get(&merged) {
                    if self.scores[id as usize] > best_score {
                        best_score = self.scores[id as usize];
                        best_id = id;
                        best_idx = Some(i);
                    }
                }
            }

            let Some(idx) = best_idx else { break };
            tokens[idx] = best_id;
            tokens.remove(idx + 1);
        }

        if eos {
            tokens.push(TOKEN_EOS);
        }

        Ok(tokens)
    }

    /// Resolve a token id to its display fragment.
    ///
    /// Raw-byte pieces like `<0x0A>` resolve to their character when it is
    /// printable or whitespace and to nothing otherwise. Out-of-range ids
    /// also resolve to nothing.
    pub fn decode(&self, token: i32) -> Option<Cow<'_, str>> {
        let piece = self.vocab.get(usize::try_from(token).ok()?)?;
        match parse_byte_piece(piece) {
            Some(byte) => {
                let c = char::from(byte);
                if c.is_ascii_graphic() || c.is_ascii_whitespace() {
                    Some(Cow::Owned(c.to_string()))
                } else {
                    None
                }
            }
            None => Some(Cow::Borrowed(piece.as_str())),
        }
    }
}

fn parse_byte_piece(piece: &str) -> Option<u8> {
    let hex = piece.strip_prefix("<0x")?.strip_suffix('>')?;
    if hex.len() != 2 {
        return None;
    }
    u8::from_str_radix(hex, 16).ok()
}
