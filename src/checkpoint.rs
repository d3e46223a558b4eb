//! Checkpoint container parsing and loading.
//!
//! Two containers carry the same tensor payload. The legacy container is a
//! bare 28-byte header of seven little-endian `i32`s where a negative vocab
//! size marks a separately stored classifier. The v1 container opens with a
//! fixed 256-byte header carrying magic bytes, a version and a flags byte,
//! which leaves the tensor region at a stable aligned offset. Either one
//! loads through a buffered read into owned memory or through a zero-copy
//! memory map.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::str::FromStr;

use byteorder::{LittleEndian, ReadBytesExt};
use memmap2::Mmap;

use crate::config::ModelConfig;
use crate::error::{EngineError, Result};
use crate::weights::{ModelWeights, WeightLayout};

/// Magic bytes opening a v1 checkpoint, `b"tlm1"` read as a LE u32.
pub const V1_MAGIC: u32 = u32::from_le_bytes(*b"tlm1");
/// The only v1 container version this build understands.
pub const V1_VERSION: i32 = 1;
/// Fixed v1 header size; tensor data starts right after it.
pub const V1_HEADER_LEN: usize = 256;

const LEGACY_HEADER_LEN: usize = 7 * 4;
const V1_FLAG_SHARED_CLASSIFIER: u8 = 1;

/// On-disk container layout of a checkpoint file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointFormat {
    /// Seven raw `i32` header fields, no magic.
    Legacy,
    /// 256-byte header with magic, version and flags.
    V1,
}

impl FromStr for CheckpointFormat {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "legacy" => Ok(CheckpointFormat::Legacy),
            "v1" => Ok(CheckpointFormat::V1),
            other => Err(EngineError::InvalidConfig(format!(
                "unknown checkpoint format {other:?}, expected \"legacy\" or \"v1\""
            ))),
        }
    }
}

/// Parsed header fields shared by both containers.
struct Header {
    config: ModelConfig,
    shared_classifier: bool,
    data_offset: usize,
}

/// Load config and weights from a checkpoint file.
///
/// `format` of `None` detects the container from the leading magic bytes.
/// With `use_mmap` the tensor region is borrowed from a memory map instead
/// of copied into owned buffers.
pub fn load_checkpoint<P: AsRef<Path>>(
    path: P,
    format: Option<CheckpointFormat>,
    use_mmap: bool,
) -> Result<(ModelConfig, ModelWeights)> {
    if use_mmap {
        load_mapped(path.as_ref(), format)
    } else {
        load_buffered(path.as_ref(), format)
    }
}

fn load_buffered(path: &Path, format: Option<CheckpointFormat>) -> Result<(ModelConfig, ModelWeights)> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);

    let mut head = [0u8; LEGACY_HEADER_LEN];
    reader.read_exact(&mut head)?;
    let format = format.unwrap_or_else(|| sniff(&head));

    let header = match format {
        CheckpointFormat::Legacy => parse_legacy_header(&head)?,
        CheckpointFormat::V1 => {
            let mut full = [0u8; V1_HEADER_LEN];
            full[..LEGACY_HEADER_LEN].copy_from_slice(&head);
            reader.read_exact(&mut full[LEGACY_HEADER_LEN..])?;
            parse_v1_header(&full)?
        }
    };
    header.config.validate()?;

    let layout = WeightLayout::new(&header.config, header.shared_classifier)?;
    expect_file_len(file_len, header.data_offset, layout.total_len())?;
    let data = read_f32_vec(&mut reader, layout.total_len())?;
    let weights = ModelWeights::from_vec(layout, data)?;
    Ok((header.config, weights))
}

fn load_mapped(path: &Path, format: Option<CheckpointFormat>) -> Result<(ModelConfig, ModelWeights)> {
    let file = File::open(path)?;
    // SAFETY: the map is private and read-only; nothing in the engine
    // writes to the file while the weights are alive.
    let map = unsafe { Mmap::map(&file)? };

    if map.len() < LEGACY_HEADER_LEN {
        return Err(EngineError::InvalidCheckpoint(format!(
            "checkpoint is {} bytes, too short for any header",
            map.len()
        )));
    }
    let format = format.unwrap_or_else(|| sniff(&map[..LEGACY_HEADER_LEN]));

    let header = match format {
        CheckpointFormat::Legacy => parse_legacy_header(&map[..LEGACY_HEADER_LEN])?,
        CheckpointFormat::V1 => {
            if map.len() < V1_HEADER_LEN {
                return Err(EngineError::InvalidCheckpoint(format!(
                    "checkpoint is {} bytes, too short for a v1 header",
                    map.len()
                )));
            }
            parse_v1_header(&map[..V1_HEADER_LEN])?
        }
    };
    header.config.validate()?;

    let layout = WeightLayout::new(&header.config, header.shared_classifier)?;
    let config = header.config;
    let weights = ModelWeights::from_mmap(layout, map, header.data_offset)?;
    Ok((config, weights))
}

fn sniff(head: &[u8]) -> CheckpointFormat {
    let magic = u32::from_le_bytes([head[0], head[1], head[2], head[3]]);
    if magic == V1_MAGIC { CheckpointFormat::V1 } else { CheckpointFormat::Legacy }
}

fn parse_legacy_header(bytes: &[u8]) -> Result<Header> {
    let mut r = bytes;
    let dim = r.read_i32::<LittleEndian>()?;
    let hidden_dim = r.read_i32::<LittleEndian>()?;
    let n_layers = r.read_i32::<LittleEndian>()?;
    let n_heads = r.read_i32::<LittleEndian>()?;
    let n_kv_heads = r.read_i32::<LittleEndian>()?;
    let raw_vocab = r.read_i32::<LittleEndian>()?;
    let seq_len = r.read_i32::<LittleEndian>()?;

    // Sign of the vocab size is the classifier-sharing flag.
    if raw_vocab == 0 {
        return Err(EngineError::InvalidCheckpoint(
            "header field vocab_size must be nonzero".into(),
        ));
    }
    let config = ModelConfig {
        dim: positive(dim, "dim")?,
        hidden_dim: positive(hidden_dim, "hidden_dim")?,
        n_layers: positive(n_layers, "n_layers")?,
        n_heads: positive(n_heads, "n_heads")?,
        n_kv_heads: positive(n_kv_heads, "n_kv_heads")?,
        vocab_size: raw_vocab.unsigned_abs() as usize,
        seq_len: positive(seq_len, "seq_len")?,
    };
    Ok(Header { config, shared_classifier: raw_vocab > 0, data_offset: LEGACY_HEADER_LEN })
}

fn parse_v1_header(bytes: &[u8]) -> Result<Header> {
    let mut r = bytes;
    let magic = r.read_u32::<LittleEndian>()?;
    if magic != V1_MAGIC {
        return Err(EngineError::InvalidCheckpoint(format!(
            "bad magic {magic:#010x}, expected {V1_MAGIC:#010x}"
        )));
    }
    let version = r.read_i32::<LittleEndian>()?;
    if version != V1_VERSION {
        return Err(EngineError::InvalidCheckpoint(format!(
            "unsupported checkpoint version {version}"
        )));
    }
    let config = ModelConfig {
        dim: positive(r.read_i32::<LittleEndian>()?, "dim")?,
        hidden_dim: positive(r.read_i32::<LittleEndian>()?, "hidden_dim")?,
        n_layers: positive(r.read_i32::<LittleEndian>()?, "n_layers")?,
        n_heads: positive(r.read_i32::<LittleEndian>()?, "n_heads")?,
        n_kv_heads: positive(r.read_i32::<LittleEndian>()?, "n_kv_heads")?,
        vocab_size: positive(r.read_i32::<LittleEndian>()?, "vocab_size")?,
        seq_len: positive(r.read_i32::<LittleEndian>()?, "seq_len")?,
    };
    let flags = r.read_u8()?;
    if flags & !V1_FLAG_SHARED_CLASSIFIER != 0 {
        return Err(EngineError::InvalidCheckpoint(format!(
            "unknown header flags {flags:#04x}"
        )));
    }
    // The rest of the 256 bytes is zero padding, not inspected.
    Ok(Header {
        config,
        shared_classifier: flags & V1_FLAG_SHARED_CLASSIFIER != 0,
        data_offset: V1_HEADER_LEN,
    })
}

fn positive(raw: i32, name: &str) -> Result<usize> {
    if raw <= 0 {
        return Err(EngineError::InvalidCheckpoint(format!(
            "header field {name} must be positive, got {raw}"
        )));
    }
    Ok(raw as usize)
}

fn expect_file_len(actual: u64, data_offset: usize, elements: usize) -> Result<()> {
    let expected = (elements as u64)
        .checked_mul(4)
        .and_then(|bytes| bytes.checked_add(data_offset as u64))
        .ok_or_else(|| {
            EngineError::InvalidCheckpoint("tensor region exceeds any valid file size".into())
        })?;
    if actual != expected {
        return Err(EngineError::InvalidCheckpoint(format!(
            "checkpoint is {actual} bytes, expected {expected}"
        )));
    }
    Ok(())
}

/// Read `count` little-endian f32 values into an owned buffer.
fn read_f32_vec<R: Read>(reader: &mut R, count: usize) -> Result<Vec<f32>> {
    let mut buf = vec![0f32; count];
    reader.read_f32_into::<LittleEndian>(&mut buf)?;
    Ok(buf)
}
