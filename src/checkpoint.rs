//! Binary Checkpoint Format
//!
//! A checkpoint is a 1024-byte header followed by the flat parameter
//! buffer, everything little-endian:
//!
//! ```text
//! header: 256 x i32
//!   [0] magic   20240326
//!   [1] version 1
//!   [2] max_seq_len   [3] vocab_size   [4] num_layers
//!   [5] num_heads     [6] channels
//!   [7..] zero padding
//! payload: num_parameters x f32, in ParamTensor order
//! ```
//!
//! The payload is the parameter buffer verbatim, so loading is a header
//! parse plus one bulk read, and saving is the reverse. Header problems
//! (wrong magic, unknown version, inconsistent dimensions) and a payload
//! shorter than the header implies are reported as typed errors.

use crate::config::Gpt2Config;
use crate::error::{Result, TouchstoneError};
use crate::layout::ParameterBuffer;
use crate::model::Gpt2;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

pub const CHECKPOINT_MAGIC: i32 = 20240326;
pub const CHECKPOINT_VERSION: i32 = 1;

const HEADER_WORDS: usize = 256;

/// Load a model from a checkpoint file.
pub fn load_checkpoint<P: AsRef<Path>>(path: P) -> Result<Gpt2> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let mut header_bytes = [0u8; HEADER_WORDS * 4];
    reader.read_exact(&mut header_bytes)?;
    let word = |i: usize| {
        i32::from_le_bytes([
            header_bytes[i * 4],
            header_bytes[i * 4 + 1],
            header_bytes[i * 4 + 2],
            header_bytes[i * 4 + 3],
        ])
    };

    if word(0) != CHECKPOINT_MAGIC {
        return Err(TouchstoneError::BadMagic {
            expected: CHECKPOINT_MAGIC,
            found: word(0),
        });
    }
    if word(1) != CHECKPOINT_VERSION {
        return Err(TouchstoneError::BadVersion { found: word(1) });
    }

    let dim = |i: usize, name: &str| -> Result<usize> {
        let v = word(i);
        usize::try_from(v)
            .map_err(|_| TouchstoneError::InvalidConfig(format!("{} is negative: {}", name, v)))
    };
    let config = Gpt2Config {
        max_seq_len: dim(2, "max_seq_len")?,
        vocab_size: dim(3, "vocab_size")?,
        num_layers: dim(4, "num_layers")?,
        num_heads: dim(5, "num_heads")?,
        channels: dim(6, "channels")?,
    };
    config.validate()?;

    let mut params = ParameterBuffer::zeros(&config)?;
    let expected = params.len();
    let mut bytes = vec![0u8; expected * 4];
    let mut filled = 0;
    while filled < bytes.len() {
        let n = reader.read(&mut bytes[filled..])?;
        if n == 0 {
            return Err(TouchstoneError::TruncatedCheckpoint {
                expected,
                found: filled / 4,
            });
        }
        filled += n;
    }
    for (p, chunk) in params.as_mut_slice().iter_mut().zip(bytes.chunks_exact(4)) {
        *p = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }

    Ok(Gpt2::from_parts(config, params))
}

/// Write a model's parameters as a checkpoint file.
pub fn save_checkpoint<P: AsRef<Path>>(model: &Gpt2, path: P) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    let config = model.config();
    let mut header = [0i32; HEADER_WORDS];
    header[0] = CHECKPOINT_MAGIC;
    header[1] = CHECKPOINT_VERSION;
    header[2] = config.max_seq_len as i32;
    header[3] = config.vocab_size as i32;
    header[4] = config.num_layers as i32;
    header[5] = config.num_heads as i32;
    header[6] = config.channels as i32;
    let mut buf = Vec::with_capacity(HEADER_WORDS * 4);
    for w in header {
        buf.extend_from_slice(&w.to_le_bytes());
    }
    writer.write_all(&buf)?;

    for chunk in model.params().chunks(16 * 1024) {
        buf.clear();
        for &p in chunk {
            buf.extend_from_slice(&p.to_le_bytes());
        }
        writer.write_all(&buf)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("touchstone-{}-{}", std::process::id(), name))
    }

    fn write_header(path: &Path, magic: i32, version: i32) {
        let mut bytes = vec![0u8; HEADER_WORDS * 4];
        bytes[..4].copy_from_slice(&magic.to_le_bytes());
        bytes[4..8].copy_from_slice(&version.to_le_bytes());
        // a syntactically valid tiny config
        let config = Gpt2Config::tiny();
        for (i, v) in [
            config.max_seq_len,
            config.vocab_size,
            config.num_layers,
            config.num_heads,
            config.channels,
        ]
        .iter()
        .enumerate()
        {
            let off = (2 + i) * 4;
            bytes[off..off + 4].copy_from_slice(&(*v as i32).to_le_bytes());
        }
        fs::write(path, bytes).unwrap();
    }

    #[test]
    fn rejects_bad_magic() {
        let path = temp_path("bad-magic.bin");
        write_header(&path, 12345, CHECKPOINT_VERSION);
        let err = load_checkpoint(&path).unwrap_err();
        assert!(matches!(err, TouchstoneError::BadMagic { found: 12345, .. }));
        fs::remove_file(&path).ok();
    }

    #[test]
    fn rejects_bad_version() {
        let path = temp_path("bad-version.bin");
        write_header(&path, CHECKPOINT_MAGIC, 99);
        let err = load_checkpoint(&path).unwrap_err();
        assert!(matches!(err, TouchstoneError::BadVersion { found: 99 }));
        fs::remove_file(&path).ok();
    }

    #[test]
    fn rejects_truncated_payload() {
        let path = temp_path("truncated.bin");
        write_header(&path, CHECKPOINT_MAGIC, CHECKPOINT_VERSION);
        // header only, zero of the expected parameters
        let err = load_checkpoint(&path).unwrap_err();
        assert!(matches!(
            err,
            TouchstoneError::TruncatedCheckpoint { found: 0, .. }
        ));
        fs::remove_file(&path).ok();
    }

    #[test]
    fn save_load_roundtrip_is_bit_exact() {
        let path = temp_path("roundtrip.bin");
        let model = Gpt2::random(Gpt2Config::tiny(), 99).unwrap();
        save_checkpoint(&model, &path).unwrap();

        let loaded = load_checkpoint(&path).unwrap();
        assert_eq!(loaded.config(), model.config());
        assert_eq!(loaded.num_parameters(), model.num_parameters());
        for (a, b) in loaded.params().iter().zip(model.params()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
        fs::remove_file(&path).ok();
    }
}
