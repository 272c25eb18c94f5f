//! Token Stream Batching
//!
//! Training data is a flat binary file of `u32` token ids, little-endian,
//! produced by an external tokenization step. [`TokenDataLoader`] reads
//! the whole file once and serves (inputs, targets) batch pairs over it.
//!
//! A batch at position p covers `B*T + 1` consecutive tokens: inputs are
//! tokens `[p, p + B*T)` and targets the same window shifted by one, so
//! every input position's target is the next token in the stream. The
//! cursor advances by `B*T` per batch and wraps to the start when the next
//! window would run off the end, so iteration never terminates and epoch
//! boundaries land mid-stream.

use crate::error::{Result, TouchstoneError};
use std::fs;
use std::path::Path;

/// Serves fixed-shape next-token batches over a token file.
#[derive(Debug)]
pub struct TokenDataLoader {
    tokens: Vec<u32>,
    batch_size: usize,
    seq_len: usize,
    position: usize,
}

impl TokenDataLoader {
    /// Read a token file and prepare (b, t)-shaped batches.
    ///
    /// # Errors
    ///
    /// - `Io` if the file cannot be read
    /// - `DatasetTooSmall` if it holds fewer than `b*t + 1` tokens
    pub fn new<P: AsRef<Path>>(path: P, batch_size: usize, seq_len: usize) -> Result<Self> {
        let bytes = fs::read(path)?;
        let tokens: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Self::from_tokens(tokens, batch_size, seq_len)
    }

    /// Build a loader over an in-memory token stream.
    pub fn from_tokens(tokens: Vec<u32>, batch_size: usize, seq_len: usize) -> Result<Self> {
        let needed = batch_size * seq_len + 1;
        if tokens.len() < needed {
            return Err(TouchstoneError::DatasetTooSmall {
                needed,
                found: tokens.len(),
            });
        }
        Ok(Self {
            tokens,
            batch_size,
            seq_len,
            position: 0,
        })
    }

    /// Total tokens in the stream.
    pub fn num_tokens(&self) -> usize {
        self.tokens.len()
    }

    /// How many batches fit before the stream wraps.
    pub fn num_batches(&self) -> usize {
        self.tokens.len() / (self.batch_size * self.seq_len)
    }

    /// Rewind to the start of the stream.
    pub fn reset(&mut self) {
        self.position = 0;
    }

    /// The next (inputs, targets) pair, each `b*t` tokens, targets shifted
    /// one token ahead of inputs.
    pub fn next_batch(&mut self) -> (&[u32], &[u32]) {
        let span = self.batch_size * self.seq_len;
        if self.position + span + 1 > self.tokens.len() {
            self.position = 0;
        }
        let inputs = &self.tokens[self.position..self.position + span];
        let targets = &self.tokens[self.position + 1..self.position + span + 1];
        self.position += span;
        (inputs, targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_are_inputs_shifted_by_one() {
        let tokens: Vec<u32> = (0..20).collect();
        let mut loader = TokenDataLoader::from_tokens(tokens, 2, 3).unwrap();
        let (inputs, targets) = loader.next_batch();
        assert_eq!(inputs, &[0, 1, 2, 3, 4, 5]);
        assert_eq!(targets, &[1, 2, 3, 4, 5, 6]);
        let (inputs, _) = loader.next_batch();
        assert_eq!(inputs, &[6, 7, 8, 9, 10, 11]);
    }

    #[test]
    fn wraps_instead_of_running_off_the_end() {
        // 8 tokens, batches of 3: positions 0, 3, then 6+3+1 > 8 wraps
        let tokens: Vec<u32> = (0..8).collect();
        let mut loader = TokenDataLoader::from_tokens(tokens, 1, 3).unwrap();
        loader.next_batch();
        loader.next_batch();
        let (inputs, _) = loader.next_batch();
        assert_eq!(inputs, &[0, 1, 2]);
    }

    #[test]
    fn reset_rewinds() {
        let tokens: Vec<u32> = (0..16).collect();
        let mut loader = TokenDataLoader::from_tokens(tokens, 1, 4).unwrap();
        loader.next_batch();
        loader.reset();
        let (inputs, _) = loader.next_batch();
        assert_eq!(inputs, &[0, 1, 2, 3]);
        assert_eq!(loader.num_batches(), 4);
    }

    #[test]
    fn undersized_stream_is_rejected() {
        // b*t + 1 = 7 tokens needed
        let err = TokenDataLoader::from_tokens(vec![0; 6], 2, 3).unwrap_err();
        assert!(matches!(
            err,
            TouchstoneError::DatasetTooSmall {
                needed: 7,
                found: 6
            }
        ));
    }

    #[test]
    fn reads_little_endian_token_files() {
        let path = std::env::temp_dir().join(format!(
            "touchstone-{}-tokens.bin",
            std::process::id()
        ));
        let tokens: Vec<u32> = vec![3, 1, 4, 1, 5, 9, 2, 6];
        let mut bytes = Vec::new();
        for t in &tokens {
            bytes.extend_from_slice(&t.to_le_bytes());
        }
        fs::write(&path, bytes).unwrap();

        let loader = TokenDataLoader::new(&path, 1, 4).unwrap();
        assert_eq!(loader.num_tokens(), 8);
        fs::remove_file(&path).ok();
    }
}
