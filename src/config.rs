//! Model Hyperparameters
//!
//! The five numbers that fix the GPT-2 architecture. Everything else in the
//! engine — tensor sizes, layer offsets, checkpoint payload length — is
//! derived from these.

use crate::error::{Result, TouchstoneError};
use serde::{Deserialize, Serialize};

/// GPT-2 architecture hyperparameters
///
/// Matches the header fields of the binary checkpoint format, in order.
///
/// # Invariant
///
/// `channels` must be divisible by `num_heads`; the per-head width is
/// `channels / num_heads`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gpt2Config {
    /// Maximum sequence length the positional table covers (e.g. 1024)
    pub max_seq_len: usize,
    /// Vocabulary size (e.g. 50257)
    pub vocab_size: usize,
    /// Number of transformer blocks (e.g. 12)
    pub num_layers: usize,
    /// Number of attention heads per block (e.g. 12)
    pub num_heads: usize,
    /// Embedding width / channel count (e.g. 768)
    pub channels: usize,
}

impl Gpt2Config {
    /// Width of a single attention head.
    pub fn head_size(&self) -> usize {
        self.channels / self.num_heads
    }

    /// Validate internal consistency.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if any dimension is zero or `channels` is
    /// not divisible by `num_heads`.
    pub fn validate(&self) -> Result<()> {
        if self.max_seq_len == 0
            || self.vocab_size == 0
            || self.num_layers == 0
            || self.num_heads == 0
            || self.channels == 0
        {
            return Err(TouchstoneError::InvalidConfig(
                "all dimensions must be nonzero".to_string(),
            ));
        }
        if self.channels % self.num_heads != 0 {
            return Err(TouchstoneError::InvalidConfig(format!(
                "channels ({}) not divisible by num_heads ({})",
                self.channels, self.num_heads
            )));
        }
        Ok(())
    }

    /// The GPT-2 124M configuration, matching the published checkpoint.
    pub fn gpt2_124m() -> Self {
        Self {
            max_seq_len: 1024,
            vocab_size: 50257,
            num_layers: 12,
            num_heads: 12,
            channels: 768,
        }
    }

    /// A tiny configuration for tests and quick experiments.
    ///
    /// Small enough that a full forward/backward/gradient-check cycle runs
    /// in well under a second.
    pub fn tiny() -> Self {
        Self {
            max_seq_len: 16,
            vocab_size: 32,
            num_layers: 2,
            num_heads: 2,
            channels: 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn head_size_divides_channels() {
        let config = Gpt2Config::gpt2_124m();
        assert_eq!(config.head_size(), 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_indivisible_heads() {
        let config = Gpt2Config {
            num_heads: 5,
            ..Gpt2Config::tiny()
        };
        assert!(matches!(
            config.validate(),
            Err(TouchstoneError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_zero_dimension() {
        let config = Gpt2Config {
            num_layers: 0,
            ..Gpt2Config::tiny()
        };
        assert!(config.validate().is_err());
    }
}
