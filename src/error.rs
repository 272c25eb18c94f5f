//! Error types for the training engine.
//!
//! Every condition below is fatal to a training run: none is retryable,
//! and callers are expected to stop rather than continue with an
//! inconsistent tensor state. They surface as typed errors so the caller
//! decides how to exit.

use thiserror::Error;

/// Result type alias for touchstone operations.
pub type Result<T> = std::result::Result<T, TouchstoneError>;

/// Errors that can occur while loading, running, or updating a model.
#[derive(Error, Debug)]
pub enum TouchstoneError {
    /// Checkpoint file has the wrong magic number in header word 0.
    #[error("bad checkpoint magic: expected {expected}, found {found}")]
    BadMagic { expected: i32, found: i32 },

    /// Checkpoint file has an unsupported format version in header word 1.
    #[error("unsupported checkpoint version: {found}")]
    BadVersion { found: i32 },

    /// Checkpoint payload is shorter than the parameter count implied by
    /// its header.
    #[error("truncated checkpoint: expected {expected} parameters, found {found}")]
    TruncatedCheckpoint { expected: usize, found: usize },

    /// A forward pass was requested before parameters were loaded.
    #[error("model parameters are not loaded")]
    NotInitialized,

    /// An input or target token id lies outside the vocabulary. Token
    /// files are external input, so a corrupt or mismatched file must not
    /// reach the embedding lookup.
    #[error("token id {id} out of range for vocabulary of {vocab_size}")]
    InvalidToken { id: u32, vocab_size: usize },

    /// The requested batch size or sequence length exceeds the capacity
    /// fixed by the first forward pass. Activations are never reallocated;
    /// growth would invalidate per-layer offset arithmetic.
    #[error(
        "batch {batch}x{seq} exceeds allocated capacity {max_batch}x{max_seq}"
    )]
    CapacityExceeded {
        max_batch: usize,
        max_seq: usize,
        batch: usize,
        seq: usize,
    },

    /// Backward (or an optimizer update) was invoked without a preceding
    /// forward pass with targets; there is no loss to differentiate.
    #[error("must forward with targets before backward")]
    Sequencing,

    /// A tensor buffer allocation failed.
    #[error("failed to allocate {elements} tensor elements")]
    OutOfMemory { elements: usize },

    /// The token file is too small to produce a single batch.
    #[error("token file holds {found} tokens but a batch needs {needed}")]
    DatasetTooSmall { needed: usize, found: usize },

    /// Model hyperparameters are inconsistent.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
