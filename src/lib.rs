//! # touchstone
//!
//! A CPU training engine for GPT-2 style decoder-only transformers, with
//! every forward and backward pass written out by hand. No autograd, no
//! graph: each layer is a kernel pair over flat `f32` buffers, the model
//! sequences them, and AdamW walks the flat parameter buffer.
//!
//! A full training step is four calls:
//!
//! ```no_run
//! # use touchstone::{Gpt2, AdamW, TokenDataLoader};
//! # fn run() -> touchstone::Result<()> {
//! let mut model = Gpt2::from_checkpoint("gpt2_124M.bin")?;
//! let mut loader = TokenDataLoader::new("train.bin", 4, 64)?;
//! let mut optimizer = AdamW::default_config();
//!
//! let (inputs, targets) = loader.next_batch();
//! let (inputs, targets) = (inputs.to_vec(), targets.to_vec());
//! model.forward(&inputs, Some(&targets), 4, 64)?;
//! model.zero_grad();
//! model.backward()?;
//! optimizer.update(&mut model, 1e-4)?;
//! # Ok(())
//! # }
//! ```
//!
//! Checkpoints use a fixed little-endian binary format shared with the
//! exporter that produces them ([`checkpoint`]); token files are flat
//! `u32` streams ([`data`]). Kernels parallelize over independent rows
//! with rayon; results are deterministic for a fixed model, batch, and
//! thread-independent kernel set.

pub mod checkpoint;
pub mod config;
pub mod data;
pub mod error;
pub mod kernels;
pub mod layout;
pub mod logger;
pub mod model;
pub mod optimizer;
pub mod sampler;

pub use checkpoint::{load_checkpoint, save_checkpoint};
pub use config::Gpt2Config;
pub use data::TokenDataLoader;
pub use error::{Result, TouchstoneError};
pub use logger::TrainingLogger;
pub use model::Gpt2;
pub use optimizer::{clip_grad_norm, grad_norm, AdamW};
pub use sampler::sample_from_probs;
