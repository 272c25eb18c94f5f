//! Tensor Layout and Allocation
//!
//! The engine keeps all 16 parameter tensors in one contiguous `Vec<f32>`,
//! carved into non-overlapping spans in a fixed order. Three things depend
//! on that layout and must agree on it exactly:
//!
//! - the checkpoint payload, which is the flat buffer written verbatim,
//! - the gradient buffer, which mirrors the parameter buffer span for span,
//! - the optimizer, which walks parameters, gradients, and both moment
//!   buffers as four zipped flat slices.
//!
//! [`ParamTensor`] is the single source of truth for that ordering: the
//! enum's declaration order is the checkpoint order, and every span offset
//! is derived from it. Downstream code addresses per-layer slices as
//! `layer_index * per_layer_stride` within a tensor's span.
//!
//! Activations are different: nothing serializes them, so they live in
//! named per-tensor buffers ([`ActivationTensors`]) with the same fixed
//! size schedule but without the single-allocation constraint. Per-layer
//! addressing inside each buffer is unchanged.

use crate::config::Gpt2Config;
use crate::error::{Result, TouchstoneError};
use std::ops::Range;

/// Number of named parameter tensors.
pub const NUM_PARAM_TENSORS: usize = 16;

/// The 16 parameter tensors, in checkpoint payload order.
///
/// Shapes are noted per tensor; `L` is the layer count, `C` the channel
/// count, `V` the vocabulary size, `maxT` the maximum sequence length.
/// Tensors marked `(L, ...)` store all layers back to back and are
/// addressed per layer by a fixed stride.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamTensor {
    /// Token embedding table, (V, C). Also the weight-tied output head.
    Wte,
    /// Positional embedding table, (maxT, C)
    Wpe,
    /// Pre-attention layernorm scale, (L, C)
    Ln1W,
    /// Pre-attention layernorm shift, (L, C)
    Ln1B,
    /// Fused query/key/value projection weight, (L, 3C, C)
    QkvW,
    /// Fused query/key/value projection bias, (L, 3C)
    QkvB,
    /// Attention output projection weight, (L, C, C)
    AttProjW,
    /// Attention output projection bias, (L, C)
    AttProjB,
    /// Pre-MLP layernorm scale, (L, C)
    Ln2W,
    /// Pre-MLP layernorm shift, (L, C)
    Ln2B,
    /// MLP expansion weight, (L, 4C, C)
    FcW,
    /// MLP expansion bias, (L, 4C)
    FcB,
    /// MLP contraction weight, (L, C, 4C)
    FcProjW,
    /// MLP contraction bias, (L, C)
    FcProjB,
    /// Final layernorm scale, (C)
    LnFW,
    /// Final layernorm shift, (C)
    LnFB,
}

impl ParamTensor {
    /// All tensors in checkpoint order. Positional iteration over this
    /// array defines the flat buffer layout.
    pub const ALL: [ParamTensor; NUM_PARAM_TENSORS] = [
        ParamTensor::Wte,
        ParamTensor::Wpe,
        ParamTensor::Ln1W,
        ParamTensor::Ln1B,
        ParamTensor::QkvW,
        ParamTensor::QkvB,
        ParamTensor::AttProjW,
        ParamTensor::AttProjB,
        ParamTensor::Ln2W,
        ParamTensor::Ln2B,
        ParamTensor::FcW,
        ParamTensor::FcB,
        ParamTensor::FcProjW,
        ParamTensor::FcProjB,
        ParamTensor::LnFW,
        ParamTensor::LnFB,
    ];

    /// Per-layer element count, or the full element count for tensors that
    /// are not replicated per layer.
    pub fn stride(self, config: &Gpt2Config) -> usize {
        let c = config.channels;
        match self {
            ParamTensor::Wte => config.vocab_size * c,
            ParamTensor::Wpe => config.max_seq_len * c,
            ParamTensor::Ln1W | ParamTensor::Ln1B => c,
            ParamTensor::QkvW => 3 * c * c,
            ParamTensor::QkvB => 3 * c,
            ParamTensor::AttProjW => c * c,
            ParamTensor::AttProjB => c,
            ParamTensor::Ln2W | ParamTensor::Ln2B => c,
            ParamTensor::FcW => 4 * c * c,
            ParamTensor::FcB => 4 * c,
            ParamTensor::FcProjW => c * 4 * c,
            ParamTensor::FcProjB => c,
            ParamTensor::LnFW | ParamTensor::LnFB => c,
        }
    }

    /// Whether the tensor stores one copy per transformer layer.
    pub fn per_layer(self) -> bool {
        !matches!(
            self,
            ParamTensor::Wte | ParamTensor::Wpe | ParamTensor::LnFW | ParamTensor::LnFB
        )
    }

    /// Total element count across all layers.
    pub fn size(self, config: &Gpt2Config) -> usize {
        if self.per_layer() {
            config.num_layers * self.stride(config)
        } else {
            self.stride(config)
        }
    }
}

/// Total parameter count implied by a configuration.
pub fn num_parameters(config: &Gpt2Config) -> usize {
    ParamTensor::ALL.iter().map(|t| t.size(config)).sum()
}

/// Allocate a zero-filled buffer, surfacing allocation failure as a typed
/// error instead of aborting.
pub(crate) fn alloc_zeroed(elements: usize) -> Result<Vec<f32>> {
    let mut buf: Vec<f32> = Vec::new();
    buf.try_reserve_exact(elements)
        .map_err(|_| TouchstoneError::OutOfMemory { elements })?;
    buf.resize(elements, 0.0);
    Ok(buf)
}

/// One contiguous allocation carved into the 16 parameter tensor spans.
///
/// Used for both the parameters themselves and their gradient mirror. The
/// flat buffer is exposed for bulk checkpoint I/O and the optimizer; all
/// other access goes through the enum-keyed, bounds-checked views.
#[derive(Debug)]
pub struct ParameterBuffer {
    data: Vec<f32>,
    spans: [Range<usize>; NUM_PARAM_TENSORS],
    layers: usize,
}

impl ParameterBuffer {
    /// Allocate a zero-filled buffer laid out for `config`.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if the allocation fails.
    pub fn zeros(config: &Gpt2Config) -> Result<Self> {
        let mut spans: [Range<usize>; NUM_PARAM_TENSORS] =
            std::array::from_fn(|_| 0..0);
        let mut offset = 0;
        for (i, tensor) in ParamTensor::ALL.iter().enumerate() {
            let size = tensor.size(config);
            spans[i] = offset..offset + size;
            offset += size;
        }
        let data = alloc_zeroed(offset)?;
        Ok(Self {
            data,
            spans,
            layers: config.num_layers,
        })
    }

    /// Total element count.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when the buffer holds no parameters.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The whole buffer, in checkpoint order.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// The whole buffer, mutable.
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Reset every element to zero.
    pub fn fill_zero(&mut self) {
        self.data.fill(0.0);
    }

    fn index(tensor: ParamTensor) -> usize {
        // ALL is in declaration order, so the discriminant is the position.
        tensor as usize
    }

    /// Absolute range of one layer's slice of a tensor. For tensors without
    /// a per-layer copy, `layer` must be 0.
    fn layer_range(&self, tensor: ParamTensor, layer: usize) -> Range<usize> {
        let span = self.spans[Self::index(tensor)].clone();
        if tensor.per_layer() {
            assert!(layer < self.layers, "layer {} out of range", layer);
            let stride = span.len() / self.layers;
            let start = span.start + layer * stride;
            start..start + stride
        } else {
            assert_eq!(layer, 0, "tensor {:?} has no per-layer copies", tensor);
            span
        }
    }

    /// A tensor's full span.
    pub fn tensor(&self, tensor: ParamTensor) -> &[f32] {
        &self.data[self.spans[Self::index(tensor)].clone()]
    }

    /// A tensor's full span, mutable.
    pub fn tensor_mut(&mut self, tensor: ParamTensor) -> &mut [f32] {
        let range = self.spans[Self::index(tensor)].clone();
        &mut self.data[range]
    }

    /// One layer's slice of a tensor.
    pub fn layer(&self, tensor: ParamTensor, layer: usize) -> &[f32] {
        &self.data[self.layer_range(tensor, layer)]
    }

    /// One layer's slice of a tensor, mutable.
    pub fn layer_mut(&mut self, tensor: ParamTensor, layer: usize) -> &mut [f32] {
        let range = self.layer_range(tensor, layer);
        &mut self.data[range]
    }

    /// Two disjoint mutable layer slices at once.
    ///
    /// Backward kernels accumulate into a weight gradient and a bias
    /// gradient of the same buffer in one call; this provides both without
    /// aliasing. Panics if the two requests overlap.
    pub fn layer_pair_mut(
        &mut self,
        a: (ParamTensor, usize),
        b: (ParamTensor, usize),
    ) -> (&mut [f32], &mut [f32]) {
        let ra = self.layer_range(a.0, a.1);
        let rb = self.layer_range(b.0, b.1);
        assert!(
            ra.end <= rb.start || rb.end <= ra.start,
            "overlapping tensor views: {:?} and {:?}",
            a,
            b
        );
        if ra.start < rb.start {
            let (lo, hi) = self.data.split_at_mut(rb.start);
            (&mut lo[ra], &mut hi[..rb.end - rb.start])
        } else {
            let (lo, hi) = self.data.split_at_mut(ra.start);
            let (first, second) = (&mut hi[..ra.end - ra.start], &mut lo[rb]);
            (first, second)
        }
    }
}

/// The 23 named activation tensors for one (B, T) batch shape.
///
/// Sized once, on the first forward pass, and never resized. Tensors
/// prefixed `(L, ...)` hold all layers back to back; kernels receive the
/// per-layer slice `&buf[l * stride..(l + 1) * stride]`.
#[derive(Debug)]
pub struct ActivationTensors {
    /// Token + positional embedding sum, (B, T, C)
    pub encoded: Vec<f32>,
    /// First layernorm output, (L, B, T, C)
    pub ln1: Vec<f32>,
    /// First layernorm cached mean, (L, B, T)
    pub ln1_mean: Vec<f32>,
    /// First layernorm cached reciprocal std, (L, B, T)
    pub ln1_rstd: Vec<f32>,
    /// Fused query/key/value projection, (L, B, T, 3C)
    pub qkv: Vec<f32>,
    /// Attention output (pre projection), (L, B, T, C)
    pub atty: Vec<f32>,
    /// Pre-softmax attention scores, (L, B, NH, T, T)
    pub preatt: Vec<f32>,
    /// Post-softmax attention weights, (L, B, NH, T, T)
    pub att: Vec<f32>,
    /// Attention output projection, (L, B, T, C)
    pub attproj: Vec<f32>,
    /// Residual stream after attention, (L, B, T, C)
    pub residual2: Vec<f32>,
    /// Second layernorm output, (L, B, T, C)
    pub ln2: Vec<f32>,
    /// Second layernorm cached mean, (L, B, T)
    pub ln2_mean: Vec<f32>,
    /// Second layernorm cached reciprocal std, (L, B, T)
    pub ln2_rstd: Vec<f32>,
    /// MLP hidden pre-activation, (L, B, T, 4C)
    pub fch: Vec<f32>,
    /// MLP hidden post-GELU, (L, B, T, 4C)
    pub fch_gelu: Vec<f32>,
    /// MLP contraction output, (L, B, T, C)
    pub fcproj: Vec<f32>,
    /// Residual stream after the MLP, (L, B, T, C)
    pub residual3: Vec<f32>,
    /// Final layernorm output, (B, T, C)
    pub lnf: Vec<f32>,
    /// Final layernorm cached mean, (B, T)
    pub lnf_mean: Vec<f32>,
    /// Final layernorm cached reciprocal std, (B, T)
    pub lnf_rstd: Vec<f32>,
    /// Output head logits, (B, T, V)
    pub logits: Vec<f32>,
    /// Softmax probabilities, (B, T, V)
    pub probs: Vec<f32>,
    /// Per-position cross-entropy losses, (B, T)
    pub losses: Vec<f32>,
}

impl ActivationTensors {
    /// Allocate zero-filled activation buffers for batch shape (b, t).
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if any allocation fails.
    pub fn new(config: &Gpt2Config, b: usize, t: usize) -> Result<Self> {
        let l = config.num_layers;
        let c = config.channels;
        let nh = config.num_heads;
        let v = config.vocab_size;
        Ok(Self {
            encoded: alloc_zeroed(b * t * c)?,
            ln1: alloc_zeroed(l * b * t * c)?,
            ln1_mean: alloc_zeroed(l * b * t)?,
            ln1_rstd: alloc_zeroed(l * b * t)?,
            qkv: alloc_zeroed(l * b * t * 3 * c)?,
            atty: alloc_zeroed(l * b * t * c)?,
            preatt: alloc_zeroed(l * b * nh * t * t)?,
            att: alloc_zeroed(l * b * nh * t * t)?,
            attproj: alloc_zeroed(l * b * t * c)?,
            residual2: alloc_zeroed(l * b * t * c)?,
            ln2: alloc_zeroed(l * b * t * c)?,
            ln2_mean: alloc_zeroed(l * b * t)?,
            ln2_rstd: alloc_zeroed(l * b * t)?,
            fch: alloc_zeroed(l * b * t * 4 * c)?,
            fch_gelu: alloc_zeroed(l * b * t * 4 * c)?,
            fcproj: alloc_zeroed(l * b * t * c)?,
            residual3: alloc_zeroed(l * b * t * c)?,
            lnf: alloc_zeroed(b * t * c)?,
            lnf_mean: alloc_zeroed(b * t)?,
            lnf_rstd: alloc_zeroed(b * t)?,
            logits: alloc_zeroed(b * t * v)?,
            probs: alloc_zeroed(b * t * v)?,
            losses: alloc_zeroed(b * t)?,
        })
    }

    /// Total element count across all 23 tensors.
    pub fn total_elements(&self) -> usize {
        self.encoded.len()
            + self.ln1.len()
            + self.ln1_mean.len()
            + self.ln1_rstd.len()
            + self.qkv.len()
            + self.atty.len()
            + self.preatt.len()
            + self.att.len()
            + self.attproj.len()
            + self.residual2.len()
            + self.ln2.len()
            + self.ln2_mean.len()
            + self.ln2_rstd.len()
            + self.fch.len()
            + self.fch_gelu.len()
            + self.fcproj.len()
            + self.residual3.len()
            + self.lnf.len()
            + self.lnf_mean.len()
            + self.lnf_rstd.len()
            + self.logits.len()
            + self.probs.len()
            + self.losses.len()
    }

    /// Reset every tensor to zero. Required before each backward pass
    /// because all backward kernels accumulate.
    pub fn fill_zero(&mut self) {
        self.encoded.fill(0.0);
        self.ln1.fill(0.0);
        self.ln1_mean.fill(0.0);
        self.ln1_rstd.fill(0.0);
        self.qkv.fill(0.0);
        self.atty.fill(0.0);
        self.preatt.fill(0.0);
        self.att.fill(0.0);
        self.attproj.fill(0.0);
        self.residual2.fill(0.0);
        self.ln2.fill(0.0);
        self.ln2_mean.fill(0.0);
        self.ln2_rstd.fill(0.0);
        self.fch.fill(0.0);
        self.fch_gelu.fill(0.0);
        self.fcproj.fill(0.0);
        self.residual3.fill(0.0);
        self.lnf.fill(0.0);
        self.lnf_mean.fill(0.0);
        self.lnf_rstd.fill(0.0);
        self.logits.fill(0.0);
        self.probs.fill(0.0);
        self.losses.fill(0.0);
    }
}
