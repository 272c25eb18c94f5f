//! Forward/Backward Kernel Pairs
//!
//! Every layer of the network is implemented as a pair of free functions
//! over plain `&[f32]` / `&mut [f32]` slices: a forward pass that writes its
//! output buffer, and a backward pass that consumes upstream gradients and
//! **accumulates** into downstream gradient buffers with `+=`.
//!
//! The accumulate convention is load-bearing. Several parameters receive
//! gradient contributions from more than one site (the token embedding is
//! also the output head; every layer adds into the residual stream), so a
//! backward kernel that overwrote its outputs would silently drop terms.
//! Callers zero gradient buffers once per step, then run all backward
//! kernels in reverse layer order.
//!
//! Buffers are indexed with explicit offset arithmetic over known shapes;
//! each kernel documents the shapes it expects. Hot loops parallelize over
//! independent rows with rayon where the iteration space has no write
//! overlap, and stay serial where scatter targets are shared.

pub mod attention;
pub mod encoder;
pub mod gelu;
pub mod layer_norm;
pub mod matmul;
pub mod residual;
pub mod softmax;
