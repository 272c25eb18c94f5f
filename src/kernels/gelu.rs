//! GELU Activation
//!
//! The tanh approximation used by GPT-2:
//!
//! ```text
//! gelu(x) = 0.5 * x * (1 + tanh(sqrt(2/pi) * (x + 0.044715 * x^3)))
//! ```
//!
//! The backward pass uses the exact derivative of this approximation (not
//! of the true GELU), so analytic and numeric gradients of the kernel
//! agree to finite-difference precision.

use rayon::prelude::*;

const GELU_SCALING_FACTOR: f32 = 0.797_884_6; // sqrt(2/pi)

/// Elementwise forward.
pub fn gelu_forward(out: &mut [f32], inp: &[f32]) {
    out.par_iter_mut().zip(inp.par_iter()).for_each(|(o, &x)| {
        let cube = 0.044715 * x * x * x;
        *o = 0.5 * x * (1.0 + (GELU_SCALING_FACTOR * (x + cube)).tanh());
    });
}

/// Elementwise backward. Accumulates into `dinp`.
pub fn gelu_backward(dinp: &mut [f32], inp: &[f32], dout: &[f32]) {
    dinp.par_iter_mut()
        .zip(inp.par_iter())
        .zip(dout.par_iter())
        .for_each(|((di, &x), &d)| {
            let cube = 0.044715 * x * x * x;
            let tanh_arg = GELU_SCALING_FACTOR * (x + cube);
            let tanh_out = tanh_arg.tanh();
            let sech2 = 1.0 - tanh_out * tanh_out;
            let local = 0.5 * (1.0 + tanh_out)
                + x * 0.5 * sech2 * GELU_SCALING_FACTOR * (1.0 + 3.0 * 0.044715 * x * x);
            *di += local * d;
        });
}
