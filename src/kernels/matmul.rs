//! Linear Layers
//!
//! Every projection in the network (QKV, attention output, both MLP
//! matmuls, and the output head) is the same operation: for each of the
//! B*T positions, multiply the C-dim input by a (OC, C) weight matrix
//! stored row-major per output channel, plus an optional bias:
//!
//! ```text
//! out[bt, o] = bias[o] + sum_i inp[bt, i] * weight[o, i]
//! ```
//!
//! The weight layout means each output channel reads one contiguous weight
//! row, so the inner loop is a dot product of two contiguous slices. The
//! bias is optional because the output head reuses the token embedding as
//! its weight and has no bias term.
//!
//! ## Backward
//!
//! Three independent products, each parallelized over the dimension whose
//! writes are disjoint:
//!
//! - `dinp[bt, i]  += sum_o weight[o, i] * dout[bt, o]`  (rows of dinp)
//! - `dweight[o, i] += sum_bt inp[bt, i] * dout[bt, o]`  (rows of dweight)
//! - `dbias[o]      += sum_bt dout[bt, o]`               (with dweight)

use rayon::prelude::*;

/// Forward pass over N = B*T positions.
///
/// Shapes: `out` (N, OC), `inp` (N, C), `weight` (OC, C), `bias` (OC).
pub fn matmul_forward(
    out: &mut [f32],
    inp: &[f32],
    weight: &[f32],
    bias: Option<&[f32]>,
    n: usize,
    c: usize,
    oc: usize,
) {
    debug_assert_eq!(inp.len(), n * c);
    debug_assert_eq!(weight.len(), oc * c);
    out.par_chunks_mut(oc)
        .zip(inp.par_chunks(c))
        .for_each(|(out_row, inp_row)| {
            for o in 0..oc {
                let w_row = &weight[o * c..(o + 1) * c];
                let mut acc = bias.map_or(0.0, |b| b[o]);
                for i in 0..c {
                    acc += inp_row[i] * w_row[i];
                }
                out_row[o] = acc;
            }
        });
}

/// Backward pass. Accumulates into `dinp`, `dweight`, and `dbias`.
///
/// `dbias` is `None` exactly when the forward call had no bias.
#[allow(clippy::too_many_arguments)]
pub fn matmul_backward(
    dinp: &mut [f32],
    dweight: &mut [f32],
    dbias: Option<&mut [f32]>,
    dout: &[f32],
    inp: &[f32],
    weight: &[f32],
    n: usize,
    c: usize,
    oc: usize,
) {
    // input gradient: parallel over positions
    dinp.par_chunks_mut(c)
        .zip(dout.par_chunks(oc))
        .for_each(|(dinp_row, dout_row)| {
            for o in 0..oc {
                let w_row = &weight[o * c..(o + 1) * c];
                let d = dout_row[o];
                for i in 0..c {
                    dinp_row[i] += d * w_row[i];
                }
            }
        });

    // weight and bias gradients: parallel over output channels
    if let Some(dbias) = dbias {
        dweight
            .par_chunks_mut(c)
            .zip(dbias.par_iter_mut())
            .enumerate()
            .for_each(|(o, (dw_row, db))| {
                for bt in 0..n {
                    let d = dout[bt * oc + o];
                    let inp_row = &inp[bt * c..(bt + 1) * c];
                    *db += d;
                    for i in 0..c {
                        dw_row[i] += d * inp_row[i];
                    }
                }
            });
    } else {
        dweight
            .par_chunks_mut(c)
            .enumerate()
            .for_each(|(o, dw_row)| {
                for bt in 0..n {
                    let d = dout[bt * oc + o];
                    let inp_row = &inp[bt * c..(bt + 1) * c];
                    for i in 0..c {
                        dw_row[i] += d * inp_row[i];
                    }
                }
            });
    }
}
