//! Token + Position Embedding
//!
//! The first layer of the network: each input token id selects a row of the
//! token embedding table `wte`, each position selects a row of the
//! positional table `wpe`, and the two are summed into the (B, T, C)
//! activation that feeds the transformer stack.
//!
//! ## Backward
//!
//! The forward pass is a gather, so the backward pass is a scatter: the
//! output gradient at (b, t) accumulates into `dwte[token]` and `dwpe[t]`.
//! The same token id can appear at many positions, so the scatter targets
//! overlap across (b, t) and the loop stays serial.

use rayon::prelude::*;

/// Forward: `out[b,t,:] = wte[inp[b,t],:] + wpe[t,:]`.
///
/// Shapes: `out` (B, T, C), `inp` (B, T), `wte` (V, C), `wpe` (maxT, C).
pub fn encoder_forward(
    out: &mut [f32],
    inp: &[u32],
    wte: &[f32],
    wpe: &[f32],
    b: usize,
    t: usize,
    c: usize,
) {
    out.par_chunks_mut(t * c)
        .zip(inp.par_chunks(t))
        .for_each(|(out_b, inp_b)| {
            for (pos, out_t) in out_b.chunks_mut(c).enumerate() {
                let token = inp_b[pos] as usize;
                let wte_row = &wte[token * c..(token + 1) * c];
                let wpe_row = &wpe[pos * c..(pos + 1) * c];
                for i in 0..c {
                    out_t[i] = wte_row[i] + wpe_row[i];
                }
            }
        });
    debug_assert_eq!(out.len(), b * t * c);
}

/// Backward: scatter `dout` into `dwte` and `dwpe`, accumulating.
///
/// Serial: repeated token ids make `dwte` rows shared scatter targets.
pub fn encoder_backward(
    dwte: &mut [f32],
    dwpe: &mut [f32],
    dout: &[f32],
    inp: &[u32],
    b: usize,
    t: usize,
    c: usize,
) {
    for bi in 0..b {
        for pos in 0..t {
            let dout_row = &dout[(bi * t + pos) * c..(bi * t + pos + 1) * c];
            let token = inp[bi * t + pos] as usize;
            let dwte_row = &mut dwte[token * c..(token + 1) * c];
            for i in 0..c {
                dwte_row[i] += dout_row[i];
            }
            let dwpe_row = &mut dwpe[pos * c..(pos + 1) * c];
            for i in 0..c {
                dwpe_row[i] += dout_row[i];
            }
        }
    }
}
