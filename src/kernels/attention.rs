//! Causal Multi-Head Self-Attention
//!
//! Operates on the fused QKV projection: `inp` is (B, T, 3C) where each
//! position's row holds query, key, and value concatenated, each C wide and
//! split across NH heads of width hs = C / NH.
//!
//! The forward pass runs three stages per (b, t, h):
//!
//! 1. scores: `preatt[t2] = (q_t . k_t2) / sqrt(hs)` for `t2 <= t`
//! 2. softmax over the scored prefix, written to `att`
//! 3. value mix: `out[t] = sum_t2 att[t2] * v_t2`
//!
//! Causality is structural: positions `t2 > t` are never scored, their
//! attention weights are written as exact zeros, and the backward pass
//! never touches them. The softmax running maximum is seeded from the
//! first scored element, so no sentinel constant can leak into the result.
//!
//! Both `preatt` and `att` (B, NH, T, T) are retained for the backward
//! pass, which differentiates the three stages in reverse. The softmax
//! Jacobian step couples all `t2 <= t` pairs, and key/value gradients for
//! one position accumulate from every later query, so the backward pass
//! stays serial.

use rayon::prelude::*;

/// Forward pass.
///
/// Shapes: `out` (B, T, C), `preatt`/`att` (B, NH, T, T), `inp` (B, T, 3C).
pub fn attention_forward(
    out: &mut [f32],
    preatt: &mut [f32],
    att: &mut [f32],
    inp: &[f32],
    b: usize,
    t: usize,
    c: usize,
    nh: usize,
) {
    debug_assert_eq!(inp.len(), b * t * 3 * c);
    let hs = c / nh;
    let scale = 1.0 / (hs as f32).sqrt();
    let c3 = 3 * c;

    // stages 1 + 2: score and softmax, parallel over (b, h) score matrices
    preatt
        .par_chunks_mut(t * t)
        .zip(att.par_chunks_mut(t * t))
        .enumerate()
        .for_each(|(bh, (preatt_bh, att_bh))| {
            let bi = bh / nh;
            let h = bh % nh;
            for ti in 0..t {
                let q = &inp[(bi * t + ti) * c3 + h * hs..(bi * t + ti) * c3 + h * hs + hs];
                let preatt_row = &mut preatt_bh[ti * t..(ti + 1) * t];
                let att_row = &mut att_bh[ti * t..(ti + 1) * t];

                let mut maxval = f32::NEG_INFINITY;
                for t2 in 0..=ti {
                    let k = &inp
                        [(bi * t + t2) * c3 + c + h * hs..(bi * t + t2) * c3 + c + h * hs + hs];
                    let mut val = 0.0;
                    for i in 0..hs {
                        val += q[i] * k[i];
                    }
                    val *= scale;
                    if val > maxval {
                        maxval = val;
                    }
                    preatt_row[t2] = val;
                }

                let mut expsum = 0.0;
                for t2 in 0..=ti {
                    let expv = (preatt_row[t2] - maxval).exp();
                    expsum += expv;
                    att_row[t2] = expv;
                }
                let expsum_inv = if expsum == 0.0 { 0.0 } else { 1.0 / expsum };
                for t2 in 0..t {
                    if t2 <= ti {
                        att_row[t2] *= expsum_inv;
                    } else {
                        att_row[t2] = 0.0;
                    }
                }
            }
        });

    // stage 3: value mix, parallel over (b, t) output rows
    out.par_chunks_mut(c).enumerate().for_each(|(bt, out_row)| {
        let bi = bt / t;
        let ti = bt % t;
        out_row.fill(0.0);
        for h in 0..nh {
            let att_row = &att[(bi * nh + h) * t * t + ti * t..(bi * nh + h) * t * t + (ti + 1) * t];
            let out_h = &mut out_row[h * hs..(h + 1) * hs];
            for t2 in 0..=ti {
                let v = &inp
                    [(bi * t + t2) * c3 + 2 * c + h * hs..(bi * t + t2) * c3 + 2 * c + h * hs + hs];
                let a = att_row[t2];
                for i in 0..hs {
                    out_h[i] += a * v[i];
                }
            }
        }
    });
}

/// Backward pass. Accumulates into `dinp` (B, T, 3C); `dpreatt` and `datt`
/// are scratch gradient buffers matching `preatt`/`att`.
///
/// Serial: key/value gradient rows are shared across later query positions.
#[allow(clippy::too_many_arguments)]
pub fn attention_backward(
    dinp: &mut [f32],
    dpreatt: &mut [f32],
    datt: &mut [f32],
    dout: &[f32],
    inp: &[f32],
    att: &[f32],
    b: usize,
    t: usize,
    c: usize,
    nh: usize,
) {
    let hs = c / nh;
    let scale = 1.0 / (hs as f32).sqrt();
    let c3 = 3 * c;

    for bi in 0..b {
        for ti in 0..t {
            for h in 0..nh {
                let base = (bi * nh + h) * t * t + ti * t;
                let dout_h = &dout[(bi * t + ti) * c + h * hs..(bi * t + ti) * c + (h + 1) * hs];
                let q_off = (bi * t + ti) * c3 + h * hs;

                // backward through the value mix
                for t2 in 0..=ti {
                    let v_off = (bi * t + t2) * c3 + 2 * c + h * hs;
                    let a = att[base + t2];
                    for i in 0..hs {
                        datt[base + t2] += inp[v_off + i] * dout_h[i];
                        dinp[v_off + i] += a * dout_h[i];
                    }
                }

                // backward through the softmax
                for t2 in 0..=ti {
                    let a_t2 = att[base + t2];
                    for t3 in 0..=ti {
                        let indicator = if t2 == t3 { 1.0 } else { 0.0 };
                        let local = a_t2 * (indicator - att[base + t3]);
                        dpreatt[base + t3] += local * datt[base + t2];
                    }
                }

                // backward through the scaled dot product
                for t2 in 0..=ti {
                    let k_off = (bi * t + t2) * c3 + c + h * hs;
                    let d = dpreatt[base + t2] * scale;
                    for i in 0..hs {
                        dinp[q_off + i] += inp[k_off + i] * d;
                        dinp[k_off + i] += inp[q_off + i] * d;
                    }
                }
            }
        }
    }
}
