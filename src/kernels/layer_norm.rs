//! Layer Normalization
//!
//! Normalizes each (b, t) position's C-vector to zero mean and unit
//! variance, then applies a learned per-channel scale and shift:
//!
//! ```text
//! norm = (x - mean(x)) * rstd        rstd = 1 / sqrt(var(x) + 1e-5)
//! out  = norm * weight + bias
//! ```
//!
//! Variance is the biased (divide by C) estimate. The forward pass caches
//! `mean` and `rstd` per position; the backward pass reuses them rather
//! than recomputing, which is both faster and bit-consistent with the
//! values the forward pass actually used.
//!
//! ## Backward
//!
//! Differentiating through the mean and variance couples every channel of
//! a position to every other. Collecting terms gives, per position:
//!
//! ```text
//! dnorm_i          = weight_i * dout_i
//! dinp_i          += rstd * (dnorm_i - mean_j(dnorm_j) - norm_i * mean_j(dnorm_j * norm_j))
//! dweight_i       += norm_i * dout_i
//! dbias_i         += dout_i
//! ```
//!
//! Positions are independent in both directions, but the backward pass
//! shares `dweight`/`dbias` across positions, so only the forward pass is
//! parallel.

use rayon::prelude::*;

const EPS: f32 = 1e-5;

/// Forward pass over N = B*T independent positions of width C.
///
/// Shapes: `out`, `inp` (N, C); `mean`, `rstd` (N); `weight`, `bias` (C).
#[allow(clippy::too_many_arguments)]
pub fn layernorm_forward(
    out: &mut [f32],
    mean: &mut [f32],
    rstd: &mut [f32],
    inp: &[f32],
    weight: &[f32],
    bias: &[f32],
    n: usize,
    c: usize,
) {
    debug_assert_eq!(inp.len(), n * c);
    out.par_chunks_mut(c)
        .zip(mean.par_iter_mut())
        .zip(rstd.par_iter_mut())
        .zip(inp.par_chunks(c))
        .for_each(|(((out_row, m), s), x)| {
            let mu = x.iter().sum::<f32>() / c as f32;
            let var = x.iter().map(|&xi| (xi - mu) * (xi - mu)).sum::<f32>() / c as f32;
            let r = 1.0 / (var + EPS).sqrt();
            for i in 0..c {
                let norm = (x[i] - mu) * r;
                out_row[i] = norm * weight[i] + bias[i];
            }
            *m = mu;
            *s = r;
        });
}

/// Backward pass. Accumulates into `dinp`, `dweight`, `dbias`.
///
/// Uses the cached `mean`/`rstd` from the forward pass. Serial: `dweight`
/// and `dbias` are shared across all positions.
#[allow(clippy::too_many_arguments)]
pub fn layernorm_backward(
    dinp: &mut [f32],
    dweight: &mut [f32],
    dbias: &mut [f32],
    dout: &[f32],
    inp: &[f32],
    weight: &[f32],
    mean: &[f32],
    rstd: &[f32],
    n: usize,
    c: usize,
) {
    for row in 0..n {
        let x = &inp[row * c..(row + 1) * c];
        let dout_row = &dout[row * c..(row + 1) * c];
        let dinp_row = &mut dinp[row * c..(row + 1) * c];
        let mu = mean[row];
        let r = rstd[row];

        // two reductions over the position, then the per-channel update
        let mut dnorm_mean = 0.0f32;
        let mut dnorm_norm_mean = 0.0f32;
        for i in 0..c {
            let norm = (x[i] - mu) * r;
            let dnorm = weight[i] * dout_row[i];
            dnorm_mean += dnorm;
            dnorm_norm_mean += dnorm * norm;
        }
        dnorm_mean /= c as f32;
        dnorm_norm_mean /= c as f32;

        for i in 0..c {
            let norm = (x[i] - mu) * r;
            let dnorm = weight[i] * dout_row[i];
            dbias[i] += dout_row[i];
            dweight[i] += norm * dout_row[i];
            dinp_row[i] += r * (dnorm - dnorm_mean - norm * dnorm_norm_mean);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_normalizes_each_position() {
        let (n, c) = (2, 4);
        let inp = vec![1.0, 2.0, 3.0, 4.0, -2.0, 0.0, 2.0, 8.0];
        let weight = vec![1.0; c];
        let bias = vec![0.0; c];
        let mut out = vec![0.0; n * c];
        let mut mean = vec![0.0; n];
        let mut rstd = vec![0.0; n];
        layernorm_forward(&mut out, &mut mean, &mut rstd, &inp, &weight, &bias, n, c);

        for row in 0..n {
            let y = &out[row * c..(row + 1) * c];
            let mu: f32 = y.iter().sum::<f32>() / c as f32;
            let var: f32 = y.iter().map(|&v| (v - mu) * (v - mu)).sum::<f32>() / c as f32;
            assert!(mu.abs() < 1e-5, "row {} mean {}", row, mu);
            assert!((var - 1.0).abs() < 1e-3, "row {} var {}", row, var);
        }
        assert!((mean[0] - 2.5).abs() < 1e-6);
    }

    #[test]
    fn affine_params_pass_through() {
        let (n, c) = (1, 2);
        let inp = vec![-1.0, 1.0];
        let weight = vec![3.0, 3.0];
        let bias = vec![10.0, 10.0];
        let mut out = vec![0.0; n * c];
        let mut mean = vec![0.0; n];
        let mut rstd = vec![0.0; n];
        layernorm_forward(&mut out, &mut mean, &mut rstd, &inp, &weight, &bias, n, c);
        // norm is close to (-1, 1); eps pulls it slightly inside
        assert!(out[0] < 10.0 && out[0] > 6.9);
        assert!(out[1] > 10.0 && out[1] < 13.1);
        assert!((out[0] + out[1] - 20.0).abs() < 1e-4);
    }

    #[test]
    fn backward_matches_finite_differences() {
        let (n, c) = (1, 4);
        let inp = vec![0.5, -1.0, 2.0, 0.3];
        let weight = vec![1.1, 0.9, -0.5, 1.3];
        let bias = vec![0.1, -0.2, 0.0, 0.4];
        let dout = vec![1.0, -0.5, 0.25, 2.0];

        let loss = |x: &[f32]| -> f32 {
            let mut out = vec![0.0; n * c];
            let mut mean = vec![0.0; n];
            let mut rstd = vec![0.0; n];
            layernorm_forward(&mut out, &mut mean, &mut rstd, x, &weight, &bias, n, c);
            out.iter().zip(&dout).map(|(o, d)| o * d).sum()
        };

        let mut out = vec![0.0; n * c];
        let mut mean = vec![0.0; n];
        let mut rstd = vec![0.0; n];
        layernorm_forward(&mut out, &mut mean, &mut rstd, &inp, &weight, &bias, n, c);
        let mut dinp = vec![0.0; n * c];
        let mut dweight = vec![0.0; c];
        let mut dbias = vec![0.0; c];
        layernorm_backward(
            &mut dinp, &mut dweight, &mut dbias, &dout, &inp, &weight, &mean, &rstd, n, c,
        );

        let h = 1e-2f32;
        for i in 0..c {
            let mut xp = inp.clone();
            let mut xm = inp.clone();
            xp[i] += h;
            xm[i] -= h;
            let numeric = (loss(&xp) - loss(&xm)) / (2.0 * h);
            assert!(
                (numeric - dinp[i]).abs() < 2e-2,
                "dinp[{}]: analytic {} vs numeric {}",
                i,
                dinp[i],
                numeric
            );
        }
    }
}
