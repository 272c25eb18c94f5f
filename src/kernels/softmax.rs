//! Vocabulary Softmax and Cross-Entropy Loss
//!
//! The output head produces (B, T, V) logits; these kernels turn them into
//! probabilities and per-position negative log-likelihood losses.
//!
//! The softmax subtracts each row's maximum before exponentiating, which
//! keeps every exponent at or below zero and the row numerically stable at
//! any logit scale. The running maximum folds from `NEG_INFINITY`, so the
//! first element always wins and no clamp constant can bias the result.
//!
//! The backward pass fuses softmax and cross-entropy: for a row with
//! target index `y`,
//!
//! ```text
//! dlogits[v] += (probs[v] - [v == y]) * dloss
//! ```
//!
//! which is cheaper and better conditioned than chaining the two
//! Jacobians.

use rayon::prelude::*;

/// Row-wise softmax over N = B*T rows of width V.
pub fn softmax_forward(probs: &mut [f32], logits: &[f32], n: usize, v: usize) {
    debug_assert_eq!(logits.len(), n * v);
    probs
        .par_chunks_mut(v)
        .zip(logits.par_chunks(v))
        .for_each(|(p_row, l_row)| {
            let maxval = l_row.iter().fold(f32::NEG_INFINITY, |m, &x| m.max(x));
            let mut sum = 0.0;
            for i in 0..v {
                p_row[i] = (l_row[i] - maxval).exp();
                sum += p_row[i];
            }
            let inv = 1.0 / sum;
            for p in p_row.iter_mut() {
                *p *= inv;
            }
        });
}

/// Per-position loss: `losses[bt] = -ln(probs[bt, targets[bt]])`.
pub fn crossentropy_forward(losses: &mut [f32], probs: &[f32], targets: &[u32], v: usize) {
    for (bt, loss) in losses.iter_mut().enumerate() {
        let target = targets[bt] as usize;
        *loss = -probs[bt * v + target].ln();
    }
}

/// Fused softmax + cross-entropy backward. Accumulates into `dlogits`.
///
/// `dlosses[bt]` is the upstream gradient on each position's loss (a
/// uniform `1 / (B*T)` when the scalar objective is the mean loss).
pub fn crossentropy_softmax_backward(
    dlogits: &mut [f32],
    dlosses: &[f32],
    probs: &[f32],
    targets: &[u32],
    n: usize,
    v: usize,
) {
    debug_assert_eq!(dlogits.len(), n * v);
    dlogits
        .par_chunks_mut(v)
        .zip(probs.par_chunks(v))
        .enumerate()
        .for_each(|(bt, (dl_row, p_row))| {
            let dloss = dlosses[bt];
            let target = targets[bt] as usize;
            for i in 0..v {
                let indicator = if i == target { 1.0 } else { 0.0 };
                dl_row[i] += (p_row[i] - indicator) * dloss;
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_distributions() {
        let (n, v) = (2, 4);
        let logits = vec![1.0, 2.0, 3.0, 4.0, -50.0, 0.0, 50.0, 0.0];
        let mut probs = vec![0.0; n * v];
        softmax_forward(&mut probs, &logits, n, v);
        for row in probs.chunks(v) {
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-5);
            assert!(row.iter().all(|&p| p >= 0.0));
        }
        // large logits dominate without overflow
        assert!(probs[v + 2] > 0.999);
    }

    #[test]
    fn shift_invariance() {
        let (n, v) = (1, 3);
        let logits = vec![0.1, 0.2, 0.3];
        let shifted: Vec<f32> = logits.iter().map(|&x| x + 100.0).collect();
        let mut p1 = vec![0.0; v];
        let mut p2 = vec![0.0; v];
        softmax_forward(&mut p1, &logits, n, v);
        softmax_forward(&mut p2, &shifted, n, v);
        for (a, b) in p1.iter().zip(&p2) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn loss_is_negative_log_target_prob() {
        let v = 3;
        let probs = vec![0.2, 0.5, 0.3];
        let targets = vec![1u32];
        let mut losses = vec![0.0; 1];
        crossentropy_forward(&mut losses, &probs, &targets, v);
        assert!((losses[0] - (-0.5f32.ln())).abs() < 1e-6);
    }

    #[test]
    fn fused_backward_matches_probability_minus_indicator() {
        let (n, v) = (1, 3);
        let logits = vec![0.5, -0.5, 1.5];
        let targets = vec![2u32];
        let mut probs = vec![0.0; v];
        softmax_forward(&mut probs, &logits, n, v);

        let mut dlogits = vec![0.0; v];
        crossentropy_softmax_backward(&mut dlogits, &[1.0], &probs, &targets, n, v);
        assert!((dlogits[0] - probs[0]).abs() < 1e-6);
        assert!((dlogits[1] - probs[1]).abs() < 1e-6);
        assert!((dlogits[2] - (probs[2] - 1.0)).abs() < 1e-6);
        // gradient of a softmax row sums to zero
        let sum: f32 = dlogits.iter().sum();
        assert!(sum.abs() < 1e-6);
    }
}
