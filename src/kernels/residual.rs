//! Residual Connections
//!
//! Elementwise add of a layer's output onto the stream that bypassed it.
//! The backward pass routes the upstream gradient to both addends
//! unchanged, accumulating.

use rayon::prelude::*;

/// `out = inp1 + inp2`, elementwise.
pub fn residual_forward(out: &mut [f32], inp1: &[f32], inp2: &[f32]) {
    out.par_iter_mut()
        .zip(inp1.par_iter())
        .zip(inp2.par_iter())
        .for_each(|((o, &a), &b)| *o = a + b);
}

/// Accumulate `dout` into both input gradients.
pub fn residual_backward(dinp1: &mut [f32], dinp2: &mut [f32], dout: &[f32]) {
    dinp1
        .par_iter_mut()
        .zip(dinp2.par_iter_mut())
        .zip(dout.par_iter())
        .for_each(|((d1, d2), &d)| {
            *d1 += d;
            *d2 += d;
        });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_route_gradients() {
        let a = vec![1.0, 2.0];
        let b = vec![10.0, 20.0];
        let mut out = vec![0.0; 2];
        residual_forward(&mut out, &a, &b);
        assert_eq!(out, vec![11.0, 22.0]);

        let mut da = vec![0.5, 0.5];
        let mut db = vec![0.0, 0.0];
        residual_backward(&mut da, &mut db, &[1.0, -2.0]);
        assert_eq!(da, vec![1.5, -1.5]);
        assert_eq!(db, vec![1.0, -2.0]);
    }
}
