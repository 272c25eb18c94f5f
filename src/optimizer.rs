//! AdamW Optimizer
//!
//! Adam with decoupled weight decay, applied over the flat parameter and
//! gradient buffers. Per element:
//!
//! ```text
//! m = beta1 * m + (1 - beta1) * g
//! v = beta2 * v + (1 - beta2) * g^2
//! m_hat = m / (1 - beta1^t)        t counts updates, starting at 1
//! v_hat = v / (1 - beta2^t)
//! p -= lr * (m_hat / (sqrt(v_hat) + eps) + weight_decay * p)
//! ```
//!
//! The decay term multiplies the parameter, not the gradient, and applies
//! uniformly to every parameter. Moment buffers are allocated lazily on
//! the first update and persist across steps; the step counter lives here
//! too, so one optimizer should drive one model.

use crate::error::{Result, TouchstoneError};
use crate::layout::alloc_zeroed;
use crate::model::Gpt2;
use rayon::prelude::*;

/// AdamW state and hyperparameters.
pub struct AdamW {
    pub beta1: f32,
    pub beta2: f32,
    pub eps: f32,
    pub weight_decay: f32,
    step: u32,
    m: Vec<f32>,
    v: Vec<f32>,
}

impl AdamW {
    pub fn new(beta1: f32, beta2: f32, eps: f32, weight_decay: f32) -> Self {
        Self {
            beta1,
            beta2,
            eps,
            weight_decay,
            step: 0,
            m: Vec::new(),
            v: Vec::new(),
        }
    }

    /// The defaults used by the training driver.
    pub fn default_config() -> Self {
        Self::new(0.9, 0.999, 1e-8, 0.0)
    }

    /// Number of updates applied so far.
    pub fn steps(&self) -> u32 {
        self.step
    }

    /// Apply one update to the model's parameters.
    ///
    /// # Errors
    ///
    /// - `Sequencing` if the model has no gradients yet
    /// - `OutOfMemory` if the first-call moment allocation fails
    pub fn update(&mut self, model: &mut Gpt2, learning_rate: f32) -> Result<()> {
        let n = model.num_parameters();
        if self.m.is_empty() {
            self.m = alloc_zeroed(n)?;
            self.v = alloc_zeroed(n)?;
        }
        let (params, grads) = model.params_and_grads_mut()?;

        self.step += 1;
        let beta1 = self.beta1;
        let beta2 = self.beta2;
        let eps = self.eps;
        let decay = self.weight_decay;
        let bc1 = 1.0 - beta1.powi(self.step as i32);
        let bc2 = 1.0 - beta2.powi(self.step as i32);

        params
            .par_iter_mut()
            .zip(grads.par_iter())
            .zip(self.m.par_iter_mut())
            .zip(self.v.par_iter_mut())
            .for_each(|(((p, &g), m), v)| {
                *m = beta1 * *m + (1.0 - beta1) * g;
                *v = beta2 * *v + (1.0 - beta2) * g * g;
                let m_hat = *m / bc1;
                let v_hat = *v / bc2;
                *p -= learning_rate * (m_hat / (v_hat.sqrt() + eps) + decay * *p);
            });
        Ok(())
    }
}

/// L2 norm of the model's gradient buffer.
///
/// # Errors
///
/// `Sequencing` if no backward pass has produced gradients.
pub fn grad_norm(model: &Gpt2) -> Result<f32> {
    let grads = model.grads().ok_or(TouchstoneError::Sequencing)?;
    let sum_sq: f32 = grads.par_iter().map(|&g| g * g).sum();
    Ok(sum_sq.sqrt())
}

/// Scale gradients down so their L2 norm is at most `max_norm`.
///
/// Returns the pre-clip norm.
pub fn clip_grad_norm(model: &mut Gpt2, max_norm: f32) -> Result<f32> {
    let norm = grad_norm(model)?;
    if norm > max_norm {
        let scale = max_norm / norm;
        let grads = model.grads_mut().ok_or(TouchstoneError::Sequencing)?;
        grads.par_iter_mut().for_each(|g| *g *= scale);
    }
    Ok(norm)
}
