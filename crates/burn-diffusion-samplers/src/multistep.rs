//! Adams-Bashforth linear multistep integrator.
//!
//! Combines a bounded history of past derivatives with fixed coefficients
//! for higher-order accuracy at the same number of model calls.

use std::collections::VecDeque;

use burn::prelude::*;

use crate::integrator::{Integrator, SamplerError};

/// Adams-Bashforth coefficients for a given order.
pub fn adams_bashforth_coefficients(order: usize) -> Vec<f32> {
    match order {
        1 => vec![1.0],
        2 => vec![1.5, -0.5],
        3 => vec![23.0 / 12.0, -16.0 / 12.0, 5.0 / 12.0],
        4 => vec![55.0 / 24.0, -59.0 / 24.0, 37.0 / 24.0, -9.0 / 24.0],
        _ => vec![1.0],
    }
}

/// Linear multistep integrator with a bounded derivative history.
///
/// Runs first-order until two prior steps exist, then switches to the
/// configured order. The history buffer is owned by this instance and is
/// never shared; a step whose `from_sigma` does not continue the previous
/// step invalidates the history and fails.
pub struct MultistepIntegrator<B: Backend> {
    order: usize,
    derivatives: VecDeque<Tensor<B, 4>>,
    last_sigma: Option<f32>,
    steps_taken: usize,
}

impl<B: Backend> MultistepIntegrator<B> {
    /// Create a multistep integrator of the given order (1-4).
    pub fn new(order: usize) -> Result<Self, SamplerError> {
        if order == 0 || order > 4 {
            return Err(SamplerError::InvalidConfig(format!(
                "multistep order must be 1-4, got {order}"
            )));
        }
        Ok(Self {
            order,
            derivatives: VecDeque::with_capacity(order),
            last_sigma: None,
            steps_taken: 0,
        })
    }

    /// Order currently in effect, accounting for warm-up.
    fn effective_order(&self) -> usize {
        if self.steps_taken < 2 {
            1
        } else {
            self.order.min(self.derivatives.len())
        }
    }
}

impl<B: Backend> Integrator<B> for MultistepIntegrator<B> {
    fn step(
        &mut self,
        state: Tensor<B, 4>,
        noise_pred: Tensor<B, 4>,
        from_sigma: f32,
        to_sigma: f32,
    ) -> Result<Tensor<B, 4>, SamplerError> {
        if from_sigma <= 0.0 {
            return Err(SamplerError::InvalidConfig(format!(
                "cannot step from sigma {from_sigma}"
            )));
        }
        if let Some(last) = self.last_sigma {
            if (last - from_sigma).abs() > 1e-6 {
                return Err(SamplerError::IncompatibleIntegratorState(format!(
                    "history was recorded up to sigma {last}, cannot continue from {from_sigma}"
                )));
            }
        }

        let denoised = state.clone() - noise_pred * from_sigma;
        let derivative = (state.clone() - denoised) / from_sigma;

        self.derivatives.push_front(derivative);
        if self.derivatives.len() > self.order {
            self.derivatives.pop_back();
        }

        let order = self.effective_order();
        let coefficients = adams_bashforth_coefficients(order);
        let dt = to_sigma - from_sigma;

        let mut result = state;
        for (coefficient, derivative) in coefficients.iter().zip(self.derivatives.iter()) {
            result = result + derivative.clone() * (*coefficient * dt);
        }

        self.last_sigma = Some(to_sigma);
        self.steps_taken += 1;
        Ok(result)
    }

    fn reset(&mut self) {
        self.derivatives.clear();
        self.last_sigma = None;
        self.steps_taken = 0;
    }
}
