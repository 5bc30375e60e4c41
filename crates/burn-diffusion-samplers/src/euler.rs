//! First-order Euler integrator.
//!
//! The simplest ODE step; fast and produces good results in ~20-30 steps.

use burn::prelude::*;

use crate::integrator::{Integrator, SamplerError};

/// Deterministic first-order Euler step.
///
/// k-diffusion form: `denoised = x - sigma * eps`, `d = (x - denoised) /
/// sigma`, `x' = x + d * (sigma_next - sigma)`.
pub struct EulerIntegrator;

impl<B: Backend> Integrator<B> for EulerIntegrator {
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

        let dt = to_sigma - from_sigma;
        let denoised = state.clone() - noise_pred * from_sigma;
        let derivative = (state.clone() - denoised) / from_sigma;

        Ok(state + derivative * dt)
    }

    fn reset(&mut self) {}
}
