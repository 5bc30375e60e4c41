//! Integrator trait and selection.

use burn::prelude::*;
use thiserror::Error;

use crate::euler::EulerIntegrator;
use crate::multistep::MultistepIntegrator;
use crate::stochastic::StochasticIntegrator;

#[derive(Error, Debug)]
pub enum SamplerError {
    #[error("invalid sampler configuration: {0}")]
    InvalidConfig(String),

    #[error("incompatible integrator state: {0}")]
    IncompatibleIntegratorState(String),
}

/// Advances the latent state by one denoising step.
///
/// `noise_pred` is the model's epsilon prediction at `from_sigma`. The
/// returned state has the same shape as the input. Integrators that keep
/// history (multistep) own it exclusively; feeding them sigmas that do not
/// continue the previous step fails with
/// [`SamplerError::IncompatibleIntegratorState`].
pub trait Integrator<B: Backend> {
    fn step(
        &mut self,
        state: Tensor<B, 4>,
        noise_pred: Tensor<B, 4>,
        from_sigma: f32,
        to_sigma: f32,
    ) -> Result<Tensor<B, 4>, SamplerError>;

    /// Clear any per-run history so the integrator can start a fresh run.
    fn reset(&mut self);
}

/// Integrator selection, validated at construction time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IntegratorKind {
    /// Deterministic first-order Euler.
    Euler,
    /// Adams-Bashforth linear multistep of the given order (1-4).
    Multistep { order: usize },
    /// Ancestral sampling with noise injection scaled by `eta`
    /// (0 = deterministic ODE, 1 = full SDE).
    Stochastic { eta: f32 },
}

impl Default for IntegratorKind {
    fn default() -> Self {
        Self::Euler
    }
}

impl IntegratorKind {
    /// Check parameters without building an integrator.
    pub fn validate(&self) -> Result<(), SamplerError> {
        match *self {
            IntegratorKind::Euler => Ok(()),
            IntegratorKind::Multistep { order } => {
                if order == 0 || order > 4 {
                    Err(SamplerError::InvalidConfig(format!(
                        "multistep order must be 1-4, got {order}"
                    )))
                } else {
                    Ok(())
                }
            }
            IntegratorKind::Stochastic { eta } => {
                if eta < 0.0 {
                    Err(SamplerError::InvalidConfig(format!(
                        "eta must be non-negative, got {eta}"
                    )))
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Build a fresh integrator for one run.
    ///
    /// The seed is only consumed by the stochastic variant; deterministic
    /// integrators ignore it.
    pub fn build<B: Backend>(&self, seed: u64) -> Result<Box<dyn Integrator<B>>, SamplerError> {
        match *self {
            IntegratorKind::Euler => Ok(Box::new(EulerIntegrator)),
            IntegratorKind::Multistep { order } => {
                Ok(Box::new(MultistepIntegrator::new(order)?))
            }
            IntegratorKind::Stochastic { eta } => {
                Ok(Box::new(StochasticIntegrator::new(eta, 1.0, seed)?))
            }
        }
    }
}
