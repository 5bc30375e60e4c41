//! Noise schedules, integrators and guidance for diffusion sampling.
//!
//! The three pieces a denoising loop needs, decoupled from any model:
//!
//! - [`SigmaSchedule`]: the sequence of noise levels a run steps through,
//!   built once per run from a [`ScheduleConfig`].
//! - [`Integrator`]: advances the latent state from one noise level to the
//!   next given the model's noise prediction. Euler, linear multistep and
//!   an ancestral (stochastic) variant are provided.
//! - [`guidance`]: classifier-free guidance blending of conditional and
//!   unconditional predictions.
//!
//! Uses the k-diffusion formulation throughout for ecosystem compatibility.

pub mod euler;
pub mod guidance;
pub mod integrator;
pub mod multistep;
pub mod schedule;
pub mod stochastic;

pub use euler::EulerIntegrator;
pub use guidance::GuidanceConfig;
pub use integrator::{Integrator, IntegratorKind, SamplerError};
pub use multistep::MultistepIntegrator;
pub use schedule::{
    ScheduleConfig, ScheduleKind, SigmaSchedule, dynamic_shift, get_ancestral_step, seeded_normal,
};
pub use stochastic::StochasticIntegrator;
