//! Noise schedules for diffusion sampling.
//!
//! A schedule is the ordered sequence of noise levels (sigmas) one
//! synthesis run steps through, from `sigma_max` down to `sigma_min`.
//! Construction is pure; the schedule is immutable afterwards.

use burn::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::integrator::SamplerError;

/// Sigma spacing strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScheduleKind {
    /// Evenly spaced sigmas.
    Linear,
    /// Karras et al. spacing; concentrates steps near low noise.
    /// `rho = 7.0` as recommended in the paper.
    Karras { rho: f32 },
    /// Rectified-flow timeshift used by flow-matching models.
    /// `shift > 1` spends more steps at high noise; combine with
    /// [`dynamic_shift`] for resolution-dependent shifting.
    RectifiedFlow { shift: f32 },
}

impl Default for ScheduleKind {
    fn default() -> Self {
        Self::Karras { rho: 7.0 }
    }
}

/// Noise schedule configuration.
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    /// Number of denoising steps.
    pub steps: usize,
    /// Sigma spacing strategy.
    pub kind: ScheduleKind,
    /// Final noise level.
    pub sigma_min: f32,
    /// Initial noise level.
    pub sigma_max: f32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            steps: 30,
            kind: ScheduleKind::default(),
            sigma_min: 0.0292,
            sigma_max: 14.6146,
        }
    }
}

/// Precomputed sigma sequence for one run.
///
/// Holds `steps + 1` strictly decreasing values; step `i` moves the state
/// from `sigma_at(i)` to `sigma_at(i + 1)`.
#[derive(Debug, Clone)]
pub struct SigmaSchedule {
    sigmas: Vec<f32>,
    kind: ScheduleKind,
}

impl SigmaSchedule {
    /// Build a schedule from its configuration.
    ///
    /// Fails with `InvalidConfig` when `steps == 0`, when `sigma_min` is
    /// negative or when `sigma_min >= sigma_max`.
    pub fn build(config: &ScheduleConfig) -> Result<Self, SamplerError> {
        if config.steps == 0 {
            return Err(SamplerError::InvalidConfig(
                "step count must be positive".into(),
            ));
        }
        if config.sigma_min < 0.0 || !(config.sigma_min < config.sigma_max) {
            return Err(SamplerError::InvalidConfig(format!(
                "sigma range must satisfy 0 <= sigma_min < sigma_max, got [{}, {}]",
                config.sigma_min, config.sigma_max
            )));
        }

        let sigmas = match config.kind {
            ScheduleKind::Linear => {
                linear_sigmas(config.steps, config.sigma_min, config.sigma_max)
            }
            ScheduleKind::Karras { rho } => {
                if rho <= 0.0 {
                    return Err(SamplerError::InvalidConfig(format!(
                        "karras rho must be positive, got {rho}"
                    )));
                }
                karras_sigmas(config.steps, config.sigma_min, config.sigma_max, rho)
            }
            ScheduleKind::RectifiedFlow { shift } => {
                if shift <= 0.0 {
                    return Err(SamplerError::InvalidConfig(format!(
                        "rectified-flow shift must be positive, got {shift}"
                    )));
                }
                linear_sigmas(config.steps, config.sigma_min, config.sigma_max)
                    .into_iter()
                    .map(|s| shift * s / (1.0 + (shift - 1.0) * s))
                    .collect()
            }
        };

        Ok(Self {
            sigmas,
            kind: config.kind,
        })
    }

    /// Number of denoising steps (one less than the sigma count).
    pub fn steps(&self) -> usize {
        self.sigmas.len() - 1
    }

    /// Sigma at a step boundary; index 0 is `sigma_max`, index `steps()`
    /// is `sigma_min`.
    pub fn sigma_at(&self, step: usize) -> f32 {
        self.sigmas[step]
    }

    /// The full sigma sequence.
    pub fn sigmas(&self) -> &[f32] {
        &self.sigmas
    }

    pub fn sigma_max(&self) -> f32 {
        self.sigmas[0]
    }

    pub fn sigma_min(&self) -> f32 {
        self.sigmas[self.sigmas.len() - 1]
    }

    /// Nearest step boundary for a given sigma. Inverse of [`sigma_at`],
    /// used by resumable and step-skipping runs.
    ///
    /// [`sigma_at`]: Self::sigma_at
    pub fn step_index_at(&self, sigma: f32) -> usize {
        let mut best = 0;
        let mut best_dist = f32::INFINITY;
        for (i, s) in self.sigmas.iter().enumerate() {
            let dist = (s - sigma).abs();
            if dist < best_dist {
                best_dist = dist;
                best = i;
            }
        }
        best
    }

    /// First step index for a partial (img2img) run with the given
    /// denoising strength. Strength 1.0 starts at step 0 (full run);
    /// smaller strengths skip the high-noise steps.
    pub fn start_step_for_strength(&self, strength: f32) -> usize {
        let strength = strength.clamp(0.0, 1.0);
        let skipped = ((1.0 - strength) * self.steps() as f32).floor() as usize;
        skipped.min(self.steps() - 1)
    }

    /// Forward-noise a clean latent to the given sigma.
    ///
    /// Flow schedules interpolate between sample and noise; variance-
    /// exploding schedules add scaled noise on top of the sample.
    pub fn add_noise<B: Backend>(
        &self,
        clean: Tensor<B, 4>,
        noise: Tensor<B, 4>,
        sigma: f32,
    ) -> Tensor<B, 4> {
        match self.kind {
            ScheduleKind::RectifiedFlow { .. } => clean * (1.0 - sigma) + noise * sigma,
            _ => clean + noise * sigma,
        }
    }

    /// Seeded initial latent scaled by `sigma_max`.
    pub fn noise_latent<B: Backend>(
        &self,
        shape: [usize; 4],
        seed: u64,
        device: &B::Device,
    ) -> Tensor<B, 4> {
        seeded_normal::<B>(shape, seed, device) * self.sigma_max()
    }
}

fn linear_sigmas(steps: usize, sigma_min: f32, sigma_max: f32) -> Vec<f32> {
    (0..=steps)
        .map(|i| {
            let t = i as f32 / steps as f32;
            sigma_max + t * (sigma_min - sigma_max)
        })
        .collect()
}

fn karras_sigmas(steps: usize, sigma_min: f32, sigma_max: f32, rho: f32) -> Vec<f32> {
    let min_inv_rho = sigma_min.powf(1.0 / rho);
    let max_inv_rho = sigma_max.powf(1.0 / rho);
    (0..=steps)
        .map(|i| {
            let t = i as f32 / steps as f32;
            (max_inv_rho + t * (min_inv_rho - max_inv_rho)).powf(rho)
        })
        .collect()
}

/// Resolution-dependent timeshift for rectified-flow schedules.
///
/// Interpolates the shift exponent between (256 tokens, 0.5) and
/// (4096 tokens, 1.15) and returns `exp(mu)`, suitable as the `shift`
/// of [`ScheduleKind::RectifiedFlow`].
pub fn dynamic_shift(image_seq_len: usize) -> f32 {
    const BASE_SEQ_LEN: f32 = 256.0;
    const MAX_SEQ_LEN: f32 = 4096.0;
    const BASE_SHIFT: f32 = 0.5;
    const MAX_SHIFT: f32 = 1.15;

    let m = (MAX_SHIFT - BASE_SHIFT) / (MAX_SEQ_LEN - BASE_SEQ_LEN);
    let b = BASE_SHIFT - m * BASE_SEQ_LEN;
    let mu = image_seq_len as f32 * m + b;
    mu.exp()
}

/// Split an ancestral step into its deterministic target `sigma_down` and
/// noise injection level `sigma_up`.
///
/// `eta` controls stochasticity (0 = ODE, 1 = full SDE).
pub fn get_ancestral_step(sigma: f32, sigma_next: f32, eta: f32) -> (f32, f32) {
    if sigma_next == 0.0 {
        return (0.0, 0.0);
    }

    let sigma_up = (sigma_next.powi(2) * (sigma.powi(2) - sigma_next.powi(2)) / sigma.powi(2))
        .sqrt()
        .min(sigma_next)
        * eta;
    let sigma_down = (sigma_next.powi(2) - sigma_up.powi(2)).sqrt();

    (sigma_down, sigma_up)
}

/// Standard normal tensor generated host-side from a seeded RNG.
///
/// Host-side generation keeps results bit-identical across backends for a
/// given seed.
pub fn seeded_normal<B: Backend>(
    shape: [usize; 4],
    seed: u64,
    device: &B::Device,
) -> Tensor<B, 4> {
    let mut rng = StdRng::seed_from_u64(seed);
    let count: usize = shape.iter().product();
    let values: Vec<f32> = (0..count).map(|_| rng.sample(StandardNormal)).collect();
    Tensor::from_data(TensorData::new(values, shape), device)
}
