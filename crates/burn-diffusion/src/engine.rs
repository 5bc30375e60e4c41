//! Top-level synthesis driver.
//!
//! Wires conditioning, schedule, integrator and the denoise loop into a
//! single call, optionally under a multi-rank attention topology.

use burn::prelude::*;
use burn_diffusion_attention::{AttentionContext, AttentionError, RingTopology};
use burn_diffusion_samplers::{
    GuidanceConfig, IntegratorKind, ScheduleConfig, ScheduleKind, SigmaSchedule,
};

use crate::denoise::{DenoiseLoop, DenoiseOptions};
use crate::error::EngineError;
use crate::model::{Decoder, ScoreModel, TextEncoder};
use crate::weights::WeightStore;

/// Configuration for one synthesis engine, validated eagerly.
#[derive(Debug, Clone)]
pub struct SynthesisConfig {
    /// Output width in pixels; must be a multiple of 8.
    pub width: usize,
    /// Output height in pixels; must be a multiple of 8.
    pub height: usize,
    /// Latent channels of the model family (4 for SD 1.x, 16 for flow
    /// models).
    pub latent_channels: usize,
    /// Number of denoising steps.
    pub steps: usize,
    /// Sigma spacing strategy.
    pub schedule: ScheduleKind,
    pub sigma_min: f32,
    pub sigma_max: f32,
    pub guidance: GuidanceConfig,
    pub integrator: IntegratorKind,
    /// Seed for the initial latent and any stochastic integrator.
    /// `None` draws a fresh seed per call and is only accepted for
    /// single-rank runs; multi-rank runs must share one seed.
    pub seed: Option<u64>,
    /// Attention workers participating in each model invocation.
    pub rank_count: usize,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            width: 512,
            height: 512,
            latent_channels: 4,
            steps: 30,
            schedule: ScheduleKind::default(),
            sigma_min: 0.0292,
            sigma_max: 14.6146,
            guidance: GuidanceConfig::default(),
            integrator: IntegratorKind::default(),
            seed: None,
            rank_count: 1,
        }
    }
}

impl SynthesisConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.width == 0 || self.width % 8 != 0 || self.height == 0 || self.height % 8 != 0 {
            return Err(EngineError::InvalidConfig(format!(
                "output size {}x{} must be non-zero multiples of 8",
                self.width, self.height
            )));
        }
        if self.latent_channels == 0 {
            return Err(EngineError::InvalidConfig(
                "latent channel count must be positive".into(),
            ));
        }
        if self.rank_count == 0 {
            return Err(EngineError::Attention(AttentionError::InvalidTopology(
                "rank count must be positive".into(),
            )));
        }
        // Every rank advances the same global state sharded by sequence;
        // an unseeded multi-rank run would draw a different initial latent
        // per rank and silently corrupt the output.
        if self.rank_count > 1 && self.seed.is_none() {
            return Err(EngineError::InvalidConfig(format!(
                "an explicit seed is required for {} ranks so all ranks share one initial latent",
                self.rank_count
            )));
        }
        self.guidance.validate()?;
        // Schedule and integrator parameters are checked by their own
        // constructors; run those checks here so bad configs fail before
        // any run starts.
        SigmaSchedule::build(&self.schedule_config())?;
        self.integrator.validate()?;
        Ok(())
    }

    pub fn schedule_config(&self) -> ScheduleConfig {
        ScheduleConfig {
            steps: self.steps,
            kind: self.schedule,
            sigma_min: self.sigma_min,
            sigma_max: self.sigma_max,
        }
    }

    /// Latent shape for a single-image batch.
    pub fn latent_shape(&self) -> [usize; 4] {
        [1, self.latent_channels, self.height / 8, self.width / 8]
    }
}

/// One synthesis engine: a score model, a text encoder and a resolved
/// attention context.
///
/// For multi-rank runs, build one engine per rank with
/// [`SynthesisEngine::connect_ranks`] and run them on their own workers;
/// the topology is created once and lives as long as the engines.
pub struct SynthesisEngine<B: Backend, M, E> {
    config: SynthesisConfig,
    model: M,
    encoder: E,
    attention: AttentionContext,
    device: B::Device,
}

impl<B, M, E> SynthesisEngine<B, M, E>
where
    B: Backend,
    M: ScoreModel<B>,
    E: TextEncoder<B>,
{
    /// Single-rank engine.
    pub fn new(
        config: SynthesisConfig,
        model: M,
        encoder: E,
        device: B::Device,
    ) -> Result<Self, EngineError> {
        if config.rank_count != 1 {
            return Err(EngineError::Attention(AttentionError::InvalidTopology(
                format!(
                    "single-rank constructor used with rank count {}; use connect_ranks",
                    config.rank_count
                ),
            )));
        }
        Self::with_attention(config, model, encoder, device, AttentionContext::Local)
    }

    /// Engine bound to one rank of an existing topology.
    pub fn with_attention(
        config: SynthesisConfig,
        model: M,
        encoder: E,
        device: B::Device,
        attention: AttentionContext,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        if attention.rank_count() != config.rank_count {
            return Err(EngineError::Attention(AttentionError::InvalidTopology(
                format!(
                    "configured for {} ranks but attention context has {}",
                    config.rank_count,
                    attention.rank_count()
                ),
            )));
        }
        Ok(Self {
            config,
            model,
            encoder,
            attention,
            device,
        })
    }

    /// Create the per-rank attention contexts for a multi-rank run, in
    /// rank order.
    pub fn connect_ranks(rank_count: usize) -> Result<Vec<AttentionContext>, EngineError> {
        if rank_count == 1 {
            return Ok(vec![AttentionContext::Local]);
        }
        Ok(RingTopology::connect(rank_count)?
            .into_iter()
            .map(AttentionContext::Ring)
            .collect())
    }

    pub fn config(&self) -> &SynthesisConfig {
        &self.config
    }

    /// Check that the weight store can supply every required tensor.
    ///
    /// Called before a run so a missing checkpoint fails fast instead of
    /// mid-loop.
    pub fn verify_weights(
        &self,
        store: &dyn WeightStore,
        required: &[&str],
    ) -> Result<(), EngineError> {
        let missing: Vec<&str> = required
            .iter()
            .copied()
            .filter(|name| !store.contains(name))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(EngineError::ModelUnavailable(format!(
                "weight store is missing tensors: {}",
                missing.join(", ")
            )))
        }
    }

    /// Run one synthesis call and return the final latent for external
    /// decoding.
    pub fn generate(&self, prompt: &str, negative_prompt: &str) -> Result<Tensor<B, 4>, EngineError> {
        self.generate_with(prompt, negative_prompt, DenoiseOptions::default())
    }

    /// [`generate`] with explicit loop options (early stop, cancellation,
    /// step callback).
    ///
    /// [`generate`]: Self::generate
    pub fn generate_with(
        &self,
        prompt: &str,
        negative_prompt: &str,
        options: DenoiseOptions<'_, B>,
    ) -> Result<Tensor<B, 4>, EngineError> {
        let conditioning = self.encoder.encode(prompt, negative_prompt)?;
        if conditioning.positive().is_none() {
            return Err(EngineError::InvalidConfig(
                "encoder produced no positive conditioning".into(),
            ));
        }

        let schedule = SigmaSchedule::build(&self.config.schedule_config())?;
        let seed = self.config.seed.unwrap_or_else(rand::random);

        let latent = schedule.noise_latent::<B>(self.config.latent_shape(), seed, &self.device);
        // Decorrelate the integrator's noise stream from the initial latent.
        let mut integrator = self.config.integrator.build::<B>(seed.wrapping_add(1))?;

        let denoise = DenoiseLoop::new(schedule, self.config.guidance)?;
        denoise.run(
            latent,
            &conditioning,
            &self.model,
            integrator.as_mut(),
            &self.attention,
            options,
        )
    }

    /// Run one synthesis call and decode the result.
    pub fn generate_and_decode(
        &self,
        prompt: &str,
        negative_prompt: &str,
        decoder: &dyn Decoder<B>,
    ) -> Result<Tensor<B, 4>, EngineError> {
        let latent = self.generate(prompt, negative_prompt)?;
        decoder.decode(latent)
    }
}
