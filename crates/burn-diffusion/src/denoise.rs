//! The denoising loop.
//!
//! Orchestrates schedule, guidance, score model and integrator across all
//! steps of one run. Within a run the loop is strictly sequential: each
//! step depends on the previous state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use burn::prelude::*;
use burn_diffusion_attention::AttentionContext;
use burn_diffusion_samplers::{GuidanceConfig, Integrator, SigmaSchedule, guidance};

use crate::error::EngineError;
use crate::model::{ConditionKind, Conditioning, ScoreModel};

/// Per-step progress information passed to the step callback.
pub struct StepInfo {
    /// Completed step, 0-indexed.
    pub step: usize,
    pub total_steps: usize,
    /// Noise level after this step.
    pub sigma: f32,
}

/// Options for one run of the loop.
///
/// `early_stop` yields the state after that many steps as the final
/// result (previews, partial generation). `cancel` is checked between
/// steps only; a step is atomic. `on_step` observes every intermediate
/// state.
pub struct DenoiseOptions<'a, B: Backend> {
    pub early_stop: Option<usize>,
    pub cancel: Option<Arc<AtomicBool>>,
    pub on_step: Option<Box<dyn FnMut(StepInfo, &Tensor<B, 4>) + 'a>>,
}

impl<B: Backend> Default for DenoiseOptions<'_, B> {
    fn default() -> Self {
        Self {
            early_stop: None,
            cancel: None,
            on_step: None,
        }
    }
}

/// Schedule + guidance orchestration for one synthesis call.
///
/// The schedule and conditioning are read-only for the whole run; the
/// integrator and its history are exclusively owned by the run.
pub struct DenoiseLoop {
    schedule: SigmaSchedule,
    guidance: GuidanceConfig,
}

impl DenoiseLoop {
    pub fn new(schedule: SigmaSchedule, guidance: GuidanceConfig) -> Result<Self, EngineError> {
        guidance.validate()?;
        Ok(Self { schedule, guidance })
    }

    pub fn schedule(&self) -> &SigmaSchedule {
        &self.schedule
    }

    /// Lazy sequence of intermediate states, one per step.
    ///
    /// Nothing is cached: restarting means calling this again with the
    /// same inputs. The iterator ends after `schedule.steps()` states or
    /// at the first error.
    pub fn states<'a, B: Backend, M: ScoreModel<B>>(
        &'a self,
        initial: Tensor<B, 4>,
        conditioning: &'a Conditioning<B>,
        model: &'a M,
        integrator: &'a mut dyn Integrator<B>,
        attention: &'a AttentionContext,
    ) -> DenoiseStates<'a, B, M> {
        DenoiseStates {
            schedule: &self.schedule,
            guidance: self.guidance,
            conditioning,
            model,
            integrator,
            attention,
            state: Some(initial),
            step: 0,
        }
    }

    /// Run the loop to completion (or to `early_stop`) and return the
    /// final state.
    pub fn run<B: Backend, M: ScoreModel<B>>(
        &self,
        initial: Tensor<B, 4>,
        conditioning: &Conditioning<B>,
        model: &M,
        integrator: &mut dyn Integrator<B>,
        attention: &AttentionContext,
        mut options: DenoiseOptions<'_, B>,
    ) -> Result<Tensor<B, 4>, EngineError> {
        let total_steps = self.schedule.steps();
        let limit = options
            .early_stop
            .map(|k| k.min(total_steps))
            .unwrap_or(total_steps);
        if limit == 0 {
            return Ok(initial);
        }

        let mut last = None;
        let mut states = self.states(initial, conditioning, model, integrator, attention);
        for step in 0..limit {
            if let Some(cancel) = &options.cancel {
                if cancel.load(Ordering::SeqCst) {
                    return Err(EngineError::Cancelled(step));
                }
            }

            let state = match states.next() {
                Some(state) => state?,
                None => break,
            };

            if let Some(on_step) = options.on_step.as_mut() {
                on_step(
                    StepInfo {
                        step,
                        total_steps,
                        sigma: states.schedule.sigma_at(step + 1),
                    },
                    &state,
                );
            }
            last = Some(state);
        }

        last.ok_or_else(|| EngineError::InvalidConfig("denoise loop produced no states".into()))
    }
}

/// Iterator over the per-step states of one run.
pub struct DenoiseStates<'a, B: Backend, M: ScoreModel<B>> {
    schedule: &'a SigmaSchedule,
    guidance: GuidanceConfig,
    conditioning: &'a Conditioning<B>,
    model: &'a M,
    integrator: &'a mut dyn Integrator<B>,
    attention: &'a AttentionContext,
    state: Option<Tensor<B, 4>>,
    step: usize,
}

impl<B: Backend, M: ScoreModel<B>> DenoiseStates<'_, B, M> {
    fn advance(&mut self) -> Result<Tensor<B, 4>, EngineError> {
        let state = self
            .state
            .take()
            .ok_or_else(|| EngineError::InvalidConfig("denoise state already consumed".into()))?;
        let sigma = self.schedule.sigma_at(self.step);
        let next_sigma = self.schedule.sigma_at(self.step + 1);

        let noise_pred = predict_guided(
            self.model,
            state.clone(),
            sigma,
            self.conditioning,
            self.guidance,
            self.attention,
        )?;
        let next = self
            .integrator
            .step(state, noise_pred, sigma, next_sigma)?;

        self.state = Some(next.clone());
        self.step += 1;
        Ok(next)
    }
}

impl<B: Backend, M: ScoreModel<B>> Iterator for DenoiseStates<'_, B, M> {
    type Item = Result<Tensor<B, 4>, EngineError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.step >= self.schedule.steps() {
            return None;
        }
        match self.advance() {
            Ok(state) => Some(Ok(state)),
            Err(error) => {
                // Stop after the first error; partial runs are not resumable.
                self.step = self.schedule.steps();
                Some(Err(error))
            }
        }
    }
}

/// One guided noise prediction.
///
/// Inactive guidance (scale <= 1) or missing negative conditioning
/// evaluates the positive branch only. Active guidance evaluates both in
/// a single batched invocation when the model supports it, then blends in
/// noise space at full precision.
fn predict_guided<B: Backend, M: ScoreModel<B>>(
    model: &M,
    state: Tensor<B, 4>,
    sigma: f32,
    conditioning: &Conditioning<B>,
    guidance_config: GuidanceConfig,
    attention: &AttentionContext,
) -> Result<Tensor<B, 4>, EngineError> {
    let positive = conditioning
        .get(ConditionKind::Positive)
        .ok_or_else(|| EngineError::InvalidConfig("positive conditioning is required".into()))?;

    let negative = match conditioning.get(ConditionKind::Negative) {
        Some(negative) if guidance_config.is_active() => negative,
        _ => return model.predict(state, sigma, positive.clone(), attention),
    };

    let mut predictions = model.predict_batch(
        state,
        sigma,
        &[positive.clone(), negative.clone()],
        attention,
    )?;
    if predictions.len() != 2 {
        return Err(EngineError::InvalidConfig(format!(
            "model returned {} predictions for 2 conditionings",
            predictions.len()
        )));
    }

    let uncond = predictions.pop().ok_or_else(|| {
        EngineError::InvalidConfig("model returned no unconditional prediction".into())
    })?;
    let cond = predictions.pop().ok_or_else(|| {
        EngineError::InvalidConfig("model returned no conditional prediction".into())
    })?;

    let guided = guidance::blend(uncond, &[cond.clone()], guidance_config.scale)?;
    Ok(guidance::rescale_guided(
        guided,
        &cond,
        guidance_config.rescale,
    ))
}
