//! Classifier-free guidance blending.
//!
//! Guidance combines conditional and unconditional noise predictions as
//! `uncond + scale * (cond - uncond)`. The blend runs in the backend's
//! native float precision; reduced-precision blending shows up as visible
//! banding.

use burn::prelude::*;

use crate::integrator::SamplerError;

/// Guidance configuration, immutable per run.
#[derive(Debug, Clone, Copy)]
pub struct GuidanceConfig {
    /// Guidance strength (typically 5.0-8.0). Values <= 1.0 disable
    /// guidance entirely: only the conditional branch is evaluated.
    pub scale: f32,
    /// Std-matching rescale factor in `[0, 1]` to counter over-saturation
    /// at high scales (0.0 = off, 0.7 = recommended when enabled).
    pub rescale: f32,
}

impl Default for GuidanceConfig {
    fn default() -> Self {
        Self {
            scale: 7.5,
            rescale: 0.0,
        }
    }
}

impl GuidanceConfig {
    pub fn validate(&self) -> Result<(), SamplerError> {
        if self.scale < 0.0 {
            return Err(SamplerError::InvalidConfig(format!(
                "guidance scale must be non-negative, got {}",
                self.scale
            )));
        }
        if !(0.0..=1.0).contains(&self.rescale) {
            return Err(SamplerError::InvalidConfig(format!(
                "guidance rescale must be in [0, 1], got {}",
                self.rescale
            )));
        }
        Ok(())
    }

    /// Whether the unconditional branch needs to be evaluated at all.
    pub fn is_active(&self) -> bool {
        self.scale > 1.0
    }
}

/// Blend an unconditional prediction with one or more conditional ones.
///
/// With a single conditional this is standard CFG; with several, the
/// conditionals are averaged before extrapolating from the unconditional
/// branch. Fails when no conditional prediction is supplied.
pub fn blend<B: Backend>(
    uncond: Tensor<B, 4>,
    conds: &[Tensor<B, 4>],
    scale: f32,
) -> Result<Tensor<B, 4>, SamplerError> {
    let Some(first) = conds.first() else {
        return Err(SamplerError::InvalidConfig(
            "guidance requires at least one conditional prediction".into(),
        ));
    };

    let mut combined = first.clone();
    for cond in &conds[1..] {
        combined = combined + cond.clone();
    }
    let combined = combined / conds.len() as f32;

    Ok(uncond.clone() + (combined - uncond) * scale)
}

/// Standard deviation of a tensor, flattened.
pub fn tensor_std<B: Backend>(tensor: &Tensor<B, 4>) -> f32 {
    let flattened = tensor.clone().flatten::<1>(0, 3);
    let std = flattened.var(0).sqrt();
    std.into_data().to_vec::<f32>().unwrap()[0]
}

/// Rescale a guided prediction towards the conditional branch's std.
///
/// `factor` interpolates between no rescale (0.0) and full std matching
/// (1.0).
pub fn rescale_guided<B: Backend>(
    guided: Tensor<B, 4>,
    cond: &Tensor<B, 4>,
    factor: f32,
) -> Tensor<B, 4> {
    if factor <= 0.0 {
        return guided;
    }

    let std_cond = tensor_std(cond);
    let std_guided = tensor_std(&guided);
    if std_guided <= 1e-6 {
        return guided;
    }

    let ratio = std_cond / std_guided * factor + (1.0 - factor);
    guided * ratio
}
