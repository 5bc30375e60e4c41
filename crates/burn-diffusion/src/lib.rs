//! burn-diffusion: diffusion synthesis in pure Rust
//!
//! Turns a conditioning signal into a final sample through iterative
//! denoising, using the Burn deep learning framework. The engine owns the
//! noise schedule, the denoising loop with classifier-free guidance, and
//! the distributed attention layer for sequences too long to attend over
//! on one worker; the neural network itself, the text encoder and the
//! output decoder plug in behind traits.
//!
//! # Backend Selection
//!
//! Choose a backend via feature flags: `ndarray` (CPU), `wgpu`
//! (cross-platform GPU), `tch` (libtorch), `cuda` (NVIDIA).
//!
//! # Example
//!
//! ```ignore
//! use burn_diffusion::{SynthesisConfig, SynthesisEngine, backends::Wgpu};
//!
//! let device = burn_diffusion::backends::default_device();
//! let config = SynthesisConfig { steps: 20, ..Default::default() };
//! let engine = SynthesisEngine::<Wgpu, _, _>::new(config, model, encoder, device)?;
//!
//! let latent = engine.generate("a sunset over mountains", "")?;
//! let image = vae.decode(latent)?;
//! ```
//!
//! Multi-rank runs create one engine per rank over a shared ring
//! topology; see [`SynthesisEngine::connect_ranks`].

pub use burn_diffusion_attention as attention;
pub use burn_diffusion_samplers as samplers;

pub mod backends;
pub mod denoise;
pub mod engine;
pub mod error;
pub mod model;
pub mod weights;

pub use denoise::{DenoiseLoop, DenoiseOptions, DenoiseStates, StepInfo};
pub use engine::{SynthesisConfig, SynthesisEngine};
pub use error::EngineError;
pub use model::{ConditionKind, Conditioning, Decoder, ScoreModel, TextEncoder};
pub use weights::{SafeTensorStore, WeightStore, load_tensor};

// Re-export the sampler and attention surface used in engine signatures.
pub use burn_diffusion_attention::{AttentionContext, AttentionError};
pub use burn_diffusion_samplers::{
    GuidanceConfig, Integrator, IntegratorKind, SamplerError, ScheduleConfig, ScheduleKind,
    SigmaSchedule,
};
