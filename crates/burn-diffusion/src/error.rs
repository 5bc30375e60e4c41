//! Engine error taxonomy.

use burn_diffusion_attention::AttentionError;
use burn_diffusion_samplers::SamplerError;
use safetensors::Dtype;
use thiserror::Error;

/// Errors surfaced by a synthesis call.
///
/// Sampler and attention errors propagate unchanged; none are retried by
/// the engine, retry policy belongs to the caller. A failed call leaves
/// no state behind beyond dropped per-run buffers.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Sampler(#[from] SamplerError),

    #[error(transparent)]
    Attention(#[from] AttentionError),

    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),

    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("tensor not found: {0}")]
    MissingTensor(String),

    #[error("unsupported tensor dtype: {0:?}")]
    UnsupportedDtype(Dtype),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("safetensors error: {0}")]
    Safetensors(#[from] safetensors::SafeTensorError),

    #[error("synthesis cancelled at step {0}")]
    Cancelled(usize),
}
