//! External collaborator interfaces.
//!
//! The engine treats the neural network, text encoder and output decoder
//! as opaque capabilities behind these traits, so the sampler core can be
//! driven by a deterministic stub in tests and by a real network in
//! production.

use std::collections::HashMap;

use burn::prelude::*;
use burn_diffusion_attention::AttentionContext;

use crate::error::EngineError;

/// Role of a conditioning embedding within guidance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConditionKind {
    Positive,
    Negative,
}

/// Conditioning embeddings for one run, produced once by the text encoder
/// and read-only afterwards.
#[derive(Clone)]
pub struct Conditioning<B: Backend> {
    embeddings: HashMap<ConditionKind, Tensor<B, 3>>,
}

impl<B: Backend> Conditioning<B> {
    pub fn new() -> Self {
        Self {
            embeddings: HashMap::new(),
        }
    }

    pub fn insert(&mut self, kind: ConditionKind, embedding: Tensor<B, 3>) {
        self.embeddings.insert(kind, embedding);
    }

    pub fn get(&self, kind: ConditionKind) -> Option<&Tensor<B, 3>> {
        self.embeddings.get(&kind)
    }

    pub fn positive(&self) -> Option<&Tensor<B, 3>> {
        self.get(ConditionKind::Positive)
    }

    pub fn negative(&self) -> Option<&Tensor<B, 3>> {
        self.get(ConditionKind::Negative)
    }
}

impl<B: Backend> Default for Conditioning<B> {
    fn default() -> Self {
        Self::new()
    }
}

/// The learned noise predictor.
///
/// `predict` must be deterministic given its inputs; any internal
/// attention should route through the supplied [`AttentionContext`] so
/// multi-rank runs shard correctly.
pub trait ScoreModel<B: Backend> {
    fn predict(
        &self,
        state: Tensor<B, 4>,
        sigma: f32,
        conditioning: Tensor<B, 3>,
        attention: &AttentionContext,
    ) -> Result<Tensor<B, 4>, EngineError>;

    /// Whether several conditionings can be evaluated in one invocation.
    fn supports_batching(&self) -> bool {
        false
    }

    /// Evaluate one prediction per conditioning.
    ///
    /// The default loops [`predict`]; models that batch conditional and
    /// unconditional branches together override this to halve per-step
    /// latency.
    ///
    /// [`predict`]: Self::predict
    fn predict_batch(
        &self,
        state: Tensor<B, 4>,
        sigma: f32,
        conditionings: &[Tensor<B, 3>],
        attention: &AttentionContext,
    ) -> Result<Vec<Tensor<B, 4>>, EngineError> {
        conditionings
            .iter()
            .map(|conditioning| self.predict(state.clone(), sigma, conditioning.clone(), attention))
            .collect()
    }
}

/// Shared models (one network serving several engines or test observers)
/// work through `Arc` without a wrapper type.
impl<B: Backend, M: ScoreModel<B> + ?Sized> ScoreModel<B> for std::sync::Arc<M> {
    fn predict(
        &self,
        state: Tensor<B, 4>,
        sigma: f32,
        conditioning: Tensor<B, 3>,
        attention: &AttentionContext,
    ) -> Result<Tensor<B, 4>, EngineError> {
        (**self).predict(state, sigma, conditioning, attention)
    }

    fn supports_batching(&self) -> bool {
        (**self).supports_batching()
    }

    fn predict_batch(
        &self,
        state: Tensor<B, 4>,
        sigma: f32,
        conditionings: &[Tensor<B, 3>],
        attention: &AttentionContext,
    ) -> Result<Vec<Tensor<B, 4>>, EngineError> {
        (**self).predict_batch(state, sigma, conditionings, attention)
    }
}

/// Turns prompt text into conditioning embeddings.
pub trait TextEncoder<B: Backend> {
    fn encode(&self, positive: &str, negative: &str) -> Result<Conditioning<B>, EngineError>;
}

/// Decodes a final latent into output media (e.g. a VAE).
pub trait Decoder<B: Backend> {
    fn decode(&self, latent: Tensor<B, 4>) -> Result<Tensor<B, 4>, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestBackend = burn_ndarray::NdArray;

    #[test]
    fn conditioning_keeps_kinds_separate() {
        let device = Default::default();
        let mut conditioning = Conditioning::<TestBackend>::new();
        conditioning.insert(
            ConditionKind::Positive,
            Tensor::ones([1, 4, 8], &device),
        );

        assert!(conditioning.positive().is_some());
        assert!(conditioning.negative().is_none());
    }
}
