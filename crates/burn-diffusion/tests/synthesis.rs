//! End-to-end denoise loop and engine behavior against a deterministic
//! stub model.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use burn::prelude::*;
use burn_diffusion::{
    AttentionContext, Conditioning, ConditionKind, DenoiseOptions, EngineError, GuidanceConfig,
    IntegratorKind, ScheduleKind, ScoreModel, SynthesisConfig, SynthesisEngine, TextEncoder,
    WeightStore,
};

type TestBackend = burn_ndarray::NdArray;

/// Predicts a noise tensor filled with the conditioning's first value,
/// scaled down so the state stays finite. Counts invocations.
struct StubModel {
    predict_calls: AtomicUsize,
    batch_calls: AtomicUsize,
    batching: bool,
}

impl StubModel {
    fn new(batching: bool) -> Self {
        Self {
            predict_calls: AtomicUsize::new(0),
            batch_calls: AtomicUsize::new(0),
            batching,
        }
    }
}

impl ScoreModel<TestBackend> for StubModel {
    fn predict(
        &self,
        state: Tensor<TestBackend, 4>,
        _sigma: f32,
        conditioning: Tensor<TestBackend, 3>,
        _attention: &AttentionContext,
    ) -> Result<Tensor<TestBackend, 4>, EngineError> {
        self.predict_calls.fetch_add(1, Ordering::SeqCst);
        let value = conditioning.into_data().to_vec::<f32>().unwrap()[0];
        Ok(state * 0.0 + value * 0.1)
    }

    fn supports_batching(&self) -> bool {
        self.batching
    }

    fn predict_batch(
        &self,
        state: Tensor<TestBackend, 4>,
        sigma: f32,
        conditionings: &[Tensor<TestBackend, 3>],
        attention: &AttentionContext,
    ) -> Result<Vec<Tensor<TestBackend, 4>>, EngineError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        if !self.batching {
            return conditionings
                .iter()
                .map(|c| self.predict(state.clone(), sigma, c.clone(), attention))
                .collect();
        }
        // One "network invocation" covering every conditioning.
        conditionings
            .iter()
            .map(|c| {
                let value = c.clone().into_data().to_vec::<f32>().unwrap()[0];
                Ok(state.clone() * 0.0 + value * 0.1)
            })
            .collect()
    }
}

struct StubEncoder {
    positive: f32,
    negative: Option<f32>,
}

impl TextEncoder<TestBackend> for StubEncoder {
    fn encode(
        &self,
        _positive: &str,
        _negative: &str,
    ) -> Result<Conditioning<TestBackend>, EngineError> {
        let device = Default::default();
        let mut conditioning = Conditioning::new();
        conditioning.insert(
            ConditionKind::Positive,
            Tensor::ones([1, 4, 8], &device) * self.positive,
        );
        if let Some(negative) = self.negative {
            conditioning.insert(
                ConditionKind::Negative,
                Tensor::ones([1, 4, 8], &device) * negative,
            );
        }
        Ok(conditioning)
    }
}

fn config(steps: usize, guidance_scale: f32) -> SynthesisConfig {
    SynthesisConfig {
        width: 64,
        height: 64,
        latent_channels: 4,
        steps,
        schedule: ScheduleKind::Linear,
        sigma_min: 0.0,
        sigma_max: 1.0,
        guidance: GuidanceConfig {
            scale: guidance_scale,
            rescale: 0.0,
        },
        integrator: IntegratorKind::Euler,
        seed: Some(7),
        rank_count: 1,
    }
}

fn to_vec(t: Tensor<TestBackend, 4>) -> Vec<f32> {
    t.into_data().to_vec().unwrap()
}

#[test]
fn twenty_steps_consume_twenty_model_invocations() {
    // Batched CFG: one network invocation per step, shape preserved.
    let model = Arc::new(StubModel::new(true));
    let encoder = StubEncoder {
        positive: 1.0,
        negative: Some(-1.0),
    };
    let engine =
        SynthesisEngine::new(config(20, 7.5), model.clone(), encoder, Default::default()).unwrap();

    let latent = engine.generate("a prompt", "a negative prompt").unwrap();
    assert_eq!(latent.dims(), [1, 4, 8, 8]);
    assert_eq!(model.batch_calls.load(Ordering::SeqCst), 20);
    assert_eq!(model.predict_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn unbatched_and_unguided_invocation_counts() {
    // Unbatched model: two evaluations per step.
    let model = Arc::new(StubModel::new(false));
    let encoder = StubEncoder {
        positive: 1.0,
        negative: Some(-1.0),
    };
    let engine =
        SynthesisEngine::new(config(20, 7.5), model.clone(), encoder, Default::default()).unwrap();
    engine.generate("p", "n").unwrap();
    assert_eq!(model.predict_calls.load(Ordering::SeqCst), 40);

    // Inactive guidance: the negative branch is never evaluated.
    let model = Arc::new(StubModel::new(false));
    let encoder = StubEncoder {
        positive: 1.0,
        negative: Some(-1.0),
    };
    let engine =
        SynthesisEngine::new(config(20, 0.0), model.clone(), encoder, Default::default()).unwrap();
    engine.generate("p", "n").unwrap();
    assert_eq!(model.predict_calls.load(Ordering::SeqCst), 20);
    assert_eq!(model.batch_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn zero_guidance_is_independent_of_negative_conditioning() {
    let run = |negative: f32| {
        let engine = SynthesisEngine::new(
            config(10, 0.0),
            StubModel::new(false),
            StubEncoder {
                positive: 1.0,
                negative: Some(negative),
            },
            Default::default(),
        )
        .unwrap();
        to_vec(engine.generate("p", "n").unwrap())
    };

    assert_eq!(run(-1.0), run(123.0));
}

#[test]
fn guided_output_differs_from_unguided() {
    let run = |scale: f32| {
        let engine = SynthesisEngine::new(
            config(10, scale),
            StubModel::new(true),
            StubEncoder {
                positive: 1.0,
                negative: Some(-1.0),
            },
            Default::default(),
        )
        .unwrap();
        to_vec(engine.generate("p", "n").unwrap())
    };

    assert_ne!(run(0.0), run(7.5));
}

#[test]
fn batched_and_sequential_guidance_agree() {
    let run = |batching: bool| {
        let engine = SynthesisEngine::new(
            config(10, 7.5),
            StubModel::new(batching),
            StubEncoder {
                positive: 1.0,
                negative: Some(-1.0),
            },
            Default::default(),
        )
        .unwrap();
        to_vec(engine.generate("p", "n").unwrap())
    };

    assert_eq!(run(true), run(false));
}

#[test]
fn fixed_seed_is_reproducible_with_stochastic_integrator() {
    let run = |seed: u64| {
        let mut cfg = config(12, 0.0);
        cfg.sigma_min = 0.01; // keep from_sigma positive for every step
        cfg.integrator = IntegratorKind::Stochastic { eta: 1.0 };
        cfg.seed = Some(seed);
        let engine = SynthesisEngine::new(
            cfg,
            StubModel::new(false),
            StubEncoder {
                positive: 1.0,
                negative: None,
            },
            Default::default(),
        )
        .unwrap();
        to_vec(engine.generate("p", "").unwrap())
    };

    assert_eq!(run(99), run(99));
    assert_ne!(run(99), run(100));
}

#[test]
fn early_stop_yields_partial_state() {
    let model = Arc::new(StubModel::new(true));
    let engine = SynthesisEngine::new(
        config(20, 7.5),
        model.clone(),
        StubEncoder {
            positive: 1.0,
            negative: Some(-1.0),
        },
        Default::default(),
    )
    .unwrap();

    let options = DenoiseOptions {
        early_stop: Some(5),
        ..Default::default()
    };
    let latent = engine.generate_with("p", "n", options).unwrap();
    assert_eq!(latent.dims(), [1, 4, 8, 8]);
    assert_eq!(model.batch_calls.load(Ordering::SeqCst), 5);
}

#[test]
fn cancellation_between_steps_aborts_the_run() {
    let engine = SynthesisEngine::new(
        config(20, 0.0),
        StubModel::new(false),
        StubEncoder {
            positive: 1.0,
            negative: None,
        },
        Default::default(),
    )
    .unwrap();

    let cancel = Arc::new(AtomicBool::new(true));
    let options = DenoiseOptions {
        cancel: Some(cancel),
        ..Default::default()
    };
    match engine.generate_with("p", "", options) {
        Err(EngineError::Cancelled(step)) => assert_eq!(step, 0),
        other => panic!("expected Cancelled, got {:?}", other.map(|t| t.dims())),
    }
}

#[test]
fn step_callback_sees_every_step_with_decreasing_sigma() {
    let engine = SynthesisEngine::new(
        config(8, 0.0),
        StubModel::new(false),
        StubEncoder {
            positive: 1.0,
            negative: None,
        },
        Default::default(),
    )
    .unwrap();

    let mut sigmas = Vec::new();
    let options = DenoiseOptions {
        on_step: Some(Box::new(|info: burn_diffusion::StepInfo, _state: &Tensor<TestBackend, 4>| {
            assert_eq!(info.total_steps, 8);
            sigmas.push(info.sigma);
        })),
        ..Default::default()
    };
    engine.generate_with("p", "", options).unwrap();

    assert_eq!(sigmas.len(), 8);
    for pair in sigmas.windows(2) {
        assert!(pair[0] > pair[1]);
    }
    assert_eq!(*sigmas.last().unwrap(), 0.0);
}

struct StubStore {
    names: Vec<String>,
}

impl WeightStore for StubStore {
    fn tensor_data(&self, name: &str) -> Result<TensorData, EngineError> {
        if self.contains(name) {
            Ok(TensorData::new(vec![0.0f32], [1]))
        } else {
            Err(EngineError::MissingTensor(name.to_string()))
        }
    }

    fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    fn names(&self) -> Vec<String> {
        self.names.clone()
    }
}

#[test]
fn missing_weights_fail_preflight() {
    let engine = SynthesisEngine::new(
        config(8, 0.0),
        StubModel::new(false),
        StubEncoder {
            positive: 1.0,
            negative: None,
        },
        Default::default(),
    )
    .unwrap();

    let store = StubStore {
        names: vec!["blocks.0.attn.qkv".to_string()],
    };
    assert!(engine
        .verify_weights(&store, &["blocks.0.attn.qkv"])
        .is_ok());

    match engine.verify_weights(&store, &["blocks.0.attn.qkv", "final_layer.linear"]) {
        Err(EngineError::ModelUnavailable(message)) => {
            assert!(message.contains("final_layer.linear"));
        }
        other => panic!("expected ModelUnavailable, got {other:?}"),
    }
}

#[test]
fn invalid_configs_are_rejected_eagerly() {
    let make = |cfg: SynthesisConfig| {
        SynthesisEngine::new(
            cfg,
            StubModel::new(false),
            StubEncoder {
                positive: 1.0,
                negative: None,
            },
            Default::default(),
        )
    };

    let mut bad = config(10, 7.5);
    bad.width = 100; // not a multiple of 8
    assert!(make(bad).is_err());

    let mut bad = config(0, 7.5);
    bad.steps = 0;
    assert!(make(bad).is_err());

    let mut bad = config(10, 7.5);
    bad.sigma_min = 2.0; // above sigma_max
    assert!(make(bad).is_err());

    let mut bad = config(10, -1.0);
    bad.guidance.scale = -1.0;
    assert!(make(bad).is_err());

    let mut bad = config(10, 7.5);
    bad.integrator = IntegratorKind::Multistep { order: 9 };
    assert!(make(bad).is_err());

    // Multi-rank configs cannot use the single-rank constructor.
    let mut multi = config(10, 7.5);
    multi.rank_count = 2;
    assert!(matches!(
        make(multi),
        Err(EngineError::Attention(_))
    ));
}

#[test]
fn multi_rank_configs_require_an_explicit_seed() {
    // An unseeded config draws a fresh seed per call, so two runs differ.
    let unseeded = || {
        let mut cfg = config(5, 0.0);
        cfg.seed = None;
        let engine = SynthesisEngine::new(
            cfg,
            StubModel::new(false),
            StubEncoder {
                positive: 1.0,
                negative: None,
            },
            Default::default(),
        )
        .unwrap();
        to_vec(engine.generate("p", "").unwrap())
    };
    assert_ne!(unseeded(), unseeded());

    // Across ranks that divergence would desynchronize the shared state,
    // so an unseeded multi-rank config is rejected up front.
    let mut contexts =
        SynthesisEngine::<TestBackend, StubModel, StubEncoder>::connect_ranks(2).unwrap();
    let mut cfg = config(5, 0.0);
    cfg.rank_count = 2;
    cfg.seed = None;
    let result = SynthesisEngine::with_attention(
        cfg,
        StubModel::new(false),
        StubEncoder {
            positive: 1.0,
            negative: None,
        },
        Default::default(),
        contexts.remove(0),
    );
    assert!(matches!(result, Err(EngineError::InvalidConfig(_))));
}

#[test]
fn connect_ranks_produces_matching_contexts() {
    type Engine = SynthesisEngine<TestBackend, StubModel, StubEncoder>;

    let contexts = Engine::connect_ranks(3).unwrap();
    assert_eq!(contexts.len(), 3);
    for (rank, context) in contexts.iter().enumerate() {
        assert_eq!(context.rank(), rank);
        assert_eq!(context.rank_count(), 3);
    }

    // A context from the wrong topology size is rejected.
    let mut contexts = Engine::connect_ranks(2).unwrap();
    let mut cfg = config(10, 0.0);
    cfg.rank_count = 3;
    let result = SynthesisEngine::with_attention(
        cfg,
        StubModel::new(false),
        StubEncoder {
            positive: 1.0,
            negative: None,
        },
        Default::default(),
        contexts.remove(0),
    );
    assert!(matches!(result, Err(EngineError::Attention(_))));
}

#[test]
fn multistep_integrator_runs_full_schedule() {
    let mut cfg = config(15, 0.0);
    cfg.sigma_min = 0.01;
    cfg.integrator = IntegratorKind::Multistep { order: 2 };
    let engine = SynthesisEngine::new(
        cfg,
        StubModel::new(false),
        StubEncoder {
            positive: 1.0,
            negative: None,
        },
        Default::default(),
    )
    .unwrap();

    let latent = engine.generate("p", "").unwrap();
    assert_eq!(latent.dims(), [1, 4, 8, 8]);
    for value in to_vec(latent) {
        assert!(value.is_finite());
    }
}
