#[cfg(test)]
mod estimator_tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use approx::assert_relative_eq;
    use nalgebra::DMatrix;
    use rand::RngCore;
    use stochastic_predictor::{Activation, DropoutMlp, LayerSpec, ModelSpec};
    use uq_core::{ImageBatch, ImageShape, InferenceMode, StochasticModel, UqError, UqResult};

    use crate::{EstimatorConfig, UncertaintyEstimator};

    /// What a scripted model emits on each call
    #[derive(Clone, Copy)]
    enum Script {
        /// Always class 0 with certainty
        Degenerate,
        /// [1, 0] on even calls, [0, 1] on odd calls
        Alternating,
        /// Rows that do not sum to one
        Broken,
    }

    struct ScriptedModel {
        script: Script,
        classes: usize,
        calls: AtomicUsize,
    }

    impl ScriptedModel {
        fn new(script: Script, classes: usize) -> Arc<Self> {
            Arc::new(Self {
                script,
                classes,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl StochasticModel for ScriptedModel {
        fn input_shape(&self) -> ImageShape {
            ImageShape::new(2, 2)
        }

        fn num_classes(&self) -> usize {
            self.classes
        }

        fn forward(
            &self,
            batch: &ImageBatch,
            _mode: InferenceMode,
            _rng: &mut dyn RngCore,
        ) -> UqResult<DMatrix<f64>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let mut out = DMatrix::zeros(batch.len(), self.classes);
            for i in 0..batch.len() {
                match self.script {
                    Script::Degenerate => out[(i, 0)] = 1.0,
                    Script::Alternating => out[(i, call % 2)] = 1.0,
                    Script::Broken => out[(i, 0)] = 0.7,
                }
            }
            Ok(out)
        }
    }

    fn batch(n: usize) -> ImageBatch {
        let images: Vec<Vec<f64>> = (0..n).map(|i| vec![(i % 10) as f64 / 10.0; 4]).collect();
        ImageBatch::from_images(ImageShape::new(2, 2), &images).unwrap()
    }

    fn sequential() -> EstimatorConfig {
        EstimatorConfig::default().with_seed(5)
    }

    fn dropout_model() -> DropoutMlp {
        DropoutMlp::from_spec(&ModelSpec {
            input_height: 2,
            input_width: 2,
            layers: vec![
                LayerSpec {
                    weights: vec![
                        vec![1.0, 0.5, -0.5, 0.2],
                        vec![-0.3, 1.0, 0.4, 0.1],
                        vec![0.6, -0.2, 1.0, 0.3],
                        vec![0.2, 0.3, 0.1, 1.0],
                        vec![0.5, 0.5, 0.5, 0.5],
                        vec![-0.4, 0.2, 0.6, 0.8],
                    ],
                    bias: vec![0.1; 6],
                    activation: Activation::Relu,
                    dropout: 0.5,
                },
                LayerSpec {
                    weights: vec![
                        vec![1.0, -1.0, 0.5, 0.0, 0.3, -0.2],
                        vec![-0.5, 1.0, -0.5, 0.7, 0.1, 0.4],
                        vec![0.2, 0.1, 1.0, -0.6, -0.3, 0.9],
                    ],
                    bias: vec![0.0; 3],
                    activation: Activation::Identity,
                    dropout: 0.0,
                },
            ],
        })
        .unwrap()
    }

    #[test]
    fn test_single_pass_rejected_without_invoking_model() {
        let model = ScriptedModel::new(Script::Degenerate, 3);
        let estimator = UncertaintyEstimator::new(Arc::clone(&model), sequential());

        let err = estimator.estimate(&batch(4), 1).unwrap_err();
        assert_eq!(err, UqError::InsufficientSamples { passes: 1 });
        assert_eq!(model.calls(), 0);

        let err = estimator.estimate(&batch(4), 0).unwrap_err();
        assert_eq!(err, UqError::InsufficientSamples { passes: 0 });
        assert_eq!(model.calls(), 0);
    }

    #[test]
    fn test_empty_batch_rejected_without_invoking_model() {
        let model = ScriptedModel::new(Script::Degenerate, 3);
        let estimator = UncertaintyEstimator::new(Arc::clone(&model), sequential());

        let empty = ImageBatch::empty(ImageShape::new(2, 2));
        let err = estimator.estimate(&empty, 100).unwrap_err();
        assert_eq!(err, UqError::EmptyBatch);
        assert_eq!(model.calls(), 0);
    }

    #[test]
    fn test_shape_mismatch_rejected_without_invoking_model() {
        let model = ScriptedModel::new(Script::Degenerate, 3);
        let estimator = UncertaintyEstimator::new(Arc::clone(&model), sequential());

        let wrong = ImageBatch::from_images(ImageShape::new(1, 4), &[vec![0.5; 4]]).unwrap();
        let err = estimator.estimate(&wrong, 10).unwrap_err();
        assert!(matches!(err, UqError::ShapeMismatch { .. }));
        assert_eq!(model.calls(), 0);
    }

    #[test]
    fn test_one_model_call_per_pass() {
        let model = ScriptedModel::new(Script::Degenerate, 3);
        let estimator = UncertaintyEstimator::new(Arc::clone(&model), sequential());

        let scores = estimator.estimate(&batch(7), 12).unwrap();
        assert_eq!(model.calls(), 12);
        assert_eq!(scores.len(), 7);
        assert_eq!(scores.passes, 12);
        assert_eq!(scores.classes, 3);
    }

    #[test]
    fn test_degenerate_model_has_zero_uncertainty() {
        let model = ScriptedModel::new(Script::Degenerate, 10);
        let estimator = UncertaintyEstimator::new(model, sequential());

        let scores = estimator.estimate(&batch(25), 100).unwrap();
        assert!(scores.scores.iter().all(|s| *s < 1e-9));
    }

    #[test]
    fn test_alternating_one_hots_score_one_half() {
        let model = ScriptedModel::new(Script::Alternating, 2);
        let estimator = UncertaintyEstimator::new(model, sequential());

        let scores = estimator.estimate(&batch(3), 2).unwrap();
        for s in &scores.scores {
            assert_relative_eq!(*s, 0.5, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_invalid_probability_aborts_run() {
        let model = ScriptedModel::new(Script::Broken, 2);
        let estimator = UncertaintyEstimator::new(Arc::clone(&model), sequential());

        let err = estimator.estimate(&batch(3), 10).unwrap_err();
        assert!(matches!(err, UqError::InvalidProbability { .. }));
        assert_eq!(model.calls(), 1);
    }

    #[test]
    fn test_parallel_matches_sequential_for_same_seed() {
        let images = batch(20);
        let config = EstimatorConfig::default().with_seed(1234);

        let seq = UncertaintyEstimator::new(dropout_model(), config.clone())
            .estimate(&images, 40)
            .unwrap();
        let par = UncertaintyEstimator::new(dropout_model(), config.with_parallel(true))
            .estimate(&images, 40)
            .unwrap();

        assert_eq!(seq, par);
    }

    #[test]
    fn test_seeded_runs_reproduce_and_dropout_disperses() {
        let images = batch(10);
        let estimator = UncertaintyEstimator::new(dropout_model(), sequential());

        let first = estimator.estimate(&images, 30).unwrap();
        let second = estimator.estimate(&images, 30).unwrap();
        assert_eq!(first, second);

        // Images with non-zero pixels activate hidden units, so dropout varies the output.
        assert!(first.scores.iter().skip(1).all(|s| *s > 0.0));
        assert!(first.scores.iter().all(|s| s.is_finite() && *s >= 0.0));
    }

    #[test]
    fn test_estimate_default_uses_configured_passes() {
        let model = ScriptedModel::new(Script::Degenerate, 2);
        let estimator = UncertaintyEstimator::new(Arc::clone(&model), sequential().with_passes(8));

        let scores = estimator.estimate_default(&batch(2)).unwrap();
        assert_eq!(scores.passes, 8);
        assert_eq!(model.calls(), 8);
    }
}
