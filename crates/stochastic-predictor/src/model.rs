//! Dense Dropout Network
//!
//! A feed-forward classifier with per-layer inverted dropout and a softmax
//! head. Weights are loaded from a serde `ModelSpec`, so any externally
//! trained network with this layout can be evaluated.

use nalgebra::{DMatrix, DVector};
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use uq_core::{ImageBatch, ImageShape, InferenceMode, InputGradient, StochasticModel, UqError, UqResult};

/// Element-wise activation applied after a layer's affine transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Relu,
    #[default]
    Identity,
}

impl Activation {
    fn apply(&self, value: f64) -> f64 {
        match self {
            Activation::Relu => value.max(0.0),
            Activation::Identity => value,
        }
    }

    fn derivative(&self, pre_activation: f64) -> f64 {
        match self {
            Activation::Relu => {
                if pre_activation > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::Identity => 1.0,
        }
    }
}

/// Serialized form of one dense layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerSpec {
    /// Row-major `outputs x inputs` weight matrix
    pub weights: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
    #[serde(default)]
    pub activation: Activation,
    /// Probability of zeroing each output unit in stochastic mode
    #[serde(default)]
    pub dropout: f64,
}

/// Serialized form of a whole network
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    pub input_height: usize,
    pub input_width: usize,
    pub layers: Vec<LayerSpec>,
}

#[derive(Debug, Clone)]
struct DenseLayer {
    /// outputs x inputs
    weights: DMatrix<f64>,
    bias: DVector<f64>,
    activation: Activation,
    dropout: f64,
}

impl DenseLayer {
    fn affine(&self, inputs: &DMatrix<f64>) -> DMatrix<f64> {
        let mut z = inputs * self.weights.transpose();
        for (j, b) in self.bias.iter().enumerate() {
            z.column_mut(j).add_scalar_mut(*b);
        }
        z
    }
}

/// Dense classifier whose hidden layers may carry dropout units.
#[derive(Debug, Clone)]
pub struct DropoutMlp {
    input_shape: ImageShape,
    layers: Vec<DenseLayer>,
}

impl DropoutMlp {
    /// Validate a spec and build the network.
    pub fn from_spec(spec: &ModelSpec) -> UqResult<Self> {
        let input_shape = ImageShape::new(spec.input_height, spec.input_width);
        if input_shape.pixels() == 0 {
            return Err(UqError::InvalidModel(format!(
                "input shape {} has no pixels",
                input_shape
            )));
        }
        if spec.layers.is_empty() {
            return Err(UqError::InvalidModel("model has no layers".to_string()));
        }

        let mut fan_in = input_shape.pixels();
        let mut layers = Vec::with_capacity(spec.layers.len());

        for (index, layer) in spec.layers.iter().enumerate() {
            let outputs = layer.weights.len();
            if outputs == 0 {
                return Err(UqError::InvalidModel(format!("layer {} has no units", index)));
            }
            if let Some(row) = layer.weights.iter().position(|r| r.len() != fan_in) {
                return Err(UqError::InvalidModel(format!(
                    "layer {} weight row {} has {} inputs, expected {}",
                    index,
                    row,
                    layer.weights[row].len(),
                    fan_in
                )));
            }
            if layer.bias.len() != outputs {
                return Err(UqError::InvalidModel(format!(
                    "layer {} has {} biases for {} units",
                    index,
                    layer.bias.len(),
                    outputs
                )));
            }
            if !(0.0..1.0).contains(&layer.dropout) {
                return Err(UqError::InvalidModel(format!(
                    "layer {} dropout {} outside [0, 1)",
                    index, layer.dropout
                )));
            }

            let flat: Vec<f64> = layer.weights.iter().flatten().copied().collect();
            if flat.iter().chain(layer.bias.iter()).any(|v| !v.is_finite()) {
                return Err(UqError::InvalidModel(format!(
                    "layer {} has non-finite parameters",
                    index
                )));
            }

            layers.push(DenseLayer {
                weights: DMatrix::from_row_slice(outputs, fan_in, &flat),
                bias: DVector::from_vec(layer.bias.clone()),
                activation: layer.activation,
                dropout: layer.dropout,
            });
            fan_in = outputs;
        }

        if let Some(last) = layers.last() {
            if last.activation != Activation::Identity {
                return Err(UqError::InvalidModel(
                    "output layer must use identity activation before softmax".to_string(),
                ));
            }
        }

        let model = Self {
            input_shape,
            layers,
        };
        if !model.has_dropout() {
            tracing::warn!("Model has no dropout units; stochastic passes will be identical");
        }
        Ok(model)
    }

    /// Whether any layer samples a dropout mask in stochastic mode
    pub fn has_dropout(&self) -> bool {
        self.layers.iter().any(|l| l.dropout > 0.0)
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    fn logits(
        &self,
        batch: &ImageBatch,
        mode: InferenceMode,
        rng: &mut dyn RngCore,
    ) -> DMatrix<f64> {
        let mut activations = batch.pixels().clone();

        for layer in &self.layers {
            let mut z = layer.affine(&activations);
            z.apply(|v| *v = layer.activation.apply(*v));

            if mode == InferenceMode::Stochastic && layer.dropout > 0.0 {
                let keep = 1.0 - layer.dropout;
                z.apply(|v| {
                    if rng.gen_bool(layer.dropout) {
                        *v = 0.0;
                    } else {
                        *v /= keep;
                    }
                });
            }

            activations = z;
        }

        activations
    }
}

/// Row-wise softmax with max subtraction for stability
fn softmax_rows(mut logits: DMatrix<f64>) -> DMatrix<f64> {
    for mut row in logits.row_iter_mut() {
        let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        row.apply(|v| *v = (*v - max).exp());
        let sum = row.sum();
        row /= sum;
    }
    logits
}

impl StochasticModel for DropoutMlp {
    fn input_shape(&self) -> ImageShape {
        self.input_shape
    }

    fn num_classes(&self) -> usize {
        self.layers.last().map(|l| l.bias.len()).unwrap_or(0)
    }

    fn forward(
        &self,
        batch: &ImageBatch,
        mode: InferenceMode,
        rng: &mut dyn RngCore,
    ) -> UqResult<DMatrix<f64>> {
        batch.check_shape(self.input_shape)?;
        Ok(softmax_rows(self.logits(batch, mode, rng)))
    }
}

impl InputGradient for DropoutMlp {
    fn input_gradient(&self, image: &[f64], target: usize) -> UqResult<Vec<f64>> {
        if image.len() != self.input_shape.pixels() {
            return Err(UqError::shape_mismatch(
                format!("{} pixels ({})", self.input_shape.pixels(), self.input_shape),
                format!("{} pixels", image.len()),
            ));
        }
        let classes = self.num_classes();
        if target >= classes {
            return Err(UqError::shape_mismatch(
                format!("class index below {}", classes),
                target,
            ));
        }

        // Forward pass keeping every pre-activation for the backward sweep.
        let mut pre_activations: Vec<DVector<f64>> = Vec::with_capacity(self.layers.len());
        let mut a = DVector::from_column_slice(image);
        for layer in &self.layers {
            let z = &layer.weights * &a + &layer.bias;
            a = z.map(|v| layer.activation.apply(v));
            pre_activations.push(z);
        }

        let max = a.max();
        let mut probs = a.map(|v| (v - max).exp());
        let sum = probs.sum();
        probs /= sum;

        // d(-ln p_target)/d logits = p - onehot(target)
        let mut delta = probs;
        delta[target] -= 1.0;

        for index in (1..self.layers.len()).rev() {
            let upstream = self.layers[index].weights.transpose() * &delta;
            let previous = &self.layers[index - 1];
            delta = upstream.zip_map(&pre_activations[index - 1], |g, z| {
                g * previous.activation.derivative(z)
            });
        }

        let gradient = self.layers[0].weights.transpose() * &delta;
        Ok(gradient.iter().copied().collect())
    }
}
