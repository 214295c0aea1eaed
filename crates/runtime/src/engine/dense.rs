//! Dense feed-forward policies stored as JSON.
//!
//! ```json
//! {
//!   "input_dim": 64,
//!   "layers": [
//!     { "weights": [[...64 floats...], ...], "bias": [...], "activation": "relu" },
//!     { "weights": [[...]], "bias": [...], "activation": "linear" }
//!   ]
//! }
//! ```
//!
//! `weights` is `[out][in]`. Executed natively on the CPU regardless of the
//! device preference.

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use mob_ai_core::{DevicePreference, Tensor};

use super::backend::{BackendError, ModelBackend, ModelSession, TensorSpec};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Relu,
    Tanh,
    Sigmoid,
    #[default]
    Linear,
}

impl Activation {
    fn apply(self, x: f32) -> f32 {
        match self {
            Activation::Relu => x.max(0.0),
            Activation::Tanh => x.tanh(),
            Activation::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Activation::Linear => x,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct DenseLayer {
    pub weights: Vec<Vec<f32>>,
    pub bias: Vec<f32>,
    #[serde(default)]
    pub activation: Activation,
}

#[derive(Clone, Debug, Deserialize)]
pub struct DensePolicy {
    pub input_dim: usize,
    pub layers: Vec<DenseLayer>,
}

impl DensePolicy {
    /// Checks that every layer's shape chains onto the previous one.
    /// Returns the output width.
    fn validate(&self) -> Result<usize, String> {
        if self.layers.is_empty() {
            return Err("policy has no layers".into());
        }
        let mut width = self.input_dim;
        for (index, layer) in self.layers.iter().enumerate() {
            if layer.weights.is_empty() {
                return Err(format!("layer {index} has no units"));
            }
            if let Some(row) = layer.weights.iter().position(|row| row.len() != width) {
                return Err(format!(
                    "layer {index} row {row} has {} inputs, expected {width}",
                    layer.weights[row].len()
                ));
            }
            if layer.bias.len() != layer.weights.len() {
                return Err(format!(
                    "layer {index} has {} biases for {} units",
                    layer.bias.len(),
                    layer.weights.len()
                ));
            }
            width = layer.weights.len();
        }
        Ok(width)
    }

    fn forward_row(&self, row: &[f32]) -> Vec<f32> {
        let mut activations = row.to_vec();
        for layer in &self.layers {
            activations = layer
                .weights
                .iter()
                .zip(&layer.bias)
                .map(|(weights, bias)| {
                    let sum: f32 = weights.iter().zip(&activations).map(|(w, x)| w * x).sum();
                    layer.activation.apply(sum + bias)
                })
                .collect();
        }
        activations
    }
}

pub struct DenseSession {
    policy: DensePolicy,
    input: TensorSpec,
    output: TensorSpec,
}

impl DenseSession {
    pub fn new(policy: DensePolicy) -> Result<Self, String> {
        let output_dim = policy.validate()?;
        Ok(Self {
            input: TensorSpec::new("input", vec![None, Some(policy.input_dim)]),
            output: TensorSpec::new("output", vec![None, Some(output_dim)]),
            policy,
        })
    }
}

impl ModelSession for DenseSession {
    fn input(&self) -> &TensorSpec {
        &self.input
    }

    fn output(&self) -> &TensorSpec {
        &self.output
    }

    fn run(&self, input: &Tensor) -> Result<Tensor, BackendError> {
        if input.shape().len() != 2 || input.row_width() != self.policy.input_dim {
            return Err(BackendError::InputShape {
                expected: self.input.describe(),
                actual: input.shape().to_vec(),
            });
        }
        let rows: Vec<Vec<f32>> = input.rows().map(|row| self.policy.forward_row(row)).collect();
        if rows.is_empty() {
            let width = self.output.row_width().unwrap_or(0);
            return Tensor::new(vec![0, width], Vec::new())
                .map_err(|e| BackendError::Execution(e.to_string()));
        }
        Tensor::from_rows(&rows).map_err(|e| BackendError::Execution(e.to_string()))
    }
}

/// Backend for `.json` dense policies.
#[derive(Debug, Default)]
pub struct DenseBackend;

impl ModelBackend for DenseBackend {
    fn name(&self) -> &'static str {
        "dense"
    }

    fn extension(&self) -> &'static str {
        "json"
    }

    fn load(&self, path: &Path, _device: DevicePreference) -> Result<Arc<dyn ModelSession>, BackendError> {
        let text = std::fs::read_to_string(path).map_err(|source| BackendError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let policy: DensePolicy = serde_json::from_str(&text).map_err(|e| BackendError::Format {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let session = DenseSession::new(policy).map_err(|reason| BackendError::Format {
            path: path.to_path_buf(),
            reason,
        })?;
        Ok(Arc::new(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_policy() -> DensePolicy {
        DensePolicy {
            input_dim: 2,
            layers: vec![DenseLayer {
                weights: vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![-1.0, -1.0]],
                bias: vec![0.0, 0.0, 0.5],
                activation: Activation::Relu,
            }],
        }
    }

    #[test]
    fn forward_pass_per_row() {
        let session = DenseSession::new(identity_policy()).unwrap();
        let input = Tensor::from_rows(&[vec![1.0, 2.0], vec![-1.0, 0.0]]).unwrap();
        let output = session.run(&input).unwrap();
        assert_eq!(output.shape(), &[2, 3]);
        assert_eq!(output.row(0).unwrap(), &[1.0, 2.0, 0.0]);
        assert_eq!(output.row(1).unwrap(), &[0.0, 0.0, 1.5]);
    }

    #[test]
    fn rejects_wrong_width() {
        let session = DenseSession::new(identity_policy()).unwrap();
        let input = Tensor::from_rows(&[vec![1.0, 2.0, 3.0]]).unwrap();
        assert!(matches!(
            session.run(&input),
            Err(BackendError::InputShape { .. })
        ));
    }

    #[test]
    fn rejects_broken_layer_chain() {
        let mut policy = identity_policy();
        policy.layers.push(DenseLayer {
            weights: vec![vec![1.0, 1.0]],
            bias: vec![0.0],
            activation: Activation::Linear,
        });
        assert!(DenseSession::new(policy).is_err());
    }

    #[test]
    fn loads_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("combat_dqn.json");
        std::fs::write(
            &path,
            r#"{"input_dim": 2, "layers": [{"weights": [[1, 0], [0, 1]], "bias": [0, 0]}]}"#,
        )
        .unwrap();
        let session = DenseBackend.load(&path, DevicePreference::CpuInt8).unwrap();
        assert_eq!(session.input().shape, vec![None, Some(2)]);
        assert_eq!(session.output().shape, vec![None, Some(2)]);
    }
}
