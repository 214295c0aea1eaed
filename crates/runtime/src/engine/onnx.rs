//! ONNX Runtime backend.
//!
//! Sessions use full graph optimization with a small fixed thread pool. GPU
//! device preferences register the CUDA execution provider when the `cuda`
//! feature is enabled; ONNX Runtime falls back to the CPU provider when CUDA
//! cannot be initialized.

use std::path::Path;
use std::sync::Arc;

use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;
use ort::value::{Tensor as OrtTensor, ValueType};
use tracing::debug;

use mob_ai_core::{DevicePreference, Tensor};

use super::backend::{BackendError, ModelBackend, ModelSession, TensorSpec};

const INTRA_OP_THREADS: usize = 4;
const INTER_OP_THREADS: usize = 2;

pub struct OnnxSession {
    session: Session,
    input: TensorSpec,
    output: TensorSpec,
}

fn tensor_spec(name: &str, value_type: &ValueType) -> TensorSpec {
    let shape = match value_type {
        ValueType::Tensor { dimensions, .. } => dimensions
            .iter()
            .map(|&d| usize::try_from(d).ok())
            .collect(),
        _ => Vec::new(),
    };
    TensorSpec::new(name, shape)
}

fn execution_error(e: ort::Error) -> BackendError {
    BackendError::Execution(e.to_string())
}

impl ModelSession for OnnxSession {
    fn input(&self) -> &TensorSpec {
        &self.input
    }

    fn output(&self) -> &TensorSpec {
        &self.output
    }

    fn run(&self, input: &Tensor) -> Result<Tensor, BackendError> {
        let shape: Vec<i64> = input.shape().iter().map(|&d| d as i64).collect();
        let value = OrtTensor::from_array((shape, input.data().to_vec())).map_err(execution_error)?;
        let outputs = self
            .session
            .run(ort::inputs![self.input.name.as_str() => value].map_err(execution_error)?)
            .map_err(execution_error)?;

        let (shape, data) = outputs[self.output.name.as_str()]
            .try_extract_raw_tensor::<f32>()
            .map_err(execution_error)?;
        let shape = shape.iter().map(|&d| d.max(0) as usize).collect();
        Tensor::new(shape, data.to_vec()).map_err(|e| BackendError::Execution(e.to_string()))
    }
}

/// Backend for `.onnx` graphs.
#[derive(Debug, Default)]
pub struct OnnxBackend;

impl ModelBackend for OnnxBackend {
    fn name(&self) -> &'static str {
        "onnx"
    }

    fn extension(&self) -> &'static str {
        "onnx"
    }

    fn load(&self, path: &Path, device: DevicePreference) -> Result<Arc<dyn ModelSession>, BackendError> {
        let format_error = |e: ort::Error| BackendError::Format {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };

        let builder = Session::builder()
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|b| b.with_intra_threads(INTRA_OP_THREADS))
            .and_then(|b| b.with_inter_threads(INTER_OP_THREADS))
            .map_err(format_error)?;

        #[cfg(feature = "cuda")]
        let builder = if device.uses_gpu() {
            use ort::execution_providers::CUDAExecutionProvider;
            builder
                .with_execution_providers([CUDAExecutionProvider::default().build()])
                .map_err(format_error)?
        } else {
            builder
        };

        let session = builder.commit_from_file(path).map_err(format_error)?;

        let (Some(input), Some(output)) = (session.inputs.first(), session.outputs.first()) else {
            return Err(BackendError::Format {
                path: path.to_path_buf(),
                reason: "graph has no inputs or outputs".into(),
            });
        };
        let input = tensor_spec(&input.name, &input.input_type);
        let output = tensor_spec(&output.name, &output.output_type);
        debug!(
            target: "mob_ai::engine",
            path = %path.display(),
            %device,
            input = %input.describe(),
            output = %output.describe(),
            "onnx session created"
        );

        Ok(Arc::new(OnnxSession {
            session,
            input,
            output,
        }))
    }
}
