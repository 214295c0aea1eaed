//! Model execution backend interface.
//!
//! A [`ModelBackend`] turns an artifact on disk into a [`ModelSession`]. The
//! engine picks the backend from the artifact's file extension, so ONNX
//! graphs and dense JSON policies can live side by side in the model tree.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use mob_ai_core::{DevicePreference, Tensor};

/// Name and shape of a model input or output. `None` marks a dynamic
/// dimension.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct TensorSpec {
    pub name: String,
    pub shape: Vec<Option<usize>>,
}

impl TensorSpec {
    pub fn new(name: impl Into<String>, shape: Vec<Option<usize>>) -> Self {
        Self {
            name: name.into(),
            shape,
        }
    }

    /// Same rank and same dimensions apart from the leading batch axis.
    pub fn is_compatible_with(&self, other: &TensorSpec) -> bool {
        self.shape.len() == other.shape.len()
            && self.shape.iter().skip(1).eq(other.shape.iter().skip(1))
    }

    /// Elements per batch row, when every non-batch dimension is static.
    pub fn row_width(&self) -> Option<usize> {
        self.shape
            .iter()
            .skip(1)
            .try_fold(1usize, |acc, dim| dim.map(|d| acc * d))
    }

    /// Non-batch dimensions, with dynamic ones shown as `?`.
    pub fn describe(&self) -> String {
        let dims: Vec<String> = self
            .shape
            .iter()
            .map(|d| d.map_or_else(|| "?".to_string(), |d| d.to_string()))
            .collect();
        format!("{}[{}]", self.name, dims.join(", "))
    }
}

/// Errors raised while loading or running a model.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid model artifact {path}: {reason}")]
    Format { path: PathBuf, reason: String },

    #[error("input shape mismatch: expected {expected}, got {actual:?}")]
    InputShape { expected: String, actual: Vec<usize> },

    #[error("model execution failed: {0}")]
    Execution(String),

    #[error("no backend handles {0}")]
    Unsupported(PathBuf),
}

/// A loaded, executable model.
///
/// `run` is synchronous and may block for the duration of the call; the
/// engine invokes it from blocking worker threads only.
pub trait ModelSession: Send + Sync {
    fn input(&self) -> &TensorSpec;

    fn output(&self) -> &TensorSpec;

    /// Runs one batch. The leading dimension of `input` is the batch size and
    /// the output has the same batch size.
    fn run(&self, input: &Tensor) -> Result<Tensor, BackendError>;
}

/// Loader for one artifact format.
pub trait ModelBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// File extension handled by this backend, without the dot.
    fn extension(&self) -> &'static str;

    fn load(&self, path: &Path, device: DevicePreference) -> Result<Arc<dyn ModelSession>, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compatibility_ignores_batch_axis() {
        let a = TensorSpec::new("input", vec![None, Some(64)]);
        let b = TensorSpec::new("obs", vec![Some(128), Some(64)]);
        let c = TensorSpec::new("input", vec![None, Some(32)]);
        let d = TensorSpec::new("input", vec![None, Some(8), Some(8)]);

        assert!(a.is_compatible_with(&b));
        assert!(!a.is_compatible_with(&c));
        assert!(!a.is_compatible_with(&d));
        assert_eq!(a.row_width(), Some(64));
        assert_eq!(d.row_width(), Some(64));
        assert_eq!(TensorSpec::new("x", vec![None, None]).row_width(), None);
        assert_eq!(a.describe(), "input[?, 64]");
    }
}
