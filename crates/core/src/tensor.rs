//! Dense `f32` tensors and their cache envelope.
//!
//! Models consume and produce row-major `f32` tensors whose first dimension
//! is the batch. Outputs cached in the model-output tier are stored as a
//! [`SerializedTensor`]: element type, shape and raw little-endian bytes, so
//! a reader can rebuild the tensor without knowing which model wrote it.

use thiserror::Error;

/// Errors raised when constructing or decoding tensors.
#[derive(Debug, Error, PartialEq)]
pub enum TensorError {
    #[error("shape {shape:?} expects {expected} elements, found {actual}")]
    ShapeMismatch {
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },

    #[error("ragged rows: row {row} has {actual} columns, expected {expected}")]
    RaggedRows {
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("{dtype:?} payload of {len} bytes is not a multiple of {width}")]
    TruncatedPayload {
        dtype: ElementType,
        len: usize,
        width: usize,
    },

    #[error("envelope decode failed: {0}")]
    Envelope(String),
}

/// Row-major `f32` tensor.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Tensor {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, TensorError> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(TensorError::ShapeMismatch {
                shape,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    /// Stacks equally sized rows into a `[rows, cols]` tensor.
    pub fn from_rows<R: AsRef<[f32]>>(rows: &[R]) -> Result<Self, TensorError> {
        let cols = rows.first().map(|row| row.as_ref().len()).unwrap_or(0);
        let mut data = Vec::with_capacity(rows.len() * cols);
        for (index, row) in rows.iter().enumerate() {
            let row = row.as_ref();
            if row.len() != cols {
                return Err(TensorError::RaggedRows {
                    row: index,
                    expected: cols,
                    actual: row.len(),
                });
            }
            data.extend_from_slice(row);
        }
        Ok(Self {
            shape: vec![rows.len(), cols],
            data,
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    /// Size of the leading (batch) dimension; scalars count as one row.
    pub fn batch_size(&self) -> usize {
        self.shape.first().copied().unwrap_or(1)
    }

    /// Elements per batch row.
    pub fn row_width(&self) -> usize {
        self.shape.iter().skip(1).product()
    }

    pub fn row(&self, index: usize) -> Option<&[f32]> {
        let width = self.row_width();
        let start = index.checked_mul(width)?;
        self.data.get(start..start + width)
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        let width = self.row_width().max(1);
        self.data.chunks(width)
    }

    /// Keeps only the listed batch rows, in the given order.
    pub fn select_rows(&self, indices: &[usize]) -> Option<Tensor> {
        let mut data = Vec::with_capacity(indices.len() * self.row_width());
        for &index in indices {
            data.extend_from_slice(self.row(index)?);
        }
        let mut shape = self.shape.clone();
        if shape.is_empty() {
            shape.push(indices.len());
        } else {
            shape[0] = indices.len();
        }
        Some(Tensor { shape, data })
    }

    /// Whether each row is a score vector (arg-max applies) rather than an
    /// already-discrete prediction.
    pub fn is_score_matrix(&self) -> bool {
        self.shape.len() > 1 && self.row_width() > 1
    }
}

/// Arg-max index of a score row plus its softmax probability.
///
/// Empty rows and rows made only of NaN yield `None`.
pub fn argmax_with_confidence(scores: &[f32]) -> Option<(usize, f32)> {
    let (best, max) = scores
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .fold(None, |acc: Option<(usize, f32)>, (i, v)| match acc {
            Some((_, m)) if m >= v => acc,
            _ => Some((i, v)),
        })?;
    let denom: f32 = scores
        .iter()
        .filter(|v| !v.is_nan())
        .map(|v| (v - max).exp())
        .sum();
    let confidence = if denom > 0.0 { 1.0 / denom } else { 0.0 };
    Some((best, confidence))
}

/// Element type recorded in a [`SerializedTensor`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display, strum::EnumString)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[strum(serialize_all = "lowercase")]
pub enum ElementType {
    F32,
    F64,
    I32,
    I64,
}

impl ElementType {
    pub const fn width(self) -> usize {
        match self {
            ElementType::F32 | ElementType::I32 => 4,
            ElementType::F64 | ElementType::I64 => 8,
        }
    }
}

/// Cache envelope: element type, shape, raw little-endian bytes.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SerializedTensor {
    pub dtype: ElementType,
    pub shape: Vec<u64>,
    pub bytes: Vec<u8>,
}

impl SerializedTensor {
    pub fn from_tensor(tensor: &Tensor) -> Self {
        let mut bytes = Vec::with_capacity(tensor.data.len() * 4);
        for value in &tensor.data {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        Self {
            dtype: ElementType::F32,
            shape: tensor.shape.iter().map(|&d| d as u64).collect(),
            bytes,
        }
    }

    /// Rebuilds an `f32` tensor, widening or narrowing other element types.
    pub fn to_tensor(&self) -> Result<Tensor, TensorError> {
        let width = self.dtype.width();
        if self.bytes.len() % width != 0 {
            return Err(TensorError::TruncatedPayload {
                dtype: self.dtype,
                len: self.bytes.len(),
                width,
            });
        }
        let data = self
            .bytes
            .chunks_exact(width)
            .map(|chunk| match self.dtype {
                ElementType::F32 => f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
                ElementType::I32 => {
                    i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f32
                }
                ElementType::F64 => f64::from_le_bytes(eight(chunk)) as f32,
                ElementType::I64 => i64::from_le_bytes(eight(chunk)) as f32,
            })
            .collect();
        Tensor::new(self.shape.iter().map(|&d| d as usize).collect(), data)
    }

    #[cfg(feature = "serde")]
    pub fn encode(&self) -> Result<Vec<u8>, TensorError> {
        bincode::serialize(self).map_err(|e| TensorError::Envelope(e.to_string()))
    }

    #[cfg(feature = "serde")]
    pub fn decode(bytes: &[u8]) -> Result<Self, TensorError> {
        bincode::deserialize(bytes).map_err(|e| TensorError::Envelope(e.to_string()))
    }
}

fn eight(chunk: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(chunk);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_mismatched_shape() {
        let err = Tensor::new(vec![2, 3], vec![0.0; 5]).unwrap_err();
        assert!(matches!(err, TensorError::ShapeMismatch { expected: 6, .. }));
    }

    #[test]
    fn from_rows_rejects_ragged_input() {
        let rows = vec![vec![1.0, 2.0], vec![3.0]];
        assert!(matches!(
            Tensor::from_rows(&rows),
            Err(TensorError::RaggedRows { row: 1, .. })
        ));
    }

    #[test]
    fn select_rows_keeps_requested_order() {
        let t = Tensor::from_rows(&[vec![1.0, 1.5], vec![2.0, 2.5], vec![3.0, 3.5]]).unwrap();
        let picked = t.select_rows(&[2, 0]).unwrap();
        assert_eq!(picked.shape(), &[2, 2]);
        assert_eq!(picked.data(), &[3.0, 3.5, 1.0, 1.5]);
        assert!(t.select_rows(&[3]).is_none());
    }

    #[test]
    fn argmax_reports_softmax_confidence() {
        let (index, confidence) = argmax_with_confidence(&[0.0, 0.0, 10.0]).unwrap();
        assert_eq!(index, 2);
        assert!(confidence > 0.99);

        let (index, confidence) = argmax_with_confidence(&[1.0, 1.0]).unwrap();
        assert_eq!(index, 0, "ties resolve to the first index");
        assert!((confidence - 0.5).abs() < 1e-6);

        assert!(argmax_with_confidence(&[]).is_none());
    }

    #[test]
    fn envelope_rebuilds_integer_payloads() {
        let mut bytes = Vec::new();
        for v in [3i64, -1] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let envelope = SerializedTensor {
            dtype: ElementType::I64,
            shape: vec![2],
            bytes,
        };
        let tensor = envelope.to_tensor().unwrap();
        assert_eq!(tensor.data(), &[3.0, -1.0]);
        assert!(!tensor.is_score_matrix());
    }

    #[test]
    fn envelope_detects_truncated_bytes() {
        let envelope = SerializedTensor {
            dtype: ElementType::F32,
            shape: vec![1],
            bytes: vec![0, 0, 0],
        };
        assert!(matches!(
            envelope.to_tensor(),
            Err(TensorError::TruncatedPayload { .. })
        ));
    }
}
