//! Synthetic CUDA workload behind the GPU functional check.
//!
//! The graph is a single `Add` node computing `y = x + x` over a float
//! `[1, 4]` tensor, serialized by hand so no artifact has to ship with the
//! binary.

use ort::execution_providers::CUDAExecutionProvider;
use ort::session::Session;
use ort::value::Tensor as OrtTensor;
use tracing::warn;

const INPUT: [f32; 4] = [1.0, 2.0, 3.0, 4.0];

/// Runs the synthetic graph on the CUDA provider and checks the result.
/// Provider registration must succeed; a silent CPU fallback fails the check.
pub(crate) fn cuda_functional() -> bool {
    let session = Session::builder()
        .and_then(|b| b.with_execution_providers([CUDAExecutionProvider::default().build().error_on_failure()]))
        .and_then(|b| b.commit_from_memory(&add_graph()));
    let output = match session.and_then(|session| run_add(&session)) {
        Ok(output) => output,
        Err(e) => {
            warn!(target: "mob_ai::health", error = %e, "cuda synthetic op failed");
            return false;
        }
    };
    let expected: Vec<f32> = INPUT.iter().map(|v| v * 2.0).collect();
    if output != expected {
        warn!(target: "mob_ai::health", ?output, ?expected, "cuda synthetic op returned wrong values");
        return false;
    }
    true
}

fn run_add(session: &Session) -> ort::Result<Vec<f32>> {
    let x = OrtTensor::from_array((vec![1_i64, INPUT.len() as i64], INPUT.to_vec()))?;
    let outputs = session.run(ort::inputs!["x" => x]?)?;
    let (_, data) = outputs["y"].try_extract_raw_tensor::<f32>()?;
    Ok(data.to_vec())
}

/// Serialized ONNX `ModelProto` (IR 8, opset 13).
fn add_graph() -> Vec<u8> {
    let value_info = |name: &str| {
        let mut shape = Vec::new();
        for dim in [1, INPUT.len() as u64] {
            bytes_field(&mut shape, 1, &varint_field(1, dim));
        }
        // elem_type 1 is FLOAT.
        let mut tensor = varint_field(1, 1);
        bytes_field(&mut tensor, 2, &shape);
        let mut ty = Vec::new();
        bytes_field(&mut ty, 1, &tensor);
        let mut info = Vec::new();
        bytes_field(&mut info, 1, name.as_bytes());
        bytes_field(&mut info, 2, &ty);
        info
    };

    let mut node = Vec::new();
    bytes_field(&mut node, 1, b"x");
    bytes_field(&mut node, 1, b"x");
    bytes_field(&mut node, 2, b"y");
    bytes_field(&mut node, 4, b"Add");

    let mut graph = Vec::new();
    bytes_field(&mut graph, 1, &node);
    bytes_field(&mut graph, 2, b"device_check");
    bytes_field(&mut graph, 11, &value_info("x"));
    bytes_field(&mut graph, 12, &value_info("y"));

    let mut model = varint_field(1, 8);
    bytes_field(&mut model, 7, &graph);
    bytes_field(&mut model, 8, &varint_field(2, 13));
    model
}

fn varint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

fn varint_field(field: u64, value: u64) -> Vec<u8> {
    let mut out = Vec::new();
    varint(&mut out, field << 3);
    varint(&mut out, value);
    out
}

fn bytes_field(out: &mut Vec<u8>, field: u64, bytes: &[u8]) {
    varint(out, (field << 3) | 2);
    varint(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varints_use_continuation_bits() {
        let mut out = Vec::new();
        varint(&mut out, 300);
        assert_eq!(out, vec![0xac, 0x02]);
        assert_eq!(varint_field(1, 8), vec![0x08, 0x08]);
    }

    #[test]
    fn add_graph_runs_on_the_cpu_provider() {
        let session = Session::builder().unwrap().commit_from_memory(&add_graph()).unwrap();
        assert_eq!(run_add(&session).unwrap(), vec![2.0, 4.0, 6.0, 8.0]);
    }
}
