//! Data model shared by the monster-AI serving runtime and offline tools.
//!
//! `mob-ai-core` defines the request/response records exchanged with the game
//! server, the discrete action space, the degradation levels, and the tensor
//! and state-hash primitives used by the cache. It performs no I/O; the
//! runtime crate builds every store, model and worker on top of these types.
pub mod action;
pub mod archetype;
pub mod hash;
pub mod level;
pub mod request;
pub mod response;
pub mod tensor;

pub use action::{ActionId, ActionType};
pub use archetype::{Archetype, ModelKey, ModelType};
pub use hash::{HashPrecision, StateHash, hash_state, quantize};
pub use level::{DevicePreference, FallbackLevel};
pub use request::{
    InferenceRequest, MonsterId, Position, RequestId, RequestRow, RequestStatus,
    RequestValidationError, STATE_DIM,
};
pub use response::{ActionParams, CoordinationTag, InferenceResponse, ModelOutputs};
pub use tensor::{ElementType, SerializedTensor, Tensor, TensorError, argmax_with_confidence};
