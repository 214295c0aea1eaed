//! Public service API surface.
//!
//! This module gathers the types exposed to consumers of the runtime crate so
//! other layers can stay focused on inference, workers, or storage.

pub mod errors;
pub mod handle;
pub mod status;

pub use errors::{Result, ServiceError};
pub use handle::ServiceHandle;
pub use status::{ServiceHealth, ServiceStatistics};
