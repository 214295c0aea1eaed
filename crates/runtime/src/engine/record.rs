use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use chrono::{DateTime, Utc};
use serde::Serialize;

use mob_ai_core::{DevicePreference, ModelKey};

use super::backend::{ModelSession, TensorSpec};

/// One published model. Immutable; a reload publishes a new record.
pub struct ModelRecord {
    pub key: ModelKey,
    pub session: Arc<dyn ModelSession>,
    pub path: PathBuf,
    pub backend: &'static str,
    pub input: TensorSpec,
    pub output: TensorSpec,
    pub loaded_at: DateTime<Utc>,
    /// Artifact modification time in milliseconds since the epoch.
    pub version: u64,
    pub reload_count: u32,
    pub device: DevicePreference,
}

impl ModelRecord {
    pub fn info(&self) -> ModelInfo {
        ModelInfo {
            archetype: self.key.archetype.as_str(),
            model_type: self.key.model_type.as_str(),
            path: self.path.display().to_string(),
            backend: self.backend,
            input: self.input.clone(),
            output: self.output.clone(),
            loaded_at: self.loaded_at,
            version: self.version,
            reload_count: self.reload_count,
            device: self.device.as_ref().to_string(),
        }
    }
}

/// Serializable view of a [`ModelRecord`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ModelInfo {
    pub archetype: &'static str,
    pub model_type: &'static str,
    pub path: String,
    pub backend: &'static str,
    pub input: TensorSpec,
    pub output: TensorSpec,
    pub loaded_at: DateTime<Utc>,
    pub version: u64,
    pub reload_count: u32,
    pub device: String,
}

/// Content version of `path`, derived from its modification time.
pub(crate) fn file_version(path: &Path) -> u64 {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
