//! Artifact resolution across backends.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use mob_ai_core::{DevicePreference, ModelKey};

use super::backend::ModelBackend;
use super::dense::DenseBackend;

/// Ordered set of backends. Earlier backends win when several artifacts
/// exist for the same model.
#[derive(Clone)]
pub struct BackendRegistry {
    backends: Vec<Arc<dyn ModelBackend>>,
}

impl Default for BackendRegistry {
    fn default() -> Self {
        let mut backends: Vec<Arc<dyn ModelBackend>> = Vec::new();
        #[cfg(feature = "onnx")]
        backends.push(Arc::new(super::onnx::OnnxBackend));
        backends.push(Arc::new(DenseBackend));
        Self { backends }
    }
}

impl BackendRegistry {
    pub fn new(backends: Vec<Arc<dyn ModelBackend>>) -> Self {
        Self { backends }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    /// Candidate file stems for `key`, most preferred first. INT8 devices try
    /// the quantized `_int8` artifact before the full-precision one.
    fn stems(key: ModelKey, device: DevicePreference) -> Vec<String> {
        let base = key.model_type.as_str().to_string();
        match device {
            DevicePreference::GpuInt8 | DevicePreference::CpuInt8 => {
                vec![format!("{base}_int8"), base]
            }
            _ => vec![base],
        }
    }

    /// Finds the artifact for `key` under `{model_dir}/{archetype}/`.
    pub fn resolve(
        &self,
        model_dir: &Path,
        key: ModelKey,
        device: DevicePreference,
    ) -> Option<(PathBuf, Arc<dyn ModelBackend>)> {
        let dir = model_dir.join(key.archetype.as_str());
        for stem in Self::stems(key, device) {
            for backend in &self.backends {
                let path = dir.join(format!("{stem}.{}", backend.extension()));
                if path.is_file() {
                    return Some((path, backend.clone()));
                }
            }
        }
        None
    }

    /// Backend for an explicit artifact path, by extension.
    pub fn for_path(&self, path: &Path) -> Option<Arc<dyn ModelBackend>> {
        let ext = path.extension()?.to_str()?;
        self.backends
            .iter()
            .find(|b| b.extension().eq_ignore_ascii_case(ext))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use mob_ai_core::{Archetype, ModelType};

    use super::*;

    #[test]
    fn int8_artifact_preferred_for_int8_devices() {
        let dir = tempfile::tempdir().unwrap();
        let tank = dir.path().join("tank");
        std::fs::create_dir_all(&tank).unwrap();
        std::fs::write(tank.join("combat_dqn.json"), "{}").unwrap();
        std::fs::write(tank.join("combat_dqn_int8.json"), "{}").unwrap();

        let registry = BackendRegistry::default();
        let key = ModelKey::new(Archetype::Tank, ModelType::CombatDqn);

        let (path, backend) = registry
            .resolve(dir.path(), key, DevicePreference::GpuFp16)
            .unwrap();
        assert!(path.ends_with("tank/combat_dqn.json"));
        assert_eq!(backend.name(), "dense");

        let (path, _) = registry
            .resolve(dir.path(), key, DevicePreference::CpuInt8)
            .unwrap();
        assert!(path.ends_with("tank/combat_dqn_int8.json"));

        let missing = ModelKey::new(Archetype::Mage, ModelType::CombatDqn);
        assert!(registry.resolve(dir.path(), missing, DevicePreference::GpuFp16).is_none());
    }

    #[test]
    fn backend_by_extension() {
        let registry = BackendRegistry::default();
        assert!(registry.for_path(Path::new("/m/x.json")).is_some());
        assert!(registry.for_path(Path::new("/m/x.bin")).is_none());
        assert!(registry.for_path(Path::new("/m/x")).is_none());
    }
}
