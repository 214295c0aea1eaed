//! Background tasks behind the service.
//!
//! Inference workers run the poll → decide → write cycle; any number of them
//! may share one queue. The single maintenance worker owns the periodic
//! duties (health, recovery, cleanup, metrics refresh) and serves operator
//! commands sent through [`ServiceHandle`](crate::api::ServiceHandle).

mod inference;
mod maintenance;
mod metrics;

pub use inference::InferenceWorker;
pub use maintenance::MaintenanceWorker;
pub use self::metrics::{WorkerCounters, WorkerStats};

use std::collections::BTreeMap;
use std::path::PathBuf;

use tokio::sync::{oneshot, watch};

use mob_ai_core::{FallbackLevel, ModelKey};

use crate::api::{ServiceHealth, ServiceStatistics};
use crate::engine::{EngineError, ReloadReport};

/// Commands served by the maintenance worker.
pub enum Command {
    /// Hot-reload one model, optionally from an explicit artifact path.
    ReloadModel {
        key: ModelKey,
        path: Option<PathBuf>,
        reply: oneshot::Sender<Result<ReloadReport, EngineError>>,
    },
    /// Hot-reload every loaded model.
    ReloadAll {
        reply: oneshot::Sender<BTreeMap<ModelKey, bool>>,
    },
    /// Override the fallback level.
    ForceLevel {
        level: FallbackLevel,
        reply: oneshot::Sender<()>,
    },
    /// Invalidate cache entries matching `pattern`, or everything.
    ClearCache {
        pattern: Option<String>,
        reply: oneshot::Sender<u64>,
    },
    Statistics {
        reply: oneshot::Sender<ServiceStatistics>,
    },
    HealthCheck {
        reply: oneshot::Sender<ServiceHealth>,
    },
}

/// Waits until shutdown is signalled or the sender is gone.
pub(crate) async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
    // An error means the sender was dropped, which also ends the service.
    let _ = shutdown.wait_for(|stop| *stop).await;
}

const WORKER_SLOTS: u32 = 1000;
const INSTANCE_SLOTS: u32 = 2_000_000;

/// Queue-visible id of the `index`-th inference worker of process
/// `instance`, so several service processes sharing one queue record
/// distinct `processing_worker_id`s.
pub(crate) fn worker_id(instance: u32, index: u32) -> i32 {
    let id = (instance % INSTANCE_SLOTS) * WORKER_SLOTS + index % WORKER_SLOTS;
    // Both factors are bounded so `id` stays below `i32::MAX`.
    id as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_ids_differ_across_processes() {
        assert_eq!(worker_id(4242, 1), 4_242_001);
        assert_eq!(worker_id(4242, 2), 4_242_002);
        assert_ne!(worker_id(4242, 1), worker_id(4243, 1));
        assert!(worker_id(u32::MAX, WORKER_SLOTS - 1) > 0);
    }
}
