//! Cloneable façade for issuing operator commands to the service.
//!
//! [`ServiceHandle`] hides channel plumbing and offers async helpers for
//! hot-reloading models, steering the fallback level and reading status.
use std::collections::BTreeMap;
use std::path::PathBuf;

use tokio::sync::{mpsc, oneshot};

use mob_ai_core::{FallbackLevel, ModelKey};

use super::errors::{Result, ServiceError};
use super::status::{ServiceHealth, ServiceStatistics};
use crate::engine::ReloadReport;
use crate::workers::Command;

/// Client-facing handle to interact with the running service
#[derive(Clone)]
pub struct ServiceHandle {
    command_tx: mpsc::Sender<Command>,
}

impl ServiceHandle {
    pub(crate) fn new(command_tx: mpsc::Sender<Command>) -> Self {
        Self { command_tx }
    }

    /// Hot-reload one model. `path` overrides the artifact location.
    ///
    /// The previous version keeps serving if the new artifact fails to load
    /// or changes the model's tensor shapes.
    pub async fn reload_model(&self, key: ModelKey, path: Option<PathBuf>) -> Result<ReloadReport> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.command_tx
            .send(Command::ReloadModel {
                key,
                path,
                reply: reply_tx,
            })
            .await
            .map_err(|_| ServiceError::CommandChannelClosed)?;

        Ok(reply_rx.await.map_err(ServiceError::ReplyChannelClosed)??)
    }

    /// Hot-reload every loaded model. Returns per-model success.
    pub async fn reload_all(&self) -> Result<BTreeMap<ModelKey, bool>> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.command_tx
            .send(Command::ReloadAll { reply: reply_tx })
            .await
            .map_err(|_| ServiceError::CommandChannelClosed)?;

        reply_rx.await.map_err(ServiceError::ReplyChannelClosed)
    }

    /// Override the fallback level.
    pub async fn force_level(&self, level: FallbackLevel) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.command_tx
            .send(Command::ForceLevel {
                level,
                reply: reply_tx,
            })
            .await
            .map_err(|_| ServiceError::CommandChannelClosed)?;

        reply_rx.await.map_err(ServiceError::ReplyChannelClosed)
    }

    /// Invalidate cache keys matching `pattern` (glob), or every key the
    /// service owns. Returns the number of keys removed.
    pub async fn clear_cache(&self, pattern: Option<String>) -> Result<u64> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.command_tx
            .send(Command::ClearCache {
                pattern,
                reply: reply_tx,
            })
            .await
            .map_err(|_| ServiceError::CommandChannelClosed)?;

        reply_rx.await.map_err(ServiceError::ReplyChannelClosed)
    }

    pub async fn statistics(&self) -> Result<ServiceStatistics> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.command_tx
            .send(Command::Statistics { reply: reply_tx })
            .await
            .map_err(|_| ServiceError::CommandChannelClosed)?;

        reply_rx.await.map_err(ServiceError::ReplyChannelClosed)
    }

    /// Full health report across engine, queue, cache and host.
    pub async fn health_check(&self) -> Result<ServiceHealth> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.command_tx
            .send(Command::HealthCheck { reply: reply_tx })
            .await
            .map_err(|_| ServiceError::CommandChannelClosed)?;

        reply_rx.await.map_err(ServiceError::ReplyChannelClosed)
    }
}
