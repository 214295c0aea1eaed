//! Unified error type surfaced by the service API.
//!
//! Wraps failures from startup wiring, worker coordination and the
//! underlying stores so the binary can bubble them up with context.
use thiserror::Error;
use tokio::sync::oneshot;

use crate::cache::CacheError;
use crate::config::ConfigError;
use crate::engine::EngineError;
use crate::queue::QueueError;

pub type Result<T> = std::result::Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("maintenance worker command channel closed")]
    CommandChannelClosed,

    #[error("maintenance worker reply channel closed")]
    ReplyChannelClosed(#[source] oneshot::error::RecvError),

    #[error("worker join failed")]
    WorkerJoin(#[source] tokio::task::JoinError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}
