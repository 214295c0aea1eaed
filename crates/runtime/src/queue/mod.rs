//! Request/response store contract.
//!
//! The relational store is the single source of truth shared with the game
//! server. Claiming is atomic: a claimed row moves to `processing` in the same
//! statement that returns it, so concurrent consumers never see the same
//! request twice.

mod memory;
mod postgres;

pub use memory::InMemoryRequestQueue;
pub use postgres::{PostgresQueue, PostgresQueueConfig};

use async_trait::async_trait;
use serde::Serialize;

use mob_ai_core::{InferenceResponse, RequestId, RequestRow};

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("malformed row: {0}")]
    Decode(String),

    #[error("queue unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// Connection pool occupancy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub size: u32,
    pub idle: u32,
    pub in_use: u32,
}

impl PoolStatus {
    pub fn new(size: u32, idle: u32) -> Self {
        Self {
            size,
            idle,
            in_use: size.saturating_sub(idle),
        }
    }
}

#[async_trait]
pub trait RequestQueue: Send + Sync {
    /// Atomically claims up to `limit` pending requests, highest priority
    /// first and oldest first within a priority, marking them `processing`
    /// under `worker_id`.
    async fn claim_pending(&self, limit: usize, worker_id: i32) -> Result<Vec<RequestRow>>;

    /// Inserts every response and marks the originating requests
    /// `completed`, in one transaction.
    async fn write_responses(&self, responses: &[InferenceResponse]) -> Result<()>;

    /// Marks `request_ids` failed. Returns the number of rows updated.
    async fn mark_failed(&self, request_ids: &[RequestId]) -> Result<u64>;

    /// Moves requests claimed before `older_than` that are still
    /// `processing` to `timeout`. Returns the number of rows updated.
    async fn timeout_stale(&self, older_than: chrono::Duration) -> Result<u64>;

    /// Deletes completed, failed and timed-out requests created before
    /// `older_than`.
    async fn purge_requests(&self, older_than: chrono::Duration) -> Result<u64>;

    /// Deletes responses already read by the game server and created before
    /// `older_than`.
    async fn purge_responses(&self, older_than: chrono::Duration) -> Result<u64>;

    async fn pending_count(&self) -> Result<i64>;

    async fn ping(&self) -> Result<()>;

    fn pool_status(&self) -> PoolStatus;
}
