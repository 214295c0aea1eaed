//! Queue-facing half of the service loop.
//!
//! [`RequestProcessor`] claims batches from a [`RequestQueue`], validates rows
//! into [`InferenceRequest`]s at the boundary, and writes responses back.
//! Poll errors degrade to an empty batch. Write errors are never dropped: the
//! affected requests are marked failed, and only when that also fails does the
//! error reach the caller.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use mob_ai_core::{InferenceRequest, InferenceResponse, RequestId};

use crate::health::HealthStatus;
use crate::metrics::MetricsSink;
use crate::queue::{PoolStatus, QueueError, RequestQueue};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ProcessorStats {
    pub requests_processed: u64,
    pub requests_rejected: u64,
    pub responses_written: u64,
    pub errors: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProcessorHealth {
    pub status: HealthStatus,
    pub message: String,
    pub connected: bool,
    pub pool: PoolStatus,
    pub pending_requests: i64,
    pub stats: ProcessorStats,
}

/// What happened to a batch of responses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    Written(usize),
    /// The write failed; the originating requests were marked failed.
    MarkedFailed(usize),
}

pub struct RequestProcessor {
    queue: Arc<dyn RequestQueue>,
    metrics: MetricsSink,
    batch_size: usize,
    requests_processed: AtomicU64,
    requests_rejected: AtomicU64,
    responses_written: AtomicU64,
    errors: AtomicU64,
}

impl RequestProcessor {
    pub fn new(queue: Arc<dyn RequestQueue>, batch_size: usize, metrics: MetricsSink) -> Self {
        Self {
            queue,
            metrics,
            batch_size: batch_size.max(1),
            requests_processed: AtomicU64::new(0),
            requests_rejected: AtomicU64::new(0),
            responses_written: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn pool_status(&self) -> PoolStatus {
        self.queue.pool_status()
    }

    /// Claims the next batch. Rows that fail validation are marked failed
    /// and left out.
    pub async fn poll(&self, worker_id: i32) -> Vec<InferenceRequest> {
        let started = Instant::now();
        let rows = match self.queue.claim_pending(self.batch_size, worker_id).await {
            Ok(rows) => rows,
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                error!(target: "mob_ai::processor", worker_id, error = %e, "poll failed");
                return Vec::new();
            }
        };
        self.metrics.record_db_query("claim", elapsed_ms(started));
        if rows.is_empty() {
            return Vec::new();
        }

        let mut requests = Vec::with_capacity(rows.len());
        let mut rejected = Vec::new();
        for row in rows {
            match InferenceRequest::try_from(row) {
                Ok(request) => requests.push(request),
                Err(e) => {
                    warn!(target: "mob_ai::processor", error = %e, "rejecting malformed request");
                    rejected.push(e.request_id());
                }
            }
        }

        if !rejected.is_empty() {
            self.requests_rejected
                .fetch_add(rejected.len() as u64, Ordering::Relaxed);
            if let Err(e) = self.mark_failed(&rejected, "validation failed").await {
                error!(target: "mob_ai::processor", error = %e, "could not mark rejected requests failed");
            }
        }

        self.requests_processed
            .fetch_add(requests.len() as u64, Ordering::Relaxed);
        debug!(target: "mob_ai::processor", worker_id, claimed = requests.len(), "polled batch");
        requests
    }

    /// Writes `responses` and completes their requests. On failure the
    /// requests are marked failed instead; the error is returned only when
    /// that fails too.
    pub async fn write_responses(&self, responses: &[InferenceResponse]) -> Result<WriteOutcome, QueueError> {
        if responses.is_empty() {
            return Ok(WriteOutcome::Written(0));
        }

        let started = Instant::now();
        match self.queue.write_responses(responses).await {
            Ok(()) => {
                self.metrics.record_db_query("write_responses", elapsed_ms(started));
                self.responses_written
                    .fetch_add(responses.len() as u64, Ordering::Relaxed);
                Ok(WriteOutcome::Written(responses.len()))
            }
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                error!(target: "mob_ai::processor", count = responses.len(), error = %e, "response write failed");
                let ids: Vec<RequestId> = responses.iter().map(|r| r.request_id).collect();
                self.mark_failed(&ids, "response write failed").await?;
                Ok(WriteOutcome::MarkedFailed(ids.len()))
            }
        }
    }

    pub async fn mark_failed(&self, request_ids: &[RequestId], reason: &str) -> Result<u64, QueueError> {
        if request_ids.is_empty() {
            return Ok(0);
        }
        let started = Instant::now();
        let updated = self.queue.mark_failed(request_ids).await.inspect_err(|_| {
            self.errors.fetch_add(1, Ordering::Relaxed);
        })?;
        self.metrics.record_db_query("mark_failed", elapsed_ms(started));
        warn!(target: "mob_ai::processor", count = request_ids.len(), updated, reason, "requests marked failed");
        Ok(updated)
    }

    /// Times out requests left `processing` for longer than `claim_timeout`,
    /// typically by a worker that died mid-batch.
    pub async fn expire_claims(&self, claim_timeout: chrono::Duration) -> u64 {
        let started = Instant::now();
        let expired = match self.queue.timeout_stale(claim_timeout).await {
            Ok(n) => n,
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                error!(target: "mob_ai::processor", error = %e, "claim timeout sweep failed");
                0
            }
        };
        self.metrics.record_db_query("timeout_stale", elapsed_ms(started));
        if expired > 0 {
            warn!(
                target: "mob_ai::processor",
                expired,
                timeout_secs = claim_timeout.num_seconds(),
                "abandoned claims timed out"
            );
        }
        expired
    }

    /// Purges finished requests and read responses older than `retention`.
    /// Returns `(requests, responses)` removed.
    pub async fn cleanup(&self, retention: chrono::Duration) -> (u64, u64) {
        let started = Instant::now();
        let requests = match self.queue.purge_requests(retention).await {
            Ok(n) => n,
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                error!(target: "mob_ai::processor", error = %e, "request cleanup failed");
                0
            }
        };
        let responses = match self.queue.purge_responses(retention).await {
            Ok(n) => n,
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                error!(target: "mob_ai::processor", error = %e, "response cleanup failed");
                0
            }
        };
        self.metrics.record_db_query("cleanup", elapsed_ms(started));
        if requests + responses > 0 {
            info!(target: "mob_ai::processor", requests, responses, "cleaned up old rows");
        }
        (requests, responses)
    }

    /// Pending request count; 0 when the store is unreachable.
    pub async fn pending_count(&self) -> i64 {
        match self.queue.pending_count().await {
            Ok(count) => {
                self.metrics.set_pending_requests(count);
                count
            }
            Err(e) => {
                error!(target: "mob_ai::processor", error = %e, "pending count failed");
                0
            }
        }
    }

    pub async fn health_check(&self) -> ProcessorHealth {
        let pool = self.queue.pool_status();
        self.metrics.set_db_pool(pool.size, pool.idle);

        match self.queue.ping().await {
            Ok(()) => ProcessorHealth {
                status: HealthStatus::Healthy,
                message: "database operational".to_string(),
                connected: true,
                pool,
                pending_requests: self.pending_count().await,
                stats: self.statistics(),
            },
            Err(e) => {
                error!(target: "mob_ai::processor", error = %e, "database health check failed");
                ProcessorHealth {
                    status: HealthStatus::Critical,
                    message: e.to_string(),
                    connected: false,
                    pool,
                    pending_requests: 0,
                    stats: self.statistics(),
                }
            }
        }
    }

    pub fn statistics(&self) -> ProcessorStats {
        ProcessorStats {
            requests_processed: self.requests_processed.load(Ordering::Relaxed),
            requests_rejected: self.requests_rejected.load(Ordering::Relaxed),
            responses_written: self.responses_written.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use mob_ai_core::{
        ActionId, ActionType, FallbackLevel, RequestRow, RequestStatus, STATE_DIM,
    };

    use super::*;
    use crate::queue::InMemoryRequestQueue;

    fn row(id: RequestId, archetype: &str, priority: i32) -> RequestRow {
        RequestRow {
            request_id: id,
            monster_id: id * 10,
            mob_id: 1002,
            archetype: archetype.to_string(),
            state_vector: vec![0.5; STATE_DIM],
            spatial_grid: None,
            combat_history: None,
            pack_leader_id: None,
            pack_member_ids: None,
            map_id: 1,
            position_x: 0,
            position_y: 0,
            hp_ratio: 1.0,
            sp_ratio: 1.0,
            created_at: Utc::now(),
            priority,
        }
    }

    fn setup() -> (Arc<InMemoryRequestQueue>, RequestProcessor) {
        let queue = Arc::new(InMemoryRequestQueue::new());
        let processor = RequestProcessor::new(queue.clone(), 2, MetricsSink::new());
        (queue, processor)
    }

    #[tokio::test]
    async fn poll_claims_by_priority_and_rejects_malformed_rows() {
        let (queue, processor) = setup();
        queue.push(row(1, "tank", 0));
        queue.push(row(2, "tank", 5));
        queue.push(row(3, "dragon", 9));

        let batch = processor.poll(7).await;
        let ids: Vec<_> = batch.iter().map(|r| r.request_id).collect();
        assert_eq!(ids, vec![2]);
        assert_eq!(queue.status(3), Some(RequestStatus::Failed));
        assert_eq!(queue.claimed_by(2), Some(7));
        assert_eq!(queue.status(1), Some(RequestStatus::Pending));
        assert_eq!(processor.statistics().requests_rejected, 1);
    }

    #[tokio::test]
    async fn poll_error_yields_empty_batch() {
        let (queue, processor) = setup();
        queue.push(row(1, "mage", 0));
        queue.set_failing_claims(true);

        assert!(processor.poll(1).await.is_empty());
        assert_eq!(processor.statistics().errors, 1);
        assert_eq!(processor.health_check().await.status, HealthStatus::Critical);
    }

    #[tokio::test]
    async fn failed_write_marks_requests_failed() {
        let (queue, processor) = setup();
        queue.push(row(1, "mage", 0));
        let request = processor.poll(1).await.remove(0);
        let response = InferenceResponse::new(
            &request,
            ActionType::Combat,
            ActionId::ATTACK,
            0.9,
            FallbackLevel::GpuFp16,
        );

        queue.set_failing_writes(true);
        let outcome = processor.write_responses(&[response]).await.unwrap();
        assert_eq!(outcome, WriteOutcome::MarkedFailed(1));
        assert_eq!(queue.status(1), Some(RequestStatus::Failed));
        assert!(queue.responses().is_empty());
    }

    #[tokio::test]
    async fn cleanup_respects_retention_and_read_state() {
        let (queue, processor) = setup();
        queue.push(row(1, "mage", 0));
        queue.push(row(2, "mage", 0));
        let batch = processor.poll(1).await;
        let responses: Vec<_> = batch
            .iter()
            .map(|r| InferenceResponse::error_fallback(r))
            .collect();
        processor.write_responses(&responses).await.unwrap();
        queue.mark_read(1);

        assert_eq!(processor.cleanup(chrono::Duration::hours(24)).await, (0, 0));

        queue.age_all(chrono::Duration::hours(25));
        assert_eq!(processor.cleanup(chrono::Duration::hours(24)).await, (2, 1));
        assert_eq!(queue.responses().len(), 1);
    }

    #[tokio::test]
    async fn abandoned_claims_time_out_and_are_purged() {
        let (queue, processor) = setup();
        queue.push(row(1, "tank", 0));
        queue.push(row(2, "tank", 0));
        // Claimed by a worker that never answers.
        assert_eq!(processor.poll(3).await.len(), 2);
        queue.push(row(3, "tank", 0));

        let timeout = chrono::Duration::minutes(5);
        assert_eq!(processor.expire_claims(timeout).await, 0);
        assert_eq!(queue.status(1), Some(RequestStatus::Processing));

        queue.age_all(chrono::Duration::minutes(6));
        assert_eq!(processor.expire_claims(timeout).await, 2);
        assert_eq!(queue.status(1), Some(RequestStatus::Timeout));
        assert_eq!(queue.status(2), Some(RequestStatus::Timeout));
        // Never claimed, so never timed out.
        assert_eq!(queue.status(3), Some(RequestStatus::Pending));
        assert_eq!(processor.expire_claims(timeout).await, 0);

        queue.age_all(chrono::Duration::hours(25));
        assert_eq!(processor.cleanup(chrono::Duration::hours(24)).await, (2, 0));
        assert_eq!(queue.status(1), None);
        assert_eq!(queue.status(3), Some(RequestStatus::Pending));
    }
}
