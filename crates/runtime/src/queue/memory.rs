use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use mob_ai_core::{InferenceResponse, RequestId, RequestRow, RequestStatus};

use super::{PoolStatus, QueueError, RequestQueue, Result};

#[derive(Clone, Debug)]
struct StoredRequest {
    row: RequestRow,
    status: RequestStatus,
    worker_id: Option<i32>,
    claimed_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug)]
struct StoredResponse {
    response: InferenceResponse,
    created_at: DateTime<Utc>,
    read_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Tables {
    requests: BTreeMap<RequestId, StoredRequest>,
    responses: Vec<StoredResponse>,
}

/// Process-local queue with the same claim semantics as the Postgres store.
#[derive(Debug, Default)]
pub struct InMemoryRequestQueue {
    tables: Mutex<Tables>,
    fail_claims: AtomicBool,
    fail_writes: AtomicBool,
}

impl InMemoryRequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues `row` as pending.
    pub fn push(&self, row: RequestRow) {
        self.lock().requests.insert(
            row.request_id,
            StoredRequest {
                row,
                status: RequestStatus::Pending,
                worker_id: None,
                claimed_at: None,
            },
        );
    }

    pub fn status(&self, request_id: RequestId) -> Option<RequestStatus> {
        self.lock().requests.get(&request_id).map(|r| r.status)
    }

    pub fn claimed_by(&self, request_id: RequestId) -> Option<i32> {
        self.lock().requests.get(&request_id).and_then(|r| r.worker_id)
    }

    pub fn set_status(&self, request_id: RequestId, status: RequestStatus) {
        if let Some(request) = self.lock().requests.get_mut(&request_id) {
            request.status = status;
        }
    }

    pub fn responses(&self) -> Vec<InferenceResponse> {
        self.lock().responses.iter().map(|r| r.response.clone()).collect()
    }

    pub fn response_for(&self, request_id: RequestId) -> Option<InferenceResponse> {
        self.lock()
            .responses
            .iter()
            .find(|r| r.response.request_id == request_id)
            .map(|r| r.response.clone())
    }

    /// Simulates the game server consuming a response.
    pub fn mark_read(&self, request_id: RequestId) {
        let now = Utc::now();
        for stored in self
            .lock()
            .responses
            .iter_mut()
            .filter(|r| r.response.request_id == request_id)
        {
            stored.read_at = Some(now);
        }
    }

    /// Shifts creation and claim times of every request and response into
    /// the past.
    pub fn age_all(&self, by: chrono::Duration) {
        let mut tables = self.lock();
        for request in tables.requests.values_mut() {
            request.row.created_at -= by;
            if let Some(claimed_at) = &mut request.claimed_at {
                *claimed_at -= by;
            }
        }
        for response in &mut tables.responses {
            response.created_at -= by;
        }
    }

    pub fn set_failing_claims(&self, failing: bool) {
        self.fail_claims.store(failing, Ordering::Relaxed);
    }

    pub fn set_failing_writes(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::Relaxed);
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl RequestQueue for InMemoryRequestQueue {
    async fn claim_pending(&self, limit: usize, worker_id: i32) -> Result<Vec<RequestRow>> {
        if self.fail_claims.load(Ordering::Relaxed) {
            return Err(QueueError::Unavailable("claims disabled".into()));
        }
        let mut tables = self.lock();

        let mut pending: Vec<&StoredRequest> = tables
            .requests
            .values()
            .filter(|r| r.status == RequestStatus::Pending)
            .collect();
        pending.sort_by(|a, b| {
            b.row
                .priority
                .cmp(&a.row.priority)
                .then(a.row.created_at.cmp(&b.row.created_at))
        });
        let ids: Vec<RequestId> = pending.iter().take(limit).map(|r| r.row.request_id).collect();

        let now = Utc::now();
        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(request) = tables.requests.get_mut(&id) {
                request.status = RequestStatus::Processing;
                request.worker_id = Some(worker_id);
                request.claimed_at = Some(now);
                claimed.push(request.row.clone());
            }
        }
        Ok(claimed)
    }

    async fn write_responses(&self, responses: &[InferenceResponse]) -> Result<()> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(QueueError::Unavailable("writes disabled".into()));
        }
        let now = Utc::now();
        let mut tables = self.lock();
        for response in responses {
            tables.responses.push(StoredResponse {
                response: response.clone(),
                created_at: now,
                read_at: None,
            });
            if let Some(request) = tables.requests.get_mut(&response.request_id) {
                request.status = RequestStatus::Completed;
            }
        }
        Ok(())
    }

    async fn mark_failed(&self, request_ids: &[RequestId]) -> Result<u64> {
        let mut tables = self.lock();
        let mut updated = 0;
        for id in request_ids {
            if let Some(request) = tables.requests.get_mut(id) {
                request.status = RequestStatus::Failed;
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn timeout_stale(&self, older_than: chrono::Duration) -> Result<u64> {
        let cutoff = Utc::now() - older_than;
        let mut tables = self.lock();
        let mut updated = 0;
        for request in tables.requests.values_mut().filter(|r| {
            r.status == RequestStatus::Processing && r.claimed_at.is_some_and(|at| at < cutoff)
        }) {
            request.status = RequestStatus::Timeout;
            updated += 1;
        }
        Ok(updated)
    }

    async fn purge_requests(&self, older_than: chrono::Duration) -> Result<u64> {
        let cutoff = Utc::now() - older_than;
        let mut tables = self.lock();
        let before = tables.requests.len();
        tables
            .requests
            .retain(|_, r| !(r.status.is_terminal() && r.row.created_at < cutoff));
        Ok((before - tables.requests.len()) as u64)
    }

    async fn purge_responses(&self, older_than: chrono::Duration) -> Result<u64> {
        let cutoff = Utc::now() - older_than;
        let mut tables = self.lock();
        let before = tables.responses.len();
        tables
            .responses
            .retain(|r| !(r.read_at.is_some() && r.created_at < cutoff));
        Ok((before - tables.responses.len()) as u64)
    }

    async fn pending_count(&self) -> Result<i64> {
        Ok(self
            .lock()
            .requests
            .values()
            .filter(|r| r.status == RequestStatus::Pending)
            .count() as i64)
    }

    async fn ping(&self) -> Result<()> {
        if self.fail_claims.load(Ordering::Relaxed) {
            return Err(QueueError::Unavailable("claims disabled".into()));
        }
        Ok(())
    }

    fn pool_status(&self) -> PoolStatus {
        PoolStatus::new(1, 1)
    }
}
