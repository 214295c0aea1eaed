use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder, Row};
use tracing::{debug, info};

use mob_ai_core::{InferenceResponse, RequestId, RequestRow};

use super::{PoolStatus, RequestQueue, Result};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS ai_requests (
        request_id           BIGSERIAL PRIMARY KEY,
        monster_id           BIGINT NOT NULL,
        mob_id               INTEGER NOT NULL,
        archetype            TEXT NOT NULL,
        state_vector         REAL[] NOT NULL,
        spatial_grid         REAL[],
        combat_history       JSONB,
        pack_leader_id       BIGINT,
        pack_member_ids      BIGINT[],
        map_id               INTEGER NOT NULL,
        position_x           INTEGER NOT NULL,
        position_y           INTEGER NOT NULL,
        hp_ratio             REAL NOT NULL,
        sp_ratio             REAL NOT NULL,
        created_at           TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        priority             INTEGER NOT NULL DEFAULT 0,
        status               TEXT NOT NULL DEFAULT 'pending',
        processed_at         TIMESTAMPTZ,
        processing_worker_id INTEGER
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_ai_requests_pending
        ON ai_requests (priority DESC, created_at ASC)
        WHERE status = 'pending'
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ai_responses (
        response_id          BIGSERIAL PRIMARY KEY,
        request_id           BIGINT NOT NULL,
        monster_id           BIGINT NOT NULL,
        action_type          TEXT NOT NULL,
        action_id            SMALLINT NOT NULL,
        action_params        JSONB NOT NULL DEFAULT '{}',
        model_outputs        JSONB NOT NULL DEFAULT '{}',
        confidence           REAL NOT NULL,
        fusion_weights       JSONB NOT NULL DEFAULT '{}',
        coordination_action  TEXT,
        target_monster_id    BIGINT,
        inference_latency_ms REAL NOT NULL,
        cache_used           BOOLEAN NOT NULL DEFAULT FALSE,
        fallback_level       SMALLINT NOT NULL,
        created_at           TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        read_at              TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_ai_responses_request
        ON ai_responses (request_id)
    "#,
];

const CLAIM: &str = r#"
    UPDATE ai_requests
    SET status = 'processing',
        processed_at = NOW(),
        processing_worker_id = $2
    WHERE request_id IN (
        SELECT request_id
        FROM ai_requests
        WHERE status = 'pending'
        ORDER BY priority DESC, created_at ASC
        LIMIT $1
        FOR UPDATE SKIP LOCKED
    )
    RETURNING request_id, monster_id, mob_id, archetype, state_vector,
              spatial_grid, combat_history, pack_leader_id, pack_member_ids,
              map_id, position_x, position_y, hp_ratio, sp_ratio,
              created_at, priority
"#;

#[derive(Clone, Debug)]
pub struct PostgresQueueConfig {
    pub url: String,
    pub min_connections: u32,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl PostgresQueueConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            min_connections: 2,
            max_connections: 20,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

/// Request queue on the shared Postgres store.
#[derive(Clone, Debug)]
pub struct PostgresQueue {
    pool: PgPool,
}

impl PostgresQueue {
    pub async fn connect(config: &PostgresQueueConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(config.min_connections)
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.url)
            .await?;

        let version: String = sqlx::query_scalar("SELECT version()").fetch_one(&pool).await?;
        info!(
            target: "mob_ai::processor",
            min = config.min_connections,
            max = config.max_connections,
            %version,
            "postgres pool ready"
        );
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the request/response tables if they do not exist.
    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn row_from(row: &PgRow) -> Result<RequestRow> {
    let combat_history: Option<serde_json::Value> = row.try_get("combat_history")?;
    Ok(RequestRow {
        request_id: row.try_get("request_id")?,
        monster_id: row.try_get("monster_id")?,
        mob_id: row.try_get("mob_id")?,
        archetype: row.try_get("archetype")?,
        state_vector: row.try_get("state_vector")?,
        spatial_grid: row.try_get("spatial_grid")?,
        combat_history: combat_history.map(|v| v.to_string()),
        pack_leader_id: row.try_get("pack_leader_id")?,
        pack_member_ids: row.try_get("pack_member_ids")?,
        map_id: row.try_get("map_id")?,
        position_x: row.try_get("position_x")?,
        position_y: row.try_get("position_y")?,
        hp_ratio: row.try_get("hp_ratio")?,
        sp_ratio: row.try_get("sp_ratio")?,
        created_at: row.try_get("created_at")?,
        priority: row.try_get("priority")?,
    })
}

#[async_trait]
impl RequestQueue for PostgresQueue {
    async fn claim_pending(&self, limit: usize, worker_id: i32) -> Result<Vec<RequestRow>> {
        let rows = sqlx::query(CLAIM)
            .bind(limit as i64)
            .bind(worker_id)
            .fetch_all(&self.pool)
            .await?;

        let mut claimed = rows.iter().map(row_from).collect::<Result<Vec<_>>>()?;
        // RETURNING order is unspecified.
        claimed.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.created_at.cmp(&b.created_at)));
        debug!(target: "mob_ai::processor", count = claimed.len(), worker_id, "claimed requests");
        Ok(claimed)
    }

    async fn write_responses(&self, responses: &[InferenceResponse]) -> Result<()> {
        if responses.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;

        let mut insert = QueryBuilder::<Postgres>::new(
            "INSERT INTO ai_responses (request_id, monster_id, action_type, action_id, \
             action_params, model_outputs, confidence, fusion_weights, coordination_action, \
             target_monster_id, inference_latency_ms, cache_used, fallback_level) ",
        );
        insert.push_values(responses, |mut b, r| {
            b.push_bind(r.request_id)
                .push_bind(r.monster_id)
                .push_bind(r.action_type.as_ref())
                .push_bind(i16::from(r.action_id.value()))
                .push_bind(Json(&r.action_params))
                .push_bind(Json(&r.model_outputs))
                .push_bind(r.confidence)
                .push_bind(Json(&r.fusion_weights))
                .push_bind(r.coordination_action())
                .push_bind(r.target_monster_id)
                .push_bind(r.inference_latency_ms)
                .push_bind(r.cache_used)
                .push_bind(i16::from(r.fallback_level.value()));
        });
        insert.build().execute(&mut *tx).await?;

        let ids: Vec<RequestId> = responses.iter().map(|r| r.request_id).collect();
        sqlx::query("UPDATE ai_requests SET status = 'completed' WHERE request_id = ANY($1)")
            .bind(ids)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn mark_failed(&self, request_ids: &[RequestId]) -> Result<u64> {
        if request_ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("UPDATE ai_requests SET status = 'failed' WHERE request_id = ANY($1)")
            .bind(request_ids.to_vec())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn timeout_stale(&self, older_than: chrono::Duration) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE ai_requests SET status = 'timeout' \
             WHERE status = 'processing' AND processed_at < $1",
        )
        .bind(Utc::now() - older_than)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn purge_requests(&self, older_than: chrono::Duration) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM ai_requests \
             WHERE status IN ('completed', 'failed', 'timeout') AND created_at < $1",
        )
        .bind(Utc::now() - older_than)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn purge_responses(&self, older_than: chrono::Duration) -> Result<u64> {
        let result = sqlx::query("DELETE FROM ai_responses WHERE read_at IS NOT NULL AND created_at < $1")
            .bind(Utc::now() - older_than)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn pending_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ai_requests WHERE status = 'pending'")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn pool_status(&self) -> PoolStatus {
        PoolStatus::new(self.pool.size(), self.pool.num_idle() as u32)
    }
}
