//! Job model for background command execution.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use typed_builder::TypedBuilder;
use uuid::Uuid;

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    DeadLetter,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "job_priority", rename_all = "snake_case")]
pub enum JobPriority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
}

impl JobPriority {
    /// Convert to integer for efficient DB ordering (lower = higher priority)
    pub fn as_i16(&self) -> i16 {
        match self {
            JobPriority::Critical => 0,
            JobPriority::High => 1,
            JobPriority::Normal => 2,
            JobPriority::Low => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "error_kind", rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transient error - will retry if attempts remain
    #[default]
    Retryable,
    /// Permanent error - will not retry
    NonRetryable,
    /// Job was cancelled by user/system
    Cancelled,
    /// Job was interrupted by graceful shutdown - will retry
    Shutdown,
}

impl ErrorKind {
    /// Whether this error kind should trigger a retry
    pub fn should_retry(&self) -> bool {
        matches!(self, ErrorKind::Retryable | ErrorKind::Shutdown)
    }
}

/// Per-queue depth broken down by logical state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub waiting: i64,
    pub active: i64,
    pub completed: i64,
    pub failed: i64,
    pub delayed: i64,
}

impl QueueCounts {
    pub fn total(&self) -> i64 {
        self.waiting + self.active + self.completed + self.failed + self.delayed
    }
}

// ============================================================================
// Job Model
// ============================================================================

const JOB_COLUMNS: &str = "id, queue, args, idempotency_key, priority, max_retries, retry_count, \
     backoff_base_ms, next_run_at, lease_duration_ms, lease_expires_at, worker_id, status, \
     error_message, error_kind, created_at, updated_at, finished_at";

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Job {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,

    /// Logical queue name (dispatch key for workers and cleanup)
    pub queue: String,

    // Payload
    #[builder(default, setter(strip_option))]
    pub args: Option<serde_json::Value>,

    /// Deterministic job id for dedup; same key with a live job is a no-op
    #[builder(default, setter(strip_option))]
    pub idempotency_key: Option<String>,

    // Policies
    #[builder(default)]
    pub priority: JobPriority,
    /// Total attempts allowed (first run included)
    #[builder(default = 3)]
    pub max_retries: i32,
    #[builder(default = 0)]
    pub retry_count: i32,
    #[builder(default = 1_000)]
    pub backoff_base_ms: i64,

    // Scheduling
    #[builder(default, setter(strip_option))]
    pub next_run_at: Option<DateTime<Utc>>,

    // Lease management
    #[builder(default = 60_000)]
    pub lease_duration_ms: i64,
    #[builder(default, setter(strip_option))]
    pub lease_expires_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub worker_id: Option<String>,

    // State
    #[builder(default)]
    pub status: JobStatus,

    // Error tracking
    #[builder(default, setter(strip_option))]
    pub error_message: Option<String>,
    #[builder(default, setter(strip_option))]
    pub error_kind: Option<ErrorKind>,

    // Timestamps
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
    #[builder(default, setter(strip_option))]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a job for a serialized command.
    pub fn for_command(
        queue: &str,
        args: serde_json::Value,
        idempotency_key: Option<String>,
        run_at: Option<DateTime<Utc>>,
        priority: JobPriority,
        max_retries: i32,
        backoff_base_ms: i64,
        lease_duration_ms: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            queue: queue.to_string(),
            args: Some(args),
            idempotency_key,
            priority,
            max_retries,
            retry_count: 0,
            backoff_base_ms,
            next_run_at: run_at,
            lease_duration_ms,
            lease_expires_at: None,
            worker_id: None,
            status: JobStatus::Pending,
            error_message: None,
            error_kind: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            finished_at: None,
        }
    }

    /// True when the current execution is the last one allowed.
    pub fn is_final_attempt(&self) -> bool {
        self.retry_count + 1 >= self.max_retries
    }

    /// Backoff delay before retry number `retry_count + 1`.
    pub fn retry_delay(&self) -> Duration {
        let exponent = self.retry_count.clamp(0, 20) as u32;
        Duration::milliseconds(self.backoff_base_ms.saturating_mul(2i64.pow(exponent)))
    }

    pub async fn insert(&self, pool: &PgPool) -> Result<Self, sqlx::Error> {
        let job = sqlx::query_as::<_, Self>(&format!(
            r#"
            INSERT INTO jobs (
                id, queue, args, idempotency_key, priority, max_retries, retry_count,
                backoff_base_ms, next_run_at, lease_duration_ms, lease_expires_at, worker_id,
                status, error_message, error_kind, created_at, updated_at, finished_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(self.id)
        .bind(&self.queue)
        .bind(&self.args)
        .bind(&self.idempotency_key)
        .bind(self.priority)
        .bind(self.max_retries)
        .bind(self.retry_count)
        .bind(self.backoff_base_ms)
        .bind(self.next_run_at)
        .bind(self.lease_duration_ms)
        .bind(self.lease_expires_at)
        .bind(&self.worker_id)
        .bind(self.status)
        .bind(&self.error_message)
        .bind(self.error_kind)
        .bind(self.created_at)
        .bind(self.updated_at)
        .bind(self.finished_at)
        .fetch_one(pool)
        .await?;

        Ok(job)
    }

    pub async fn find_by_id(id: Uuid, pool: &PgPool) -> Result<Self> {
        let job = sqlx::query_as::<_, Self>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_one(pool)
        .await?;

        Ok(job)
    }

    /// Find a live (pending or running) job holding the given idempotency key.
    pub async fn find_live_by_key(key: &str, pool: &PgPool) -> Result<Option<Self>> {
        let job = sqlx::query_as::<_, Self>(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM jobs
            WHERE idempotency_key = $1
              AND status IN ('pending', 'running')
            LIMIT 1
            "#
        ))
        .bind(key)
        .fetch_optional(pool)
        .await?;

        Ok(job)
    }

    /// Claim jobs atomically using FOR UPDATE SKIP LOCKED.
    /// Also recovers stale jobs with expired leases.
    pub async fn claim_for_queue(
        queue: &str,
        worker_id: &str,
        limit: i64,
        pool: &PgPool,
    ) -> Result<Vec<Self>> {
        let jobs = sqlx::query_as::<_, Self>(&format!(
            r#"
            WITH next_jobs AS (
                SELECT id
                FROM jobs
                WHERE queue = $1
                  AND (
                    (status = 'pending' AND (next_run_at IS NULL OR next_run_at <= NOW()))
                    OR (status = 'running' AND lease_expires_at < NOW())
                  )
                ORDER BY priority, COALESCE(next_run_at, created_at)
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET status = 'running',
                lease_expires_at = NOW() + (jobs.lease_duration_ms || ' milliseconds')::INTERVAL,
                worker_id = $3,
                updated_at = NOW()
            WHERE id IN (SELECT id FROM next_jobs)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(queue)
        .bind(limit)
        .bind(worker_id)
        .fetch_all(pool)
        .await?;

        Ok(jobs)
    }

    /// Extend the lease for a running job (heartbeat)
    pub async fn extend_lease(id: Uuid, pool: &PgPool) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET lease_expires_at = NOW() + (lease_duration_ms || ' milliseconds')::INTERVAL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Depth of one logical queue broken down by state.
    pub async fn counts_for_queue(queue: &str, pool: &PgPool) -> Result<QueueCounts> {
        let row = sqlx::query_as::<_, (i64, i64, i64, i64, i64)>(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending'
                                   AND (next_run_at IS NULL OR next_run_at <= NOW())),
                COUNT(*) FILTER (WHERE status = 'running'),
                COUNT(*) FILTER (WHERE status = 'succeeded'),
                COUNT(*) FILTER (WHERE status IN ('failed', 'dead_letter')),
                COUNT(*) FILTER (WHERE status = 'pending' AND next_run_at > NOW())
            FROM jobs
            WHERE queue = $1
            "#,
        )
        .bind(queue)
        .fetch_one(pool)
        .await?;

        Ok(QueueCounts {
            waiting: row.0,
            active: row.1,
            completed: row.2,
            failed: row.3,
            delayed: row.4,
        })
    }

    pub async fn count_all(pool: &PgPool) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM jobs")
            .fetch_one(pool)
            .await?;
        Ok(count)
    }

    /// Rows still holding a dedup key (live or awaiting cleanup).
    pub async fn count_tracked_keys(pool: &PgPool) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM jobs WHERE idempotency_key IS NOT NULL",
        )
        .fetch_one(pool)
        .await?;
        Ok(count)
    }

    /// Delete finished jobs whose last update is older than `age`.
    pub async fn delete_finished_older_than(age: Duration, pool: &PgPool) -> Result<u64> {
        let deleted = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE status IN ('succeeded', 'failed', 'dead_letter', 'cancelled')
              AND updated_at < NOW() - ($1 || ' milliseconds')::INTERVAL
            "#,
        )
        .bind(age.num_milliseconds().to_string())
        .execute(pool)
        .await?
        .rows_affected();

        Ok(deleted)
    }

    /// Delete rows belonging to queues that are no longer registered.
    pub async fn delete_orphaned(registered: &[String], pool: &PgPool) -> Result<u64> {
        let deleted = sqlx::query("DELETE FROM jobs WHERE queue != ALL($1)")
            .bind(registered)
            .execute(pool)
            .await?
            .rows_affected();

        Ok(deleted)
    }

    /// Keep only the newest N succeeded and M failed rows per queue.
    pub async fn enforce_retention(
        queue: &str,
        keep_completed: i64,
        keep_failed: i64,
        pool: &PgPool,
    ) -> Result<u64> {
        let completed = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE id IN (
                SELECT id FROM jobs
                WHERE queue = $1 AND status = 'succeeded'
                ORDER BY updated_at DESC
                OFFSET $2
            )
            "#,
        )
        .bind(queue)
        .bind(keep_completed)
        .execute(pool)
        .await?
        .rows_affected();

        let failed = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE id IN (
                SELECT id FROM jobs
                WHERE queue = $1 AND status IN ('failed', 'dead_letter')
                ORDER BY updated_at DESC
                OFFSET $2
            )
            "#,
        )
        .bind(queue)
        .bind(keep_failed)
        .execute(pool)
        .await?
        .rows_affected();

        Ok(completed + failed)
    }
}
