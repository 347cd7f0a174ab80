//! PostgreSQL-backed job queue implementation.
//!
//! This module provides the core job queue functionality for storing
//! and retrieving jobs from PostgreSQL. Logical queues are rows sharing a
//! `queue` name; dedup rides on deterministic idempotency keys.

use anyhow::{anyhow, Result};
use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use super::job::{ErrorKind, Job, JobPriority};

/// Result type for enqueue operations that handles idempotency.
#[derive(Debug, Clone)]
pub enum EnqueueResult {
    /// Command was enqueued, returns new job ID
    Created(Uuid),
    /// Command already exists (idempotency hit), returns existing job ID
    Duplicate(Uuid),
}

impl EnqueueResult {
    /// Get the job ID regardless of whether it was created or duplicate
    pub fn job_id(&self) -> Uuid {
        match self {
            EnqueueResult::Created(id) | EnqueueResult::Duplicate(id) => *id,
        }
    }

    /// Returns true if this was a newly created job
    pub fn is_created(&self) -> bool {
        matches!(self, EnqueueResult::Created(_))
    }
}

/// A claimed job ready for execution.
#[derive(Debug)]
pub struct ClaimedJob {
    /// The job ID
    pub id: Uuid,
    /// The raw job record
    pub job: Job,
}

impl ClaimedJob {
    /// Deserialize the command payload.
    pub fn deserialize<C: DeserializeOwned>(&self) -> Result<C> {
        let args = self
            .job
            .args
            .as_ref()
            .ok_or_else(|| anyhow!("job {} has no args", self.id))?;
        serde_json::from_value(args.clone())
            .map_err(|e| anyhow!("failed to deserialize command: {}", e))
    }
}

/// Metadata for command serialization.
///
/// Commands implement this trait to name their queue and provide scheduling
/// policy: dedup key, delay, attempts, backoff base.
pub trait CommandMeta {
    /// The logical queue this command belongs to.
    fn queue(&self) -> &'static str;

    /// Deterministic job id.
    ///
    /// If provided, ensures only one pending/running job exists with this key.
    fn idempotency_key(&self) -> Option<String> {
        None
    }

    /// Delay before the job becomes claimable.
    fn delay(&self) -> Option<chrono::Duration> {
        None
    }

    /// Total attempts allowed.
    fn max_retries(&self) -> i32 {
        3
    }

    /// Exponential backoff base between attempts.
    fn backoff_base_ms(&self) -> i64 {
        1_000
    }

    /// Optional priority override.
    fn priority(&self) -> JobPriority {
        JobPriority::Normal
    }
}

/// PostgreSQL-backed job queue.
pub struct PostgresJobQueue {
    pool: PgPool,
    default_lease_ms: i64,
}

impl PostgresJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            default_lease_ms: 60_000,
        }
    }

    pub fn with_lease_duration(pool: PgPool, lease_ms: i64) -> Self {
        Self {
            pool,
            default_lease_ms: lease_ms,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Enqueue a command for execution.
    ///
    /// If the command carries an idempotency key and a live job already holds
    /// it, the enqueue is a no-op returning `Duplicate`.
    pub async fn enqueue<C>(&self, command: C) -> Result<EnqueueResult>
    where
        C: Serialize + CommandMeta + Send + Sync,
    {
        let key = command.idempotency_key();
        if let Some(key) = &key {
            if let Some(existing) = Job::find_live_by_key(key, &self.pool).await? {
                debug!(queue = command.queue(), key = %key, "duplicate enqueue ignored");
                return Ok(EnqueueResult::Duplicate(existing.id));
            }
        }

        let args = serde_json::to_value(&command)?;
        let run_at = command.delay().map(|delay| Utc::now() + delay);
        let job = Job::for_command(
            command.queue(),
            args,
            key.clone(),
            run_at,
            command.priority(),
            command.max_retries(),
            command.backoff_base_ms(),
            self.default_lease_ms,
        );

        match job.insert(&self.pool).await {
            Ok(inserted) => Ok(EnqueueResult::Created(inserted.id)),
            // Another writer inserted the same key between check and insert;
            // adopt the winner (read-after-write by the natural key).
            Err(e) if is_unique_violation(&e) => {
                let key = key.ok_or_else(|| anyhow!("unique violation without idempotency key"))?;
                let existing = Job::find_live_by_key(&key, &self.pool)
                    .await?
                    .ok_or_else(|| anyhow!("job with key {} vanished after conflict", key))?;
                Ok(EnqueueResult::Duplicate(existing.id))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Claim up to `limit` jobs from one queue.
    pub async fn claim(
        &self,
        queue: &str,
        worker_id: &str,
        limit: i64,
    ) -> Result<Vec<ClaimedJob>> {
        let jobs = Job::claim_for_queue(queue, worker_id, limit, &self.pool).await?;
        Ok(jobs
            .into_iter()
            .map(|job| ClaimedJob { id: job.id, job })
            .collect())
    }

    /// Mark a job as successfully completed.
    pub async fn mark_succeeded(&self, job_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'succeeded',
                finished_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Mark a job as failed with an error.
    ///
    /// If retries remain the job goes back to pending with exponential
    /// backoff; otherwise it is dead-lettered.
    pub async fn mark_failed(&self, job_id: Uuid, error: &str, kind: ErrorKind) -> Result<()> {
        let job = Job::find_by_id(job_id, &self.pool).await?;

        if kind.should_retry() && job.retry_count + 1 < job.max_retries {
            let retry_at = Utc::now() + job.retry_delay();
            sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'pending',
                    retry_count = retry_count + 1,
                    next_run_at = $1,
                    lease_expires_at = NULL,
                    worker_id = NULL,
                    error_message = $2,
                    error_kind = $3,
                    updated_at = NOW()
                WHERE id = $4
                "#,
            )
            .bind(retry_at)
            .bind(error)
            .bind(kind)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'dead_letter',
                    error_message = $1,
                    error_kind = $2,
                    finished_at = NOW(),
                    updated_at = NOW()
                WHERE id = $3
                "#,
            )
            .bind(error)
            .bind(kind)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    /// Cancel a pending job.
    pub async fn cancel(&self, job_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'cancelled',
                error_kind = 'cancelled',
                finished_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Extend the lease for a running job (heartbeat).
    pub async fn heartbeat(&self, job_id: Uuid) -> Result<()> {
        Job::extend_lease(job_id, &self.pool).await
    }
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db) => db.code().map(|code| code == "23505").unwrap_or(false),
        _ => false,
    }
}
