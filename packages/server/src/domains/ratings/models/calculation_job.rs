use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashSet;
use uuid::Uuid;

/// Status of one `(battle, season)` rating calculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "mmr_job_status", rename_all = "snake_case")]
pub enum MmrJobStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl MmrJobStatus {
    /// Completed and failed jobs never run again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MmrJobStatus::Completed | MmrJobStatus::Failed)
    }
}

/// Authoritative idempotency guard for MMR processing.
///
/// Exactly one row exists per `(battle, season)`; the row makes at most one
/// terminal transition. Queue-level dedup is advisory next to this.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MmrCalculationJob {
    pub id: Uuid,
    pub battle_id: i64,
    pub season_id: Uuid,
    pub status: MmrJobStatus,
    pub attempts: i32,
    pub error_message: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// SQL Queries - ALL queries must be in models/
// =============================================================================

impl MmrCalculationJob {
    pub async fn find(battle_id: i64, season_id: Uuid, pool: &PgPool) -> Result<Option<Self>> {
        let job = sqlx::query_as::<_, MmrCalculationJob>(
            "SELECT * FROM mmr_calculation_jobs WHERE battle_id = $1 AND season_id = $2",
        )
        .bind(battle_id)
        .bind(season_id)
        .fetch_optional(pool)
        .await?;
        Ok(job)
    }

    /// Get or create the guard row in `pending` state.
    pub async fn get_or_create(battle_id: i64, season_id: Uuid, pool: &PgPool) -> Result<Self> {
        let inserted = sqlx::query_as::<_, MmrCalculationJob>(
            r#"
            INSERT INTO mmr_calculation_jobs (id, battle_id, season_id, status)
            VALUES ($1, $2, $3, 'pending')
            ON CONFLICT (battle_id, season_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(battle_id)
        .bind(season_id)
        .fetch_optional(pool)
        .await?;

        if let Some(job) = inserted {
            return Ok(job);
        }
        Self::find(battle_id, season_id, pool)
            .await?
            .ok_or_else(|| anyhow!("mmr job ({}, {}) vanished", battle_id, season_id))
    }

    /// Claim the guard for processing; bumps the attempt counter.
    pub async fn mark_processing(id: Uuid, pool: &PgPool) -> Result<Self> {
        let job = sqlx::query_as::<_, MmrCalculationJob>(
            r#"
            UPDATE mmr_calculation_jobs
            SET status = 'processing', attempts = attempts + 1, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_one(pool)
        .await?;
        Ok(job)
    }

    pub async fn mark_completed(id: Uuid, pool: &PgPool) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE mmr_calculation_jobs
            SET status = 'completed', processed_at = NOW(), error_message = NULL, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn mark_failed(id: Uuid, error: &str, pool: &PgPool) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE mmr_calculation_jobs
            SET status = 'failed', error_message = $2, processed_at = NOW(), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Battles among `ids` whose calculation moved past `pending` in any
    /// season (single batched query for the deep sweep). Terminal rows count
    /// either way: a failed job already made its one terminal transition.
    pub async fn battles_with_activity(ids: &[i64], pool: &PgPool) -> Result<HashSet<i64>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }

        let rows = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT DISTINCT battle_id FROM mmr_calculation_jobs
            WHERE battle_id = ANY($1)
              AND status <> 'pending'
            "#,
        )
        .bind(ids)
        .fetch_all(pool)
        .await?;

        Ok(rows.into_iter().collect())
    }
}
