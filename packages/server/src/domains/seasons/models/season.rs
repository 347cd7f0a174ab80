use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

/// Competitive season. At most one season is active at a time.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Season {
    pub id: Uuid,
    pub name: String,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// SQL Queries - ALL queries must be in models/
// =============================================================================

impl Season {
    pub async fn find_by_id(id: Uuid, pool: &PgPool) -> Result<Option<Self>> {
        let season = sqlx::query_as::<_, Season>("SELECT * FROM seasons WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(season)
    }

    /// The single active season, if any.
    pub async fn get_active(pool: &PgPool) -> Result<Option<Self>> {
        let season = sqlx::query_as::<_, Season>(
            "SELECT * FROM seasons WHERE is_active = true ORDER BY start_date DESC LIMIT 1",
        )
        .fetch_optional(pool)
        .await?;
        Ok(season)
    }

    /// The season covering instant `t`.
    pub async fn active_at(t: DateTime<Utc>, pool: &PgPool) -> Result<Option<Self>> {
        let season = sqlx::query_as::<_, Season>(
            r#"
            SELECT * FROM seasons
            WHERE start_date <= $1
              AND (end_date IS NULL OR end_date >= $1)
            ORDER BY start_date DESC
            LIMIT 1
            "#,
        )
        .bind(t)
        .fetch_optional(pool)
        .await?;
        Ok(season)
    }

    /// Create a season. An open-ended season becomes the active one and
    /// deactivates every other season.
    pub async fn create(
        name: &str,
        start_date: DateTime<Utc>,
        end_date: Option<DateTime<Utc>>,
        pool: &PgPool,
    ) -> Result<Self> {
        let mut tx = pool.begin().await?;

        let is_active = end_date.is_none();
        if is_active {
            sqlx::query("UPDATE seasons SET is_active = false, updated_at = NOW() WHERE is_active")
                .execute(&mut *tx)
                .await?;
        }

        let season = sqlx::query_as::<_, Season>(
            r#"
            INSERT INTO seasons (id, name, start_date, end_date, is_active)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(start_date)
        .bind(end_date)
        .bind(is_active)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(season)
    }

    /// Close a season: stamp the end date and drop the active flag.
    pub async fn close(id: Uuid, end_date: DateTime<Utc>, pool: &PgPool) -> Result<Self> {
        let season = sqlx::query_as::<_, Season>(
            r#"
            UPDATE seasons
            SET end_date = $2, is_active = false, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(end_date)
        .fetch_one(pool)
        .await?;
        Ok(season)
    }
}
