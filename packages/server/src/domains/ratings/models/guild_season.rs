use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashMap;
use uuid::Uuid;

/// Rating every guild starts a season with.
pub const DEFAULT_MMR: f64 = 1000.0;

/// Per-season rating row for one guild.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct GuildSeason {
    pub id: Uuid,
    pub guild_id: String,
    pub season_id: Uuid,
    pub current_mmr: f64,
    pub last_battle_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// SQL Queries - ALL queries must be in models/
// =============================================================================

impl GuildSeason {
    pub async fn find(guild_id: &str, season_id: Uuid, pool: &PgPool) -> Result<Option<Self>> {
        let row = sqlx::query_as::<_, GuildSeason>(
            "SELECT * FROM guild_seasons WHERE guild_id = $1 AND season_id = $2",
        )
        .bind(guild_id)
        .bind(season_id)
        .fetch_optional(pool)
        .await?;
        Ok(row)
    }

    /// Get or create the rating row, defaulting to [`DEFAULT_MMR`].
    pub async fn get_or_create(guild_id: &str, season_id: Uuid, pool: &PgPool) -> Result<Self> {
        let inserted = sqlx::query_as::<_, GuildSeason>(
            r#"
            INSERT INTO guild_seasons (id, guild_id, season_id, current_mmr)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (guild_id, season_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(guild_id)
        .bind(season_id)
        .bind(DEFAULT_MMR)
        .fetch_optional(pool)
        .await?;

        if let Some(row) = inserted {
            return Ok(row);
        }
        Self::find(guild_id, season_id, pool)
            .await?
            .ok_or_else(|| anyhow!("guild_season ({}, {}) vanished", guild_id, season_id))
    }

    pub async fn all_for_season(season_id: Uuid, pool: &PgPool) -> Result<Vec<Self>> {
        let rows = sqlx::query_as::<_, GuildSeason>(
            "SELECT * FROM guild_seasons WHERE season_id = $1 ORDER BY current_mmr DESC",
        )
        .bind(season_id)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    /// Current ratings for a set of guilds; missing rows read as the default.
    pub async fn current_ratings(
        guild_ids: &[String],
        season_id: Uuid,
        pool: &PgPool,
    ) -> Result<HashMap<String, f64>> {
        let rows = sqlx::query_as::<_, (String, f64)>(
            r#"
            SELECT guild_id, current_mmr
            FROM guild_seasons
            WHERE season_id = $1 AND guild_id = ANY($2)
            "#,
        )
        .bind(season_id)
        .bind(guild_ids)
        .fetch_all(pool)
        .await?;

        let mut ratings: HashMap<String, f64> = rows.into_iter().collect();
        for guild_id in guild_ids {
            ratings.entry(guild_id.clone()).or_insert(DEFAULT_MMR);
        }
        Ok(ratings)
    }

    /// Seed a carryover row. Returns false when the guild already has one.
    pub async fn seed(guild_id: &str, season_id: Uuid, mmr: f64, pool: &PgPool) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO guild_seasons (id, guild_id, season_id, current_mmr)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (guild_id, season_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(guild_id)
        .bind(season_id)
        .bind(mmr)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Apply a rating delta inside the caller's transaction.
    ///
    /// The current rating is re-read under a row lock so concurrent
    /// calculations cannot lose updates. Returns the new rating.
    pub async fn apply_delta(
        tx: &mut Transaction<'_, Postgres>,
        guild_id: &str,
        season_id: Uuid,
        delta: f64,
        battle_time: DateTime<Utc>,
    ) -> Result<f64> {
        let current = sqlx::query_scalar::<_, f64>(
            r#"
            SELECT current_mmr FROM guild_seasons
            WHERE guild_id = $1 AND season_id = $2
            FOR UPDATE
            "#,
        )
        .bind(guild_id)
        .bind(season_id)
        .fetch_one(&mut **tx)
        .await?;

        let next = current + delta;
        sqlx::query(
            r#"
            UPDATE guild_seasons
            SET current_mmr = $3,
                last_battle_at = GREATEST(COALESCE(last_battle_at, $4), $4),
                updated_at = NOW()
            WHERE guild_id = $1 AND season_id = $2
            "#,
        )
        .bind(guild_id)
        .bind(season_id)
        .bind(next)
        .bind(battle_time)
        .execute(&mut **tx)
        .await?;

        Ok(next)
    }
}
