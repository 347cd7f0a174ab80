use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

/// Append-only audit row for one guild in one processed battle.
///
/// The anti-farming factor is computed from this feed: repeated wins against
/// the same opponents inside a rolling window shrink future gains.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MmrCalculationLog {
    pub id: Uuid,
    pub battle_id: i64,
    pub season_id: Uuid,
    pub guild_id: String,
    pub guild_name: String,
    pub is_win: bool,
    pub kills: i32,
    pub deaths: i32,
    pub players: i32,
    pub opponent_guilds: Vec<String>,
    pub processed_at: DateTime<Utc>,
}

// =============================================================================
// SQL Queries - ALL queries must be in models/
// =============================================================================

impl MmrCalculationLog {
    /// Append one audit row inside the caller's transaction.
    #[allow(clippy::too_many_arguments)]
    pub async fn insert(
        tx: &mut Transaction<'_, Postgres>,
        battle_id: i64,
        season_id: Uuid,
        guild_id: &str,
        guild_name: &str,
        is_win: bool,
        kills: i32,
        deaths: i32,
        players: i32,
        opponent_guilds: &[String],
    ) -> Result<Self> {
        let log = sqlx::query_as::<_, MmrCalculationLog>(
            r#"
            INSERT INTO mmr_calculation_logs (
                id, battle_id, season_id, guild_id, guild_name, is_win,
                kills, deaths, players, opponent_guilds, processed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW())
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(battle_id)
        .bind(season_id)
        .bind(guild_id)
        .bind(guild_name)
        .bind(is_win)
        .bind(kills)
        .bind(deaths)
        .bind(players)
        .bind(opponent_guilds)
        .fetch_one(&mut **tx)
        .await?;

        Ok(log)
    }

    /// Wins by `guild_id` against any of `opponents` since `since`.
    pub async fn wins_against_since(
        guild_id: &str,
        opponents: &[String],
        since: DateTime<Utc>,
        pool: &PgPool,
    ) -> Result<i64> {
        if opponents.is_empty() {
            return Ok(0);
        }

        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM mmr_calculation_logs
            WHERE guild_id = $1
              AND is_win
              AND processed_at >= $2
              AND opponent_guilds && $3
            "#,
        )
        .bind(guild_id)
        .bind(since)
        .bind(opponents)
        .fetch_one(pool)
        .await?;

        Ok(count)
    }
}
