use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use std::collections::HashSet;

use crate::common::ser_i64_as_u64;
use crate::kernel::albion_client::BattleSummary;

/// One discrete encounter with aggregate stats and its participant snapshot.
///
/// The `alliances_json`/`guilds_json` blobs are the upstream view verbatim;
/// they are never normalized into sub-entities.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Battle {
    #[serde(serialize_with = "ser_i64_as_u64")]
    pub albion_id: i64,
    pub started_at: DateTime<Utc>,
    pub total_fame: i64,
    pub total_kills: i32,
    pub total_players: i32,
    pub alliances_json: serde_json::Value,
    pub guilds_json: serde_json::Value,
    pub ingested_at: DateTime<Utc>,
    pub kills_fetched_at: Option<DateTime<Utc>>,
}

// =============================================================================
// SQL Queries - ALL queries must be in models/
// =============================================================================

impl Battle {
    /// Upsert a battle from an upstream summary.
    ///
    /// Stats and JSON blobs are overwritten wholesale (last write wins);
    /// `kills_fetched_at` is preserved. Returns the row plus whether it was
    /// newly created.
    pub async fn upsert(summary: &BattleSummary, pool: &PgPool) -> Result<(Self, bool)> {
        let existed = Self::exists(summary.id, pool).await?;

        let battle = sqlx::query_as::<_, Battle>(
            r#"
            INSERT INTO battles (
                albion_id, started_at, total_fame, total_kills, total_players,
                alliances_json, guilds_json, ingested_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
            ON CONFLICT (albion_id) DO UPDATE SET
                started_at = EXCLUDED.started_at,
                total_fame = EXCLUDED.total_fame,
                total_kills = EXCLUDED.total_kills,
                total_players = EXCLUDED.total_players,
                alliances_json = EXCLUDED.alliances_json,
                guilds_json = EXCLUDED.guilds_json
            RETURNING *
            "#,
        )
        .bind(summary.id)
        .bind(summary.start_time)
        .bind(summary.total_fame)
        .bind(summary.total_kills)
        .bind(summary.total_players)
        .bind(&summary.alliances)
        .bind(&summary.guilds)
        .fetch_one(pool)
        .await?;

        Ok((battle, !existed))
    }

    pub async fn find_by_id(albion_id: i64, pool: &PgPool) -> Result<Option<Self>> {
        let battle = sqlx::query_as::<_, Battle>("SELECT * FROM battles WHERE albion_id = $1")
            .bind(albion_id)
            .fetch_optional(pool)
            .await?;
        Ok(battle)
    }

    pub async fn exists(albion_id: i64, pool: &PgPool) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM battles WHERE albion_id = $1)",
        )
        .bind(albion_id)
        .fetch_one(pool)
        .await?;
        Ok(exists)
    }

    /// Which of the given ids already have a row (single batched query).
    pub async fn existing_ids(albion_ids: &[i64], pool: &PgPool) -> Result<HashSet<i64>> {
        if albion_ids.is_empty() {
            return Ok(HashSet::new());
        }

        let rows = sqlx::query_scalar::<_, i64>(
            "SELECT albion_id FROM battles WHERE albion_id = ANY($1)",
        )
        .bind(albion_ids)
        .fetch_all(pool)
        .await?;

        Ok(rows.into_iter().collect())
    }

    /// Stamp the battle as having had its kill events fetched.
    pub async fn stamp_kills_fetched(albion_id: i64, pool: &PgPool) -> Result<()> {
        sqlx::query("UPDATE battles SET kills_fetched_at = NOW() WHERE albion_id = $1")
            .bind(albion_id)
            .execute(pool)
            .await?;
        Ok(())
    }
}
