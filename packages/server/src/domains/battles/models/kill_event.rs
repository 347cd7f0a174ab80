use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;

use crate::common::ser_i64_as_u64;
use crate::kernel::albion_client::KillEventRecord;

/// One kill event inside a battle, immutable once ingested.
///
/// Killer and victim are projected into flat columns; equipment stays an
/// opaque JSON snapshot.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct KillEvent {
    #[serde(serialize_with = "ser_i64_as_u64")]
    pub event_id: i64,
    pub timestamp: DateTime<Utc>,
    pub total_victim_kill_fame: i64,
    pub battle_albion_id: Option<i64>,

    pub killer_id: String,
    pub killer_name: String,
    pub killer_guild: Option<String>,
    pub killer_alliance: Option<String>,
    pub killer_avg_ip: f64,
    pub killer_equipment_json: Option<serde_json::Value>,

    pub victim_id: String,
    pub victim_name: String,
    pub victim_guild: Option<String>,
    pub victim_alliance: Option<String>,
    pub victim_avg_ip: f64,
    pub victim_equipment_json: Option<serde_json::Value>,
}

// =============================================================================
// SQL Queries - ALL queries must be in models/
// =============================================================================

impl KillEvent {
    /// Upsert a kill event from an upstream record.
    pub async fn upsert_from_record(
        record: &KillEventRecord,
        battle_albion_id: i64,
        pool: &PgPool,
    ) -> Result<Self> {
        let event = sqlx::query_as::<_, KillEvent>(
            r#"
            INSERT INTO kill_events (
                event_id, timestamp, total_victim_kill_fame, battle_albion_id,
                killer_id, killer_name, killer_guild, killer_alliance,
                killer_avg_ip, killer_equipment_json,
                victim_id, victim_name, victim_guild, victim_alliance,
                victim_avg_ip, victim_equipment_json
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (event_id) DO UPDATE SET
                timestamp = EXCLUDED.timestamp,
                total_victim_kill_fame = EXCLUDED.total_victim_kill_fame,
                battle_albion_id = EXCLUDED.battle_albion_id,
                killer_id = EXCLUDED.killer_id,
                killer_name = EXCLUDED.killer_name,
                killer_guild = EXCLUDED.killer_guild,
                killer_alliance = EXCLUDED.killer_alliance,
                killer_avg_ip = EXCLUDED.killer_avg_ip,
                killer_equipment_json = EXCLUDED.killer_equipment_json,
                victim_id = EXCLUDED.victim_id,
                victim_name = EXCLUDED.victim_name,
                victim_guild = EXCLUDED.victim_guild,
                victim_alliance = EXCLUDED.victim_alliance,
                victim_avg_ip = EXCLUDED.victim_avg_ip,
                victim_equipment_json = EXCLUDED.victim_equipment_json
            RETURNING *
            "#,
        )
        .bind(record.event_id)
        .bind(record.time_stamp)
        .bind(record.total_victim_kill_fame)
        .bind(battle_albion_id)
        .bind(&record.killer.id)
        .bind(&record.killer.name)
        .bind(&record.killer.guild_name)
        .bind(&record.killer.alliance_name)
        .bind(record.killer.average_item_power)
        .bind(&record.killer.equipment)
        .bind(&record.victim.id)
        .bind(&record.victim.name)
        .bind(&record.victim.guild_name)
        .bind(&record.victim.alliance_name)
        .bind(record.victim.average_item_power)
        .bind(&record.victim.equipment)
        .fetch_one(pool)
        .await?;

        Ok(event)
    }

    /// All kill events of one battle, oldest first.
    pub async fn find_by_battle(battle_albion_id: i64, pool: &PgPool) -> Result<Vec<Self>> {
        let events = sqlx::query_as::<_, KillEvent>(
            r#"
            SELECT * FROM kill_events
            WHERE battle_albion_id = $1
            ORDER BY timestamp ASC
            "#,
        )
        .bind(battle_albion_id)
        .fetch_all(pool)
        .await?;

        Ok(events)
    }
}
