//! Season lifecycle, prime-time window matching, and carryover.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use tracing::info;
use uuid::Uuid;

use super::models::{PrimeTimeWindow, Season};
use crate::domains::battles::models::KillEvent;
use crate::domains::ratings::models::GuildSeason;

/// Lower clamp for carried-over ratings.
pub const CARRYOVER_FLOOR: f64 = 800.0;
/// Upper clamp for carried-over ratings.
pub const CARRYOVER_CEILING: f64 = 1500.0;

pub async fn get_active_season(pool: &PgPool) -> Result<Option<Season>> {
    Season::get_active(pool).await
}

/// Prime-time windows (UTC) matching the battle instant, wrap-aware.
pub async fn matching_windows(t: DateTime<Utc>, pool: &PgPool) -> Result<Vec<PrimeTimeWindow>> {
    use chrono::Timelike;

    let hour = t.hour();
    let windows = PrimeTimeWindow::all(pool).await?;
    Ok(windows
        .into_iter()
        .filter(|window| window.matches_hour(hour))
        .collect())
}

pub async fn is_prime_time(t: DateTime<Utc>, pool: &PgPool) -> Result<bool> {
    Ok(!matching_windows(t, pool).await?.is_empty())
}

pub async fn create_season(
    name: &str,
    start_date: DateTime<Utc>,
    end_date: Option<DateTime<Utc>>,
    pool: &PgPool,
) -> Result<Season> {
    let season = Season::create(name, start_date, end_date, pool).await?;
    info!(season = %season.name, active = season.is_active, "season created");
    Ok(season)
}

/// End a season. If a successor season is already active, its ratings are
/// seeded from the ended season via carryover.
pub async fn end_season(id: Uuid, end_date: DateTime<Utc>, pool: &PgPool) -> Result<Season> {
    let ended = Season::close(id, end_date, pool).await?;
    info!(season = %ended.name, "season ended");

    if let Some(next) = Season::get_active(pool).await? {
        if next.id != ended.id {
            initialize_new_season_with_carryover(&next, &ended, pool).await?;
        }
    }

    Ok(ended)
}

/// Half-regression to 1000, clamped into the carryover band.
pub fn carryover_mmr(previous: f64) -> f64 {
    (1000.0 + (previous - 1000.0) * 0.5).clamp(CARRYOVER_FLOOR, CARRYOVER_CEILING)
}

/// Seed every guild active in `previous` into `next` with a carried-over
/// rating. Existing rows in `next` are left untouched.
pub async fn initialize_new_season_with_carryover(
    next: &Season,
    previous: &Season,
    pool: &PgPool,
) -> Result<u64> {
    let prior = GuildSeason::all_for_season(previous.id, pool).await?;
    let mut seeded = 0;

    for entry in prior {
        let mmr = carryover_mmr(entry.current_mmr);
        if GuildSeason::seed(&entry.guild_id, next.id, mmr, pool).await? {
            seeded += 1;
        }
    }

    info!(
        from = %previous.name,
        to = %next.name,
        seeded,
        "season carryover complete"
    );
    Ok(seeded)
}

/// Resolve the season a battle belongs to: the one covering its start time,
/// falling back to the active season.
pub async fn season_for_battle(
    started_at: DateTime<Utc>,
    pool: &PgPool,
) -> Result<Option<Season>> {
    if let Some(season) = Season::active_at(started_at, pool).await? {
        return Ok(Some(season));
    }
    Season::get_active(pool).await.context("season lookup failed")
}

/// Kill-clustering weight of a battle.
///
/// Buckets the kill stream by (killer guild, minute) and counts buckets whose
/// kill count exceeds `ceil(total_kills / retained_guild_count)`. A high
/// weight means the fight collapsed into one-sided bursts.
pub fn kill_clustering(kills: &[KillEvent], total_kills: i32, retained_guild_count: usize) -> u32 {
    if kills.is_empty() || retained_guild_count == 0 {
        return 0;
    }

    let threshold = (total_kills as f64 / retained_guild_count as f64).ceil() as usize;

    let mut buckets: HashMap<(String, i64), usize> = HashMap::new();
    for kill in kills {
        let guild = match &kill.killer_guild {
            Some(guild) => guild.clone(),
            None => continue,
        };
        let minute = kill.timestamp.timestamp() / 60;
        *buckets.entry((guild, minute)).or_insert(0) += 1;
    }

    buckets
        .values()
        .filter(|count| **count > threshold)
        .count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn carryover_regresses_halfway_to_baseline() {
        assert_eq!(carryover_mmr(1000.0), 1000.0);
        assert_eq!(carryover_mmr(1200.0), 1100.0);
        assert_eq!(carryover_mmr(900.0), 950.0);
    }

    #[test]
    fn carryover_is_clamped() {
        // 1.5x regressed would be 2000 -> clamped to ceiling
        assert_eq!(carryover_mmr(3000.0), 1500.0);
        assert_eq!(carryover_mmr(0.0), 800.0);

        // Every input lands inside the band
        for previous in [-500.0, 0.0, 400.0, 1000.0, 1499.0, 2600.0, 10_000.0] {
            let seeded = carryover_mmr(previous);
            assert!((CARRYOVER_FLOOR..=CARRYOVER_CEILING).contains(&seeded));
        }
    }

    fn kill(guild: Option<&str>, minute: i64) -> KillEvent {
        KillEvent {
            event_id: minute * 100,
            timestamp: Utc.timestamp_opt(minute * 60, 0).unwrap(),
            total_victim_kill_fame: 1000,
            battle_albion_id: Some(1),
            killer_id: "k".to_string(),
            killer_name: "K".to_string(),
            killer_guild: guild.map(str::to_string),
            killer_alliance: None,
            killer_avg_ip: 1000.0,
            killer_equipment_json: None,
            victim_id: "v".to_string(),
            victim_name: "V".to_string(),
            victim_guild: None,
            victim_alliance: None,
            victim_avg_ip: 1000.0,
            victim_equipment_json: None,
        }
    }

    #[test]
    fn clustering_counts_bursty_buckets() {
        // 6 kills total over 2 retained guilds -> threshold = 3
        let mut kills = Vec::new();
        for i in 0..4 {
            let mut k = kill(Some("Burst"), 10);
            k.event_id = i;
            kills.push(k);
        }
        kills.push(kill(Some("Spread"), 11));
        kills.push(kill(Some("Spread"), 12));

        assert_eq!(kill_clustering(&kills, 6, 2), 1);
    }

    #[test]
    fn clustering_ignores_guildless_killers_and_empty_input() {
        assert_eq!(kill_clustering(&[], 10, 2), 0);

        let kills = vec![kill(None, 1), kill(None, 1), kill(None, 1)];
        assert_eq!(kill_clustering(&kills, 3, 1), 0);
    }
}
