//! CalculateMmrJob - rating calculation for one battle.
//!
//! The queue job is only transport; the durable `mmr_calculation_jobs` row is
//! the authoritative idempotency guard. A `(battle, season)` pair reaches a
//! terminal state exactly once: `completed` after a successful engine run, or
//! `failed` after the last retry, in which case every participating guild
//! receives a symbolic +1.0 so the system makes minimal, auditable progress.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::domains::battles::models::{Battle, KillEvent};
use crate::domains::ratings::analysis::{
    aggregate_guild_stats, battle_duration_sec, friend_groups,
};
use crate::domains::ratings::engine::{
    self, BattleAnalysis, BattleOutcome, EngineTuning, GuildBattleStats,
};
use crate::domains::ratings::models::{
    Guild, GuildPrimeTimeMass, GuildSeason, MmrCalculationJob, MmrCalculationLog,
};
use crate::domains::seasons::service as seasons;
use crate::kernel::jobs::{ClaimedJob, CommandMeta, JobHandler};
use crate::kernel::ServerKernel;

/// Rolling window feeding the anti-farming factor.
pub const ANTI_FARMING_WINDOW_DAYS: i64 = 30;

/// Symbolic rating change applied when a calculation terminally fails.
pub const FALLBACK_DELTA: f64 = 1.0;

/// Job to run the MMR engine over one battle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculateMmrJob {
    pub albion_id: i64,
    pub enqueued_at_ms: i64,
}

impl CalculateMmrJob {
    pub const QUEUE: &'static str = "mmr-calc";

    pub fn new(albion_id: i64) -> Self {
        Self {
            albion_id,
            enqueued_at_ms: Utc::now().timestamp_millis(),
        }
    }

    pub fn job_key(&self) -> String {
        format!(
            "mmr-{}-{}",
            crate::common::id_to_u64(self.albion_id),
            self.enqueued_at_ms
        )
    }
}

impl CommandMeta for CalculateMmrJob {
    fn queue(&self) -> &'static str {
        Self::QUEUE
    }

    fn idempotency_key(&self) -> Option<String> {
        Some(self.job_key())
    }

    fn max_retries(&self) -> i32 {
        3
    }

    fn backoff_base_ms(&self) -> i64 {
        10_000
    }
}

/// Consumes `mmr-calc`. The handler body never propagates an error out of
/// the final attempt: terminal failures are absorbed into the guard row plus
/// the fallback change.
pub struct CalculateMmrHandler;

#[async_trait::async_trait]
impl JobHandler for CalculateMmrHandler {
    async fn execute(&self, job: &ClaimedJob, kernel: &Arc<ServerKernel>) -> Result<()> {
        let cmd: CalculateMmrJob = job.deserialize()?;

        match process_battle(cmd.albion_id, kernel).await {
            Ok(()) => Ok(()),
            Err(e) if job.job.is_final_attempt() => {
                error!(
                    battle_id = cmd.albion_id,
                    error = %e,
                    "MMR calculation failed terminally, applying fallback"
                );
                if let Err(fallback_error) = apply_fallback(cmd.albion_id, &e, kernel).await {
                    error!(
                        battle_id = cmd.albion_id,
                        error = %fallback_error,
                        "fallback application failed"
                    );
                }
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Full calculation for one battle; idempotent via the guard row.
async fn process_battle(albion_id: i64, kernel: &Arc<ServerKernel>) -> Result<()> {
    let pool = &kernel.db_pool;

    let battle = Battle::find_by_id(albion_id, pool)
        .await?
        .with_context(|| format!("battle {} not found for MMR calculation", albion_id))?;

    let season = match seasons::season_for_battle(battle.started_at, pool).await? {
        Some(season) => season,
        None => {
            info!(battle_id = albion_id, "no season covers this battle, skipping MMR");
            return Ok(());
        }
    };

    let guard = MmrCalculationJob::get_or_create(albion_id, season.id, pool).await?;
    if guard.status.is_terminal() {
        debug!(
            battle_id = albion_id,
            season = %season.name,
            status = ?guard.status,
            "MMR already processed, skipping"
        );
        return Ok(());
    }
    let guard = MmrCalculationJob::mark_processing(guard.id, pool).await?;

    let tuning = EngineTuning::from_config(&kernel.config);
    if !engine::should_calculate_mmr(battle.total_players, battle.total_fame, &tuning) {
        MmrCalculationJob::mark_completed(guard.id, pool).await?;
        debug!(battle_id = albion_id, "battle below admission thresholds");
        return Ok(());
    }

    let kills = KillEvent::find_by_battle(albion_id, pool).await?;
    let drafts = aggregate_guild_stats(&battle.guilds_json, &kills);
    if drafts.is_empty() {
        MmrCalculationJob::mark_completed(guard.id, pool).await?;
        debug!(battle_id = albion_id, "no guild participation observed");
        return Ok(());
    }

    // Resolve guilds and make sure every one has a rating row this season.
    let mut guild_ids: HashMap<String, String> = HashMap::new();
    let mut guild_season_ids: HashMap<String, uuid::Uuid> = HashMap::new();
    for draft in &drafts {
        let guild = Guild::get_or_create(&draft.guild_name, kernel.api.as_ref(), pool).await?;
        let guild_season = GuildSeason::get_or_create(&guild.id, season.id, pool).await?;
        guild_season_ids.insert(guild.id.clone(), guild_season.id);
        guild_ids.insert(draft.guild_name.clone(), guild.id);
    }

    let ids: Vec<String> = guild_ids.values().cloned().collect();
    let ratings = GuildSeason::current_ratings(&ids, season.id, pool).await?;

    let mut stats: Vec<GuildBattleStats> = drafts
        .iter()
        .map(|draft| {
            let guild_id = guild_ids[&draft.guild_name].clone();
            let current_mmr = ratings
                .get(&guild_id)
                .copied()
                .unwrap_or(crate::domains::ratings::models::DEFAULT_MMR);
            GuildBattleStats {
                guild_id,
                guild_name: draft.guild_name.clone(),
                kills: draft.kills,
                deaths: draft.deaths,
                fame_gained: draft.fame_gained,
                fame_lost: draft.fame_lost,
                players: draft.players,
                avg_ip: draft.avg_ip,
                current_mmr,
                recent_wins_vs_opponents: 0,
            }
        })
        .collect();

    let windows = seasons::matching_windows(battle.started_at, pool).await?;
    let mut analysis = BattleAnalysis {
        battle_id: albion_id,
        season_id: season.id,
        total_players: battle.total_players,
        total_fame: battle.total_fame,
        total_kills: battle.total_kills,
        battle_duration_sec: battle_duration_sec(&kills),
        is_prime_time: !windows.is_empty(),
        kill_clustering: 0,
        friend_groups: friend_groups(&kills),
        guild_stats: Vec::new(),
    };

    // Retention decides both the clustering threshold and the opponent sets
    // the anti-farming lookup runs against.
    analysis.guild_stats = stats.clone();
    let retained: Vec<String> = engine::retained_stats(&analysis, &tuning)
        .iter()
        .map(|s| s.guild_id.clone())
        .collect();
    analysis.kill_clustering =
        seasons::kill_clustering(&kills, battle.total_kills, retained.len());

    let since = Utc::now() - Duration::days(ANTI_FARMING_WINDOW_DAYS);
    for stat in &mut stats {
        if !retained.contains(&stat.guild_id) {
            continue;
        }
        let opponent_names: Vec<String> = analysis
            .guild_stats
            .iter()
            .filter(|other| retained.contains(&other.guild_id) && other.guild_id != stat.guild_id)
            .map(|other| other.guild_name.clone())
            .collect();
        stat.recent_wins_vs_opponents =
            MmrCalculationLog::wins_against_since(&stat.guild_id, &opponent_names, since, pool)
                .await? as u32;
    }
    analysis.guild_stats = stats;

    let outcome = engine::calculate(&analysis, &tuning);

    // Persist everything in one transaction: either the whole battle commits
    // or the retry re-runs it against unchanged ratings.
    let mut tx = pool.begin().await?;
    for change in &outcome.changes {
        GuildSeason::apply_delta(
            &mut tx,
            &change.guild_id,
            season.id,
            change.delta,
            battle.started_at,
        )
        .await?;

        MmrCalculationLog::insert(
            &mut tx,
            albion_id,
            season.id,
            &change.guild_id,
            &change.guild_name,
            change.outcome == BattleOutcome::Win,
            change.kills,
            change.deaths,
            change.players,
            &change.opponents,
        )
        .await?;
    }
    for mass in &outcome.mass_updates {
        let guild_season_id = guild_season_ids
            .get(&mass.guild_id)
            .copied()
            .with_context(|| format!("missing guild_season for {}", mass.guild_id))?;
        for window in &windows {
            GuildPrimeTimeMass::record_battle(
                &mut tx,
                guild_season_id,
                window.id,
                mass.players,
                battle.started_at,
            )
            .await?;
        }
    }
    tx.commit().await?;

    MmrCalculationJob::mark_completed(guard.id, pool).await?;

    info!(
        battle_id = albion_id,
        season = %season.name,
        guilds = outcome.changes.len(),
        prime_time = analysis.is_prime_time,
        "MMR calculation complete"
    );
    Ok(())
}

/// Terminal-failure path: mark the guard `failed` and apply the symbolic
/// +1.0 to every guild seen in the battle's kill stream.
async fn apply_fallback(
    albion_id: i64,
    cause: &anyhow::Error,
    kernel: &Arc<ServerKernel>,
) -> Result<()> {
    let pool = &kernel.db_pool;

    let battle = Battle::find_by_id(albion_id, pool)
        .await?
        .with_context(|| format!("battle {} not found for fallback", albion_id))?;
    let season = seasons::season_for_battle(battle.started_at, pool)
        .await?
        .context("no season for fallback")?;

    let guard = MmrCalculationJob::get_or_create(albion_id, season.id, pool).await?;
    if guard.status.is_terminal() {
        return Ok(());
    }
    MmrCalculationJob::mark_failed(guard.id, &cause.to_string(), pool).await?;

    let kills = KillEvent::find_by_battle(albion_id, pool).await?;
    let drafts = aggregate_guild_stats(&battle.guilds_json, &kills);

    let mut tx = pool.begin().await?;
    for draft in &drafts {
        let guild = Guild::get_or_create(&draft.guild_name, kernel.api.as_ref(), pool).await?;
        GuildSeason::get_or_create(&guild.id, season.id, pool).await?;
        GuildSeason::apply_delta(&mut tx, &guild.id, season.id, FALLBACK_DELTA, battle.started_at)
            .await?;
    }
    tx.commit().await?;

    warn!(
        battle_id = albion_id,
        guilds = drafts.len(),
        "applied symbolic fallback rating change"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_key_carries_battle_and_timestamp() {
        let job = CalculateMmrJob {
            albion_id: 42,
            enqueued_at_ms: 1_700_000_000_000,
        };
        assert_eq!(job.job_key(), "mmr-42-1700000000000");
        assert_eq!(job.idempotency_key(), Some("mmr-42-1700000000000".to_string()));
    }

    #[test]
    fn queue_and_retry_policy() {
        let job = CalculateMmrJob::new(7);
        assert_eq!(job.queue(), "mmr-calc");
        assert_eq!(job.max_retries(), 3);
    }

    #[test]
    fn serialization_round_trips() {
        let job = CalculateMmrJob::new(900);
        let json = serde_json::to_string(&job).unwrap();
        let back: CalculateMmrJob = serde_json::from_str(&json).unwrap();
        assert_eq!(back.albion_id, 900);
        assert_eq!(back.enqueued_at_ms, job.enqueued_at_ms);
    }
}
