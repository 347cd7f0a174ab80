//! FetchKillsJob - background fetch of a battle's kill events.
//!
//! Enqueued by the crawler and the gap-recovery sweeper with the
//! deterministic job id `battle-{albion_id}`, so repeated discoveries of the
//! same battle collapse into one live job.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domains::battles::models::{Battle, KillEvent};
use crate::domains::ratings::engine;
use crate::domains::ratings::jobs::CalculateMmrJob;
use crate::kernel::db::execute_with_retry;
use crate::kernel::jobs::{ClaimedJob, CommandMeta, JobHandler};
use crate::kernel::ServerKernel;

/// Job to fetch and persist the kill events of one battle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchKillsJob {
    pub albion_id: i64,
}

impl FetchKillsJob {
    /// The logical queue this job runs on.
    pub const QUEUE: &'static str = "kills-fetch";

    pub fn new(albion_id: i64) -> Self {
        Self { albion_id }
    }

    /// Deterministic job id so retries across crawls dedup.
    pub fn job_key(albion_id: i64) -> String {
        format!("battle-{}", crate::common::id_to_u64(albion_id))
    }
}

impl CommandMeta for FetchKillsJob {
    fn queue(&self) -> &'static str {
        Self::QUEUE
    }

    fn idempotency_key(&self) -> Option<String> {
        Some(Self::job_key(self.albion_id))
    }

    fn max_retries(&self) -> i32 {
        5
    }

    fn backoff_base_ms(&self) -> i64 {
        5_000
    }
}

/// Consumes `kills-fetch`: upserts kill events, stamps the battle, and hands
/// the battle over to MMR calculation.
pub struct FetchKillsHandler;

#[async_trait::async_trait]
impl JobHandler for FetchKillsHandler {
    async fn execute(&self, job: &ClaimedJob, kernel: &Arc<ServerKernel>) -> Result<()> {
        let cmd: FetchKillsJob = job.deserialize()?;
        let pool = &kernel.db_pool;

        let events = kernel
            .api
            .battle_kills(cmd.albion_id)
            .await
            .context("failed to fetch kill events")?;

        for event in &events {
            execute_with_retry(
                || KillEvent::upsert_from_record(event, cmd.albion_id, pool),
                3,
            )
            .await
            .with_context(|| format!("failed to upsert kill event {}", event.event_id))?;
        }

        execute_with_retry(|| Battle::stamp_kills_fetched(cmd.albion_id, pool), 3).await?;

        info!(
            battle_id = cmd.albion_id,
            events = events.len(),
            "kill events ingested"
        );

        // MMR hand-off must not fail the kills job: the battle and its kills
        // are already durable, and the sweeper can re-drive the calculation.
        if let Err(e) = enqueue_mmr_calculation(cmd.albion_id, kernel).await {
            warn!(battle_id = cmd.albion_id, error = %e, "failed to enqueue MMR calculation");
        }

        Ok(())
    }
}

/// Enqueue `mmr-calc` for a battle that passes the admission gate.
pub async fn enqueue_mmr_calculation(albion_id: i64, kernel: &Arc<ServerKernel>) -> Result<()> {
    let battle = Battle::find_by_id(albion_id, &kernel.db_pool)
        .await?
        .with_context(|| format!("battle {} missing after kills fetch", albion_id))?;

    let tuning = engine::EngineTuning::from_config(&kernel.config);
    if !engine::should_calculate_mmr(battle.total_players, battle.total_fame, &tuning) {
        return Ok(());
    }

    kernel
        .job_queue
        .enqueue(CalculateMmrJob::new(albion_id))
        .await?;

    Ok(())
}
