//! NotifyBattleJob - hand a newly ingested battle to the notification seam.
//!
//! The queue's idempotency key is the authoritative dedup; the handler keeps
//! an additional advisory TTL set of recently announced battle ids so a
//! re-enqueued notification after cleanup stays quiet.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domains::battles::models::Battle;
use crate::kernel::jobs::{ClaimedJob, CommandMeta, JobHandler};
use crate::kernel::ServerKernel;

const RECENTLY_NOTIFIED_TTL: Duration = Duration::from_secs(60 * 60);

/// Job to announce one battle to the configured notifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyBattleJob {
    pub albion_id: i64,
}

impl NotifyBattleJob {
    pub const QUEUE: &'static str = "battle-notify";

    pub fn new(albion_id: i64) -> Self {
        Self { albion_id }
    }

    pub fn job_key(albion_id: i64) -> String {
        format!("notify-{}", crate::common::id_to_u64(albion_id))
    }
}

impl CommandMeta for NotifyBattleJob {
    fn queue(&self) -> &'static str {
        Self::QUEUE
    }

    fn idempotency_key(&self) -> Option<String> {
        Some(Self::job_key(self.albion_id))
    }

    fn max_retries(&self) -> i32 {
        3
    }
}

/// Consumes `battle-notify`.
pub struct NotifyBattleHandler {
    recently_notified: Mutex<HashMap<i64, Instant>>,
}

impl NotifyBattleHandler {
    pub fn new() -> Self {
        Self {
            recently_notified: Mutex::new(HashMap::new()),
        }
    }

    /// Advisory only: true when this process announced the battle within the
    /// TTL. The queue key remains the real dedup.
    fn seen_recently(&self, albion_id: i64) -> bool {
        let mut seen = self.recently_notified.lock().unwrap();
        seen.retain(|_, at| at.elapsed() < RECENTLY_NOTIFIED_TTL);

        if seen.contains_key(&albion_id) {
            return true;
        }
        seen.insert(albion_id, Instant::now());
        false
    }
}

impl Default for NotifyBattleHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl JobHandler for NotifyBattleHandler {
    async fn execute(&self, job: &ClaimedJob, kernel: &Arc<ServerKernel>) -> Result<()> {
        let cmd: NotifyBattleJob = job.deserialize()?;

        if self.seen_recently(cmd.albion_id) {
            debug!(battle_id = cmd.albion_id, "battle already announced recently");
            return Ok(());
        }

        let battle = Battle::find_by_id(cmd.albion_id, &kernel.db_pool)
            .await?
            .with_context(|| format!("battle {} not found for notification", cmd.albion_id))?;

        kernel.notifier.notify_battle(&battle).await
    }
}
