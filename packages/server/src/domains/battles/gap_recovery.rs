//! Gap-recovery sweeper.
//!
//! The crawler can miss battles: late-arriving records slide behind the
//! watermark, crashes drop half-finished passes. Two sweeps repair that:
//!
//! - **Rolling**: a shallow periodic scan of the first few listing pages that
//!   upserts anything missing and re-drives its kills fetch.
//! - **Daily deep**: a long scan (up to hundreds of pages) that additionally
//!   checks whether a present battle ever reached an MMR terminal state, and
//!   if not re-offers it to the notification queue - never to `kills-fetch`,
//!   which could double-process MMR.
//!
//! Both modes ignore battles younger than ten minutes to avoid racing the
//! crawler on fights that are still being listed.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::domains::battles::crawler::LIST_MIN_PLAYERS;
use crate::domains::battles::jobs::{FetchKillsJob, NotifyBattleJob};
use crate::domains::battles::models::Battle;
use crate::domains::ratings::models::MmrCalculationJob;
use crate::kernel::albion_client::BattleSummary;
use crate::kernel::ServerKernel;

/// Battles younger than this are left to the crawler.
pub const MIN_CANDIDATE_AGE_MIN: i64 = 10;

/// Whether a listed battle is old enough for gap recovery to touch.
pub fn is_sweep_candidate(now: DateTime<Utc>, started_at: DateTime<Utc>) -> bool {
    now - started_at >= Duration::minutes(MIN_CANDIDATE_AGE_MIN)
}

/// What one sweep did.
#[derive(Debug, Default, Clone, Copy)]
pub struct SweepOutcome {
    pub pages_scanned: u32,
    pub candidates_checked: usize,
    pub battles_recovered: usize,
    pub kills_enqueued: usize,
    pub notifications_enqueued: usize,
}

pub struct GapRecovery {
    kernel: Arc<ServerKernel>,
}

impl GapRecovery {
    pub fn new(kernel: Arc<ServerKernel>) -> Self {
        Self { kernel }
    }

    /// Shallow periodic sweep over the first `gap_recovery_pages` pages.
    pub async fn run_rolling_sweep(&self) -> Result<SweepOutcome> {
        let config = &self.kernel.config;
        let mut outcome = SweepOutcome::default();
        let now = Utc::now();

        for page in 0..config.gap_recovery_pages {
            let battles = self
                .kernel
                .api
                .list_battles(page, LIST_MIN_PLAYERS)
                .await?;
            outcome.pages_scanned += 1;

            if battles.is_empty() {
                break;
            }

            let candidates: Vec<&BattleSummary> = battles
                .iter()
                .filter(|battle| is_sweep_candidate(now, battle.start_time))
                .collect();
            if candidates.is_empty() {
                continue;
            }

            let ids: Vec<i64> = candidates.iter().map(|battle| battle.id).collect();
            let existing = Battle::existing_ids(&ids, &self.kernel.db_pool).await?;
            outcome.candidates_checked += candidates.len();

            for summary in candidates {
                if existing.contains(&summary.id) {
                    continue;
                }
                self.recover_battle(summary, &mut outcome).await?;
            }
        }

        info!(
            pages = outcome.pages_scanned,
            recovered = outcome.battles_recovered,
            "rolling gap-recovery sweep complete"
        );
        Ok(outcome)
    }

    /// Daily deep sweep: long scan, MMR reconciliation included.
    pub async fn run_deep_sweep(&self) -> Result<SweepOutcome> {
        let config = &self.kernel.config;
        let pool = &self.kernel.db_pool;
        let mut outcome = SweepOutcome::default();
        let now = Utc::now();
        let max_age = Duration::hours(config.nightly_sweep_lookback_h);

        for page in 0..config.nightly_sweep_pages {
            let battles = self
                .kernel
                .api
                .list_battles(page, LIST_MIN_PLAYERS)
                .await?;
            outcome.pages_scanned += 1;

            if battles.is_empty() {
                break;
            }

            let candidates: Vec<&BattleSummary> = battles
                .iter()
                .filter(|battle| is_sweep_candidate(now, battle.start_time))
                .collect();

            if !candidates.is_empty() {
                let ids: Vec<i64> = candidates.iter().map(|battle| battle.id).collect();
                // One batched pair: battle existence plus MMR activity.
                let existing = Battle::existing_ids(&ids, pool).await?;
                let mmr_active = MmrCalculationJob::battles_with_activity(&ids, pool).await?;
                outcome.candidates_checked += candidates.len();

                for summary in candidates {
                    if !existing.contains(&summary.id) {
                        self.recover_battle(summary, &mut outcome).await?;
                    } else if !mmr_active.contains(&summary.id) {
                        // Present but never processed: re-offer downstream,
                        // without a kills job that could double-run MMR.
                        let result = self
                            .kernel
                            .job_queue
                            .enqueue(NotifyBattleJob::new(summary.id))
                            .await?;
                        if result.is_created() {
                            outcome.notifications_enqueued += 1;
                        }
                    }
                }
            }

            let oldest = battles.iter().map(|battle| battle.start_time).min();
            if let Some(oldest) = oldest {
                if now - oldest > max_age {
                    debug!(page, oldest = %oldest, "deep sweep reached the age horizon");
                    break;
                }
            }

            tokio::time::sleep(std::time::Duration::from_millis(
                config.nightly_sweep_sleep_ms,
            ))
            .await;
        }

        info!(
            pages = outcome.pages_scanned,
            recovered = outcome.battles_recovered,
            notifications = outcome.notifications_enqueued,
            "deep gap-recovery sweep complete"
        );
        Ok(outcome)
    }

    /// Upsert a missing battle and re-drive its downstream jobs.
    ///
    /// The detail endpoint gives richer guild/alliance JSON; if it fails the
    /// listing summary is good enough.
    async fn recover_battle(
        &self,
        summary: &BattleSummary,
        outcome: &mut SweepOutcome,
    ) -> Result<()> {
        let enriched = match self.kernel.api.battle_detail(summary.id).await {
            Ok(detail) => detail,
            Err(e) => {
                warn!(battle_id = summary.id, error = %e, "battle detail unavailable, using listing summary");
                summary.clone()
            }
        };

        Battle::upsert(&enriched, &self.kernel.db_pool).await?;
        outcome.battles_recovered += 1;
        info!(battle_id = summary.id, "recovered missing battle");

        let kills = self
            .kernel
            .job_queue
            .enqueue(FetchKillsJob::new(summary.id))
            .await?;
        if kills.is_created() {
            outcome.kills_enqueued += 1;
        }

        let notify = self
            .kernel
            .job_queue
            .enqueue(NotifyBattleJob::new(summary.id))
            .await?;
        if notify.is_created() {
            outcome.notifications_enqueued += 1;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn young_battles_are_not_candidates() {
        let now = Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap();
        assert!(!is_sweep_candidate(now, now - Duration::minutes(5)));
        assert!(is_sweep_candidate(now, now - Duration::minutes(10)));
        assert!(is_sweep_candidate(now, now - Duration::hours(3)));
    }
}
