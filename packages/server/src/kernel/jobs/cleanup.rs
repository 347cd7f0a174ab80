//! Queue cleanup supervisor.
//!
//! The jobs table is append-heavy: every crawl tick and every retry leaves
//! finished rows behind. The supervisor keeps the table bounded with tiered
//! age-based sweeps, per-queue retention budgets, and an orphan sweep for
//! queues that are no longer registered.
//!
//! Tiers by total tracked jobs:
//! - > 1000 → comprehensive (drop finished rows older than 1 minute)
//! - > 500  → aggressive    (older than 10 minutes)
//! - > 100  → normal        (older than 30 minutes)
//! - else   → skip

use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use chrono::Duration;
use sqlx::PgPool;
use tracing::{debug, info, warn};

use super::job::Job;

const SOFT_KEY_ALARM: i64 = 500;
const FORCED_SWEEP_KEYS: i64 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupTier {
    Comprehensive,
    Aggressive,
    Normal,
    Skip,
}

impl CleanupTier {
    /// Pick a tier from the total number of tracked jobs.
    pub fn select(total_jobs: i64) -> Self {
        if total_jobs > 1_000 {
            CleanupTier::Comprehensive
        } else if total_jobs > 500 {
            CleanupTier::Aggressive
        } else if total_jobs > 100 {
            CleanupTier::Normal
        } else {
            CleanupTier::Skip
        }
    }

    /// Maximum age finished jobs may reach under this tier.
    pub fn max_age(&self) -> Option<Duration> {
        match self {
            CleanupTier::Comprehensive => Some(Duration::minutes(1)),
            CleanupTier::Aggressive => Some(Duration::minutes(10)),
            CleanupTier::Normal => Some(Duration::minutes(30)),
            CleanupTier::Skip => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CleanupTier::Comprehensive => "comprehensive",
            CleanupTier::Aggressive => "aggressive",
            CleanupTier::Normal => "normal",
            CleanupTier::Skip => "skip",
        }
    }
}

/// Per-queue retention budget enforced on every non-skip tick.
#[derive(Debug, Clone)]
pub struct QueueRetention {
    pub queue: &'static str,
    pub keep_completed: i64,
    pub keep_failed: i64,
}

#[derive(Debug, Clone)]
pub struct CleanupConfig {
    pub registered_queues: Vec<String>,
    pub retention: Vec<QueueRetention>,
}

#[derive(Debug, Clone, Copy)]
pub struct CleanupReport {
    pub tier: CleanupTier,
    pub total_jobs: i64,
    pub tracked_keys: i64,
    pub deleted: u64,
    pub orphans_deleted: u64,
}

/// Periodic cleanup driver for the jobs table.
pub struct QueueCleanupSupervisor {
    pool: PgPool,
    config: CleanupConfig,
    main_ticks: AtomicU64,
}

impl QueueCleanupSupervisor {
    pub fn new(pool: PgPool, config: CleanupConfig) -> Self {
        Self {
            pool,
            config,
            main_ticks: AtomicU64::new(0),
        }
    }

    /// Main cleanup tick: tier selection, retention, and (every second tick)
    /// the orphan sweep.
    pub async fn run_main_tick(&self) -> Result<CleanupReport> {
        let total_jobs = Job::count_all(&self.pool).await?;
        let tracked_keys = Job::count_tracked_keys(&self.pool).await?;

        for queue in &self.config.registered_queues {
            let counts = Job::counts_for_queue(queue, &self.pool).await?;
            debug!(
                queue = %queue,
                waiting = counts.waiting,
                active = counts.active,
                completed = counts.completed,
                failed = counts.failed,
                delayed = counts.delayed,
                "queue depth"
            );
        }

        let tier = if tracked_keys > FORCED_SWEEP_KEYS {
            warn!(tracked_keys, "tracked key ceiling exceeded, forcing comprehensive cleanup");
            CleanupTier::Comprehensive
        } else {
            if tracked_keys > SOFT_KEY_ALARM {
                warn!(tracked_keys, "tracked key count above soft alarm");
            }
            CleanupTier::select(total_jobs)
        };

        let mut deleted = 0;
        if let Some(age) = tier.max_age() {
            deleted += Job::delete_finished_older_than(age, &self.pool).await?;
            for retention in &self.config.retention {
                deleted += Job::enforce_retention(
                    retention.queue,
                    retention.keep_completed,
                    retention.keep_failed,
                    &self.pool,
                )
                .await?;
            }
        }

        let ticks = self.main_ticks.fetch_add(1, Ordering::SeqCst) + 1;
        let orphans_deleted = if ticks % 2 == 0 {
            Job::delete_orphaned(&self.config.registered_queues, &self.pool).await?
        } else {
            0
        };

        let report = CleanupReport {
            tier,
            total_jobs,
            tracked_keys,
            deleted,
            orphans_deleted,
        };

        if deleted > 0 || orphans_deleted > 0 {
            info!(
                tier = tier.as_str(),
                total_jobs,
                deleted,
                orphans_deleted,
                "queue cleanup tick"
            );
        } else {
            debug!(tier = tier.as_str(), total_jobs, "queue cleanup tick (nothing to do)");
        }

        Ok(report)
    }

    /// Worker-queue retention tick: enforce the per-queue keep budgets.
    pub async fn run_retention_tick(&self) -> Result<u64> {
        let mut deleted = 0;
        for retention in &self.config.retention {
            deleted += Job::enforce_retention(
                retention.queue,
                retention.keep_completed,
                retention.keep_failed,
                &self.pool,
            )
            .await?;
        }

        if deleted > 0 {
            debug!(deleted, "worker queue retention enforced");
        }
        Ok(deleted)
    }

    /// High-frequency tick: normal-age cleanup only when the table is busy.
    pub async fn run_high_freq_tick(&self) -> Result<CleanupReport> {
        let total_jobs = Job::count_all(&self.pool).await?;
        let tracked_keys = Job::count_tracked_keys(&self.pool).await?;

        let (tier, deleted) = if total_jobs > 200 {
            let age = CleanupTier::Normal
                .max_age()
                .expect("normal tier always has an age");
            let deleted = Job::delete_finished_older_than(age, &self.pool).await?;
            (CleanupTier::Normal, deleted)
        } else {
            (CleanupTier::Skip, 0)
        };

        Ok(CleanupReport {
            tier,
            total_jobs,
            tracked_keys,
            deleted,
            orphans_deleted: 0,
        })
    }
}
