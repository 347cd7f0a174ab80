//! Scheduled background tasks using tokio-cron-scheduler.
//!
//! This module wires up the periodic drivers of the ingestion pipeline:
//! - Battle crawl tick (sliding window)
//! - Rolling gap-recovery sweep
//! - Daily deep gap-recovery sweep
//! - Queue cleanup (main and high-frequency ticks)
//! - Database health probe
//!
//! # Architecture
//!
//! Each driver runs one invocation at a time: a tick that fires while the
//! previous invocation is still running is skipped. Drivers enqueue jobs and
//! advance watermarks; the actual per-battle work happens in the job workers.
//!
//! ```text
//! Scheduler (every crawl_interval_sec)
//!     │
//!     └─► Crawler.run_crawl_pass()
//!             └─► battle upserts → kills-fetch / battle-notify jobs
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info};

use crate::domains::battles::jobs::{CrawlBattlesJob, FetchKillsJob, NotifyBattleJob};
use crate::domains::battles::GapRecovery;
use crate::domains::ratings::jobs::CalculateMmrJob;
use crate::kernel::jobs::{CleanupConfig, QueueCleanupSupervisor, QueueRetention};
use crate::kernel::ServerKernel;

/// Queues the cleanup supervisor recognizes; rows outside these are orphans.
pub fn registered_queues() -> Vec<String> {
    vec![
        CrawlBattlesJob::QUEUE.to_string(),
        FetchKillsJob::QUEUE.to_string(),
        CalculateMmrJob::QUEUE.to_string(),
        NotifyBattleJob::QUEUE.to_string(),
    ]
}

fn retention_budgets() -> Vec<QueueRetention> {
    vec![
        QueueRetention {
            queue: CrawlBattlesJob::QUEUE,
            keep_completed: 10,
            keep_failed: 10,
        },
        QueueRetention {
            queue: FetchKillsJob::QUEUE,
            keep_completed: 50,
            keep_failed: 25,
        },
        QueueRetention {
            queue: CalculateMmrJob::QUEUE,
            keep_completed: 50,
            keep_failed: 25,
        },
        QueueRetention {
            queue: NotifyBattleJob::QUEUE,
            keep_completed: 50,
            keep_failed: 25,
        },
    ]
}

/// Start all scheduled tasks
pub async fn start_scheduler(kernel: Arc<ServerKernel>) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;
    let config = kernel.config.clone();

    // Battle crawl tick - enqueue a pass; queue dedup collapses overlapping
    // ticks onto the one live `battle-crawl` job
    let crawl_kernel = kernel.clone();
    let crawl_job = Job::new_repeated_async(
        Duration::from_secs(config.crawl_interval_sec),
        move |_uuid, _lock| {
            let kernel = crawl_kernel.clone();
            Box::pin(async move {
                match kernel.job_queue.enqueue(CrawlBattlesJob).await {
                    Ok(result) if !result.is_created() => {
                        debug!("previous crawl pass still running, skipping tick");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!("Failed to enqueue crawl pass: {}", e),
                }
            })
        },
    )?;
    scheduler.add(crawl_job).await?;

    // Rolling gap recovery
    let rolling = Arc::new(GapRecovery::new(kernel.clone()));
    let rolling_lock = Arc::new(Mutex::new(()));
    let rolling_job = Job::new_repeated_async(
        Duration::from_secs(config.gap_recovery_interval_sec),
        move |_uuid, _lock| {
            let sweeper = rolling.clone();
            let guard = rolling_lock.clone();
            Box::pin(async move {
                let Ok(_running) = guard.try_lock() else {
                    debug!("previous rolling sweep still running, skipping tick");
                    return;
                };
                if let Err(e) = sweeper.run_rolling_sweep().await {
                    tracing::error!("Rolling gap-recovery sweep failed: {}", e);
                }
            })
        },
    )?;
    scheduler.add(rolling_job).await?;

    // Daily deep sweep at a fixed UTC hour
    let deep = Arc::new(GapRecovery::new(kernel.clone()));
    let deep_lock = Arc::new(Mutex::new(()));
    let deep_schedule = format!("0 0 {} * * *", config.deep_sweep_hour_utc);
    let deep_job = Job::new_async(deep_schedule.as_str(), move |_uuid, _lock| {
        let sweeper = deep.clone();
        let guard = deep_lock.clone();
        Box::pin(async move {
            let Ok(_running) = guard.try_lock() else {
                debug!("previous deep sweep still running, skipping tick");
                return;
            };
            if let Err(e) = sweeper.run_deep_sweep().await {
                tracing::error!("Deep gap-recovery sweep failed: {}", e);
            }
        })
    })?;
    scheduler.add(deep_job).await?;

    // Queue cleanup - main tick
    let supervisor = Arc::new(QueueCleanupSupervisor::new(
        kernel.db_pool.clone(),
        CleanupConfig {
            registered_queues: registered_queues(),
            retention: retention_budgets(),
        },
    ));
    let main_supervisor = supervisor.clone();
    let cleanup_job = Job::new_repeated_async(
        Duration::from_secs(config.queue_cleanup_interval_min * 60),
        move |_uuid, _lock| {
            let supervisor = main_supervisor.clone();
            Box::pin(async move {
                if let Err(e) = supervisor.run_main_tick().await {
                    tracing::error!("Queue cleanup tick failed: {}", e);
                }
            })
        },
    )?;
    scheduler.add(cleanup_job).await?;

    // Worker queue retention tick
    let retention_supervisor = supervisor.clone();
    let retention_job = Job::new_repeated_async(
        Duration::from_secs(config.queue_worker_cleanup_interval_min * 60),
        move |_uuid, _lock| {
            let supervisor = retention_supervisor.clone();
            Box::pin(async move {
                if let Err(e) = supervisor.run_retention_tick().await {
                    tracing::error!("Queue retention tick failed: {}", e);
                }
            })
        },
    )?;
    scheduler.add(retention_job).await?;

    // Queue cleanup - high-frequency tick
    let high_freq_supervisor = supervisor.clone();
    let high_freq_job = Job::new_repeated_async(
        Duration::from_secs(config.queue_high_freq_cleanup_interval_min * 60),
        move |_uuid, _lock| {
            let supervisor = high_freq_supervisor.clone();
            Box::pin(async move {
                if let Err(e) = supervisor.run_high_freq_tick().await {
                    tracing::error!("High-frequency cleanup tick failed: {}", e);
                }
            })
        },
    )?;
    scheduler.add(high_freq_job).await?;

    // Database health probe
    let health_kernel = kernel.clone();
    let health_job = Job::new_repeated_async(Duration::from_secs(60), move |_uuid, _lock| {
        let kernel = health_kernel.clone();
        Box::pin(async move {
            match kernel.db_health.check(&kernel.db_pool).await {
                Ok(at) => debug!(last_check_at = %at, "database health check ok"),
                Err(e) => error!("Database health check failed: {}", e),
            }
        })
    })?;
    scheduler.add(health_job).await?;

    scheduler.start().await?;

    info!(
        crawl_interval_sec = config.crawl_interval_sec,
        gap_recovery_interval_sec = config.gap_recovery_interval_sec,
        deep_sweep_hour_utc = config.deep_sweep_hour_utc,
        "Scheduled tasks started"
    );
    Ok(scheduler)
}
