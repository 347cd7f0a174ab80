// Service runtime assembly

use std::sync::Arc;

use anyhow::Result;
use sqlx::PgPool;

use crate::config::Config;
use crate::domains::battles::jobs::{
    CrawlBattlesHandler, CrawlBattlesJob, FetchKillsHandler, FetchKillsJob, NotifyBattleHandler,
    NotifyBattleJob,
};
use crate::domains::ratings::jobs::{CalculateMmrHandler, CalculateMmrJob};
use crate::kernel::jobs::{JobWorker, JobWorkerConfig, PostgresJobQueue};
use crate::kernel::rate_limit::RateLimitObserver;
use crate::kernel::{AlbionApiClient, NoopNotifier, ServerKernel, ServiceHost};

/// Wire up the kernel from configuration and a connected pool.
pub fn build_kernel(config: Config, pool: PgPool) -> Result<Arc<ServerKernel>> {
    let rate_limit = Arc::new(RateLimitObserver::new(
        config.rate_limit_window,
        config.rate_limit_threshold,
    ));
    let api = Arc::new(AlbionApiClient::new(
        config.api_base_url.clone(),
        rate_limit.clone(),
    )?);
    let job_queue = Arc::new(PostgresJobQueue::new(pool.clone()));

    Ok(Arc::new(ServerKernel::new(
        pool,
        api,
        Arc::new(NoopNotifier),
        job_queue,
        rate_limit,
        config,
    )))
}

/// One job worker per logical queue, under a single service host.
pub fn build_workers(kernel: Arc<ServerKernel>) -> ServiceHost {
    let config = &kernel.config;

    let crawl_worker = JobWorker::new(
        kernel.clone(),
        Arc::new(CrawlBattlesHandler::new(kernel.clone())),
        JobWorkerConfig::new(CrawlBattlesJob::QUEUE, 1),
    );
    let kills_worker = JobWorker::new(
        kernel.clone(),
        Arc::new(FetchKillsHandler),
        JobWorkerConfig::new(FetchKillsJob::QUEUE, config.kills_worker_concurrency),
    );
    let mmr_worker = JobWorker::new(
        kernel.clone(),
        Arc::new(CalculateMmrHandler),
        JobWorkerConfig::new(CalculateMmrJob::QUEUE, config.mmr_worker_concurrency),
    );
    let notify_worker = JobWorker::new(
        kernel.clone(),
        Arc::new(NotifyBattleHandler::new()),
        JobWorkerConfig::new(NotifyBattleJob::QUEUE, 2),
    );

    ServiceHost::new()
        .with_service(crawl_worker)
        .with_service(kills_worker)
        .with_service(mmr_worker)
        .with_service(notify_worker)
}
