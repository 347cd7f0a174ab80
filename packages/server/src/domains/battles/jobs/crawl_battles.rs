//! CrawlBattlesJob - one sliding-window crawl pass as a queue job.
//!
//! The scheduler enqueues this on every crawl tick under the fixed job id
//! `battle-crawl`; queue dedup guarantees one pass at a time, so a tick that
//! fires while a pass is still running collapses into a no-op.

use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::domains::battles::Crawler;
use crate::kernel::jobs::{ClaimedJob, CommandMeta, JobHandler};
use crate::kernel::ServerKernel;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlBattlesJob;

impl CrawlBattlesJob {
    pub const QUEUE: &'static str = "battle-crawl";
}

impl CommandMeta for CrawlBattlesJob {
    fn queue(&self) -> &'static str {
        Self::QUEUE
    }

    fn idempotency_key(&self) -> Option<String> {
        Some(Self::QUEUE.to_string())
    }

    fn max_retries(&self) -> i32 {
        1
    }
}

/// Consumes `battle-crawl` with concurrency 1.
///
/// The crawler state (rate-limit slowdown timer) lives here so it survives
/// across passes.
pub struct CrawlBattlesHandler {
    crawler: Crawler,
}

impl CrawlBattlesHandler {
    pub fn new(kernel: Arc<ServerKernel>) -> Self {
        Self {
            crawler: Crawler::new(kernel),
        }
    }
}

#[async_trait::async_trait]
impl JobHandler for CrawlBattlesHandler {
    async fn execute(&self, _job: &ClaimedJob, _kernel: &Arc<ServerKernel>) -> Result<()> {
        self.crawler.run_crawl_pass().await?;
        Ok(())
    }
}
