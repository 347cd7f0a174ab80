//! Job worker service for processing background commands.
//!
//! The `JobWorker` is a long-running service that:
//! - Polls the database for ready jobs on one logical queue
//! - Hands each claimed job to the queue's [`JobHandler`]
//! - Handles retries and dead-lettering through the queue
//! - Provides heartbeats for long-running jobs
//!
//! # Architecture
//!
//! ```text
//! JobWorker (one per logical queue)
//!     │
//!     ├─► Claim up to `concurrency` jobs (FOR UPDATE SKIP LOCKED)
//!     ├─► Handler.execute(job, kernel) for each, concurrently
//!     └─► Mark succeeded / failed (retry with backoff or dead-letter)
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::job::ErrorKind;
use super::queue::ClaimedJob;
use crate::kernel::service_host::Service;
use crate::kernel::ServerKernel;

/// Configuration for the job worker.
#[derive(Debug, Clone)]
pub struct JobWorkerConfig {
    /// Logical queue to consume
    pub queue: &'static str,
    /// Jobs processed concurrently (also the claim batch size)
    pub concurrency: usize,
    /// How long to wait when no jobs are available
    pub poll_interval: Duration,
    /// How often to send heartbeats for running jobs
    pub heartbeat_interval: Duration,
    /// Worker ID for this instance
    pub worker_id: String,
}

impl JobWorkerConfig {
    pub fn new(queue: &'static str, concurrency: usize) -> Self {
        Self {
            queue,
            concurrency: concurrency.max(1),
            poll_interval: Duration::from_secs(2),
            heartbeat_interval: Duration::from_secs(30),
            worker_id: format!("{}-worker-{}", queue, Uuid::new_v4()),
        }
    }
}

/// Handler for claimed jobs of one queue.
#[async_trait::async_trait]
pub trait JobHandler: Send + Sync {
    async fn execute(&self, job: &ClaimedJob, kernel: &Arc<ServerKernel>) -> Result<()>;
}

/// A job worker that processes commands from one logical queue.
pub struct JobWorker {
    kernel: Arc<ServerKernel>,
    handler: Arc<dyn JobHandler>,
    config: JobWorkerConfig,
    /// Track running jobs for cancellation
    running_jobs: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
}

impl JobWorker {
    pub fn new(
        kernel: Arc<ServerKernel>,
        handler: Arc<dyn JobHandler>,
        config: JobWorkerConfig,
    ) -> Self {
        Self {
            kernel,
            handler,
            config,
            running_jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Process a single claimed job.
    async fn process_job(&self, job: ClaimedJob, shutdown: &CancellationToken) {
        let job_id = job.id;
        let queue = self.config.queue;

        let job_cancel = shutdown.child_token();
        {
            let mut running = self.running_jobs.write().await;
            running.insert(job_id, job_cancel.clone());
        }

        let result = self.execute_with_heartbeat(&job, job_cancel.clone()).await;

        match result {
            Ok(()) => {
                debug!(job_id = %job_id, queue, "job succeeded");
                if let Err(e) = self.kernel.job_queue.mark_succeeded(job_id).await {
                    error!(job_id = %job_id, error = %e, "failed to mark job as succeeded");
                }
            }
            Err(e) => {
                let kind = if shutdown.is_cancelled() {
                    ErrorKind::Shutdown
                } else if e.downcast_ref::<serde_json::Error>().is_some() {
                    // Bad payloads never fix themselves
                    ErrorKind::NonRetryable
                } else {
                    ErrorKind::Retryable
                };
                warn!(job_id = %job_id, queue, error = %e, "job failed");
                if let Err(e) = self
                    .kernel
                    .job_queue
                    .mark_failed(job_id, &e.to_string(), kind)
                    .await
                {
                    error!(job_id = %job_id, error = %e, "failed to mark job as failed");
                }
            }
        }

        self.running_jobs.write().await.remove(&job_id);
    }

    /// Execute the handler with periodic lease heartbeats.
    async fn execute_with_heartbeat(
        &self,
        job: &ClaimedJob,
        cancel: CancellationToken,
    ) -> Result<()> {
        let queue = self.kernel.job_queue.clone();
        let heartbeat_interval = self.config.heartbeat_interval;
        let job_id = job.id;

        let heartbeat_cancel = cancel.clone();
        let heartbeat_handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(heartbeat_interval);
            interval.tick().await; // Skip first immediate tick

            loop {
                tokio::select! {
                    _ = heartbeat_cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = queue.heartbeat(job_id).await {
                            warn!(job_id = %job_id, error = %e, "heartbeat failed");
                        }
                    }
                }
            }
        });

        let result = self.handler.execute(job, &self.kernel).await;

        cancel.cancel();
        let _ = heartbeat_handle.await;

        result
    }
}

#[async_trait::async_trait]
impl Service for JobWorker {
    fn name(&self) -> &'static str {
        self.config.queue
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()> {
        info!(
            worker_id = %self.config.worker_id,
            queue = self.config.queue,
            concurrency = self.config.concurrency,
            "job worker starting"
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let jobs = match self
                .kernel
                .job_queue
                .claim(
                    self.config.queue,
                    &self.config.worker_id,
                    self.config.concurrency as i64,
                )
                .await
            {
                Ok(jobs) => jobs,
                Err(e) => {
                    error!(queue = self.config.queue, error = %e, "failed to claim jobs");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            if jobs.is_empty() {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
                continue;
            }

            debug!(queue = self.config.queue, count = jobs.len(), "claimed jobs");

            let mut handles = Vec::with_capacity(jobs.len());
            for job in jobs {
                let worker = &self;
                let shutdown_ref = &shutdown;
                handles.push(async move {
                    worker.process_job(job, shutdown_ref).await;
                });
            }

            futures::future::join_all(handles).await;
        }

        // Wait for any running jobs to complete
        let running_count = self.running_jobs.read().await.len();
        if running_count > 0 {
            info!(count = running_count, "waiting for running jobs to complete");

            {
                let running = self.running_jobs.read().await;
                for token in running.values() {
                    token.cancel();
                }
            }

            let timeout = Duration::from_secs(30);
            let start = std::time::Instant::now();
            while !self.running_jobs.read().await.is_empty() && start.elapsed() < timeout {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }

        info!(worker_id = %self.config.worker_id, "job worker stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = JobWorkerConfig::new("kills-fetch", 4);
        assert_eq!(config.queue, "kills-fetch");
        assert_eq!(config.concurrency, 4);
        assert!(config.worker_id.starts_with("kills-fetch-worker-"));
    }

    #[test]
    fn test_config_concurrency_floor() {
        let config = JobWorkerConfig::new("mmr-calc", 0);
        assert_eq!(config.concurrency, 1);
    }
}
