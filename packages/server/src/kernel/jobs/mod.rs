//! Job infrastructure for background command execution.
//!
//! This module provides the kernel-level infrastructure for the durable
//! work queue:
//! - [`PostgresJobQueue`] - Database-backed queue with dedup keys
//! - [`JobWorker`] - Long-running service that claims and executes jobs
//! - [`QueueCleanupSupervisor`] - Tiered cleanup of finished rows
//! - [`Job`] - Job row model
//!
//! # Architecture
//!
//! ```text
//! Producer calls job_queue.enqueue(cmd)
//!     │
//!     └─► Insert job row (idempotency key dedup)
//!
//! JobWorker (one per logical queue)
//!     │
//!     ├─► Claim jobs (FOR UPDATE SKIP LOCKED, lease recovery)
//!     ├─► JobHandler.execute(job, kernel)
//!     └─► Mark succeeded / retry with backoff / dead-letter
//! ```
//!
//! Domain-specific commands and handlers live in their respective domains.
//! This module only provides the infrastructure - business logic stays in
//! domains.

pub mod cleanup;
mod job;
mod queue;
mod worker;

pub use cleanup::{
    CleanupConfig, CleanupReport, CleanupTier, QueueCleanupSupervisor, QueueRetention,
};
pub use job::{ErrorKind, Job, JobPriority, JobStatus, QueueCounts};
pub use queue::{ClaimedJob, CommandMeta, EnqueueResult, PostgresJobQueue};
pub use worker::{JobHandler, JobWorker, JobWorkerConfig};
