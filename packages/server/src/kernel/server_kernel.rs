// ServerKernel - core infrastructure with all dependencies
//
// The ServerKernel holds all server dependencies (database, upstream API,
// queue, notifier) and provides access via traits for testability.

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Config;
use crate::kernel::db::DbHealth;
use crate::kernel::jobs::PostgresJobQueue;
use crate::kernel::rate_limit::RateLimitObserver;
use crate::kernel::traits::{BattleApi, BattleNotifier};

/// ServerKernel holds all server dependencies
pub struct ServerKernel {
    pub db_pool: PgPool,
    pub api: Arc<dyn BattleApi>,
    pub notifier: Arc<dyn BattleNotifier>,
    pub job_queue: Arc<PostgresJobQueue>,
    pub rate_limit: Arc<RateLimitObserver>,
    pub db_health: DbHealth,
    pub config: Config,
}

impl ServerKernel {
    pub fn new(
        db_pool: PgPool,
        api: Arc<dyn BattleApi>,
        notifier: Arc<dyn BattleNotifier>,
        job_queue: Arc<PostgresJobQueue>,
        rate_limit: Arc<RateLimitObserver>,
        config: Config,
    ) -> Self {
        Self {
            db_pool,
            api,
            notifier,
            job_queue,
            rate_limit,
            db_health: DbHealth::new(),
            config,
        }
    }
}
