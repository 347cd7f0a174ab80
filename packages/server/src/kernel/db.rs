//! Database pool construction, transient-error retry, and health checking.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::warn;

use crate::config::Config;

/// Build the shared connection pool from configuration.
///
/// The pool ceiling is raised to cover worker concurrency so job workers can
/// never starve the periodic drivers of connections.
pub async fn init_pool(config: &Config) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .min_connections(config.pool_min)
        .max_connections(config.effective_pool_max())
        .acquire_timeout(Duration::from_secs(config.connection_timeout_sec))
        .idle_timeout(Duration::from_secs(config.idle_timeout_sec))
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    Ok(pool)
}

/// Whether a sqlx error is worth retrying on a fresh connection.
///
/// Covers dropped connections, pool exhaustion under reconnect, and
/// prepared-statement reuse conflicts after a server-side restart.
pub fn is_transient(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => true,
        sqlx::Error::Protocol(message) => message.contains("prepared statement"),
        sqlx::Error::Database(db) => {
            let message = db.message();
            message.contains("prepared statement")
                || message.contains("connection reset")
                || message.contains("terminating connection")
                // SQLSTATE class 08: connection exceptions
                || db.code().map(|code| code.starts_with("08")).unwrap_or(false)
        }
        _ => false,
    }
}

/// Whether an error chain bottoms out in a transient sqlx error.
pub fn is_transient_chain(error: &anyhow::Error) -> bool {
    error
        .chain()
        .filter_map(|cause| cause.downcast_ref::<sqlx::Error>())
        .any(is_transient)
}

/// Run `op`, retrying transient database failures with exponential backoff.
///
/// Each retry acquires a fresh connection from the pool, which drops any
/// broken one picked up by the previous attempt.
pub async fn execute_with_retry<T, F, Fut>(op: F, max_attempts: u32) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if is_transient_chain(&e) && attempt < max_attempts => {
                let delay = Duration::from_millis(100 * 2u64.pow(attempt - 1));
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient database error, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Tracks the most recent successful health probe.
pub struct DbHealth {
    last_check_at: Mutex<Option<DateTime<Utc>>>,
}

impl DbHealth {
    pub fn new() -> Self {
        Self {
            last_check_at: Mutex::new(None),
        }
    }

    /// Probe the database; on success the check timestamp advances.
    pub async fn check(&self, pool: &PgPool) -> Result<DateTime<Utc>> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(pool)
            .await
            .context("database health check failed")?;

        let now = Utc::now();
        let mut last = self.last_check_at.lock().expect("health lock poisoned");
        *last = Some(now);
        Ok(now)
    }

    pub fn last_check_at(&self) -> Option<DateTime<Utc>> {
        *self.last_check_at.lock().expect("health lock poisoned")
    }
}

impl Default for DbHealth {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn io_errors_are_transient() {
        let error = sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ));
        assert!(is_transient(&error));
        assert!(is_transient(&sqlx::Error::PoolTimedOut));
        assert!(!is_transient(&sqlx::Error::RowNotFound));
    }

    #[tokio::test]
    async fn retry_stops_after_success() {
        let calls = AtomicU32::new(0);
        let result = execute_with_retry(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(anyhow::Error::from(sqlx::Error::PoolTimedOut))
                    } else {
                        Ok(7)
                    }
                }
            },
            3,
        )
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retry_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<i32> = execute_with_retry(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(anyhow::Error::from(sqlx::Error::PoolTimedOut)) }
            },
            3,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_transient_errors_fail_fast() {
        let calls = AtomicU32::new(0);
        let result: Result<i32> = execute_with_retry(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(anyhow::anyhow!("constraint violated")) }
            },
            3,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn transient_chain_sees_through_context() {
        let wrapped = anyhow::Error::from(sqlx::Error::PoolTimedOut).context("upserting battle");
        assert!(is_transient_chain(&wrapped));

        let plain = anyhow::anyhow!("some business error");
        assert!(!is_transient_chain(&plain));
    }
}
