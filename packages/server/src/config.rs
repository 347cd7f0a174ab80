use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub api_base_url: String,

    // Crawler
    pub crawl_interval_sec: u64,
    pub max_pages_per_crawl: u32,
    pub soft_lookback_min: i64,

    // Gap recovery
    pub gap_recovery_interval_sec: u64,
    pub gap_recovery_pages: u32,
    pub nightly_sweep_pages: u32,
    pub nightly_sweep_lookback_h: i64,
    pub nightly_sweep_sleep_ms: u64,
    pub deep_sweep_hour_utc: u32,

    // Kills worker
    pub kills_worker_concurrency: usize,
    pub debounce_kills_min: i64,
    pub recheck_done_battle_hours: i64,

    // MMR worker
    pub mmr_worker_concurrency: usize,

    // Queue cleanup
    pub queue_cleanup_interval_min: u64,
    pub queue_high_freq_cleanup_interval_min: u64,
    pub queue_worker_cleanup_interval_min: u64,

    // Database pool
    pub pool_min: u32,
    pub pool_max: u32,
    pub connection_timeout_sec: u64,
    pub idle_timeout_sec: u64,

    // Rate limiting (upstream API)
    pub rate_limit_threshold: f64,
    pub rate_limit_window: usize,

    // MMR admission thresholds
    pub mmr_min_players: u32,
    pub mmr_min_fame: i64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            api_base_url: env::var("API_BASE_URL")
                .unwrap_or_else(|_| "https://gameinfo.albiononline.com/api/gameinfo".to_string()),

            crawl_interval_sec: parse_env("CRAWL_INTERVAL_SEC", 30)?,
            max_pages_per_crawl: parse_env("MAX_PAGES_PER_CRAWL", 10)?,
            soft_lookback_min: parse_env("SOFT_LOOKBACK_MIN", 15)?,

            gap_recovery_interval_sec: parse_env("GAP_RECOVERY_INTERVAL_SEC", 300)?,
            gap_recovery_pages: parse_env("GAP_RECOVERY_PAGES", 5)?,
            nightly_sweep_pages: parse_env("NIGHTLY_SWEEP_PAGES", 200)?,
            nightly_sweep_lookback_h: parse_env("NIGHTLY_SWEEP_LOOKBACK_H", 48)?,
            nightly_sweep_sleep_ms: parse_env("NIGHTLY_SWEEP_SLEEP_MS", 500)?,
            deep_sweep_hour_utc: parse_env("DEEP_SWEEP_HOUR_UTC", 3)?,

            kills_worker_concurrency: parse_env("KILLS_WORKER_CONCURRENCY", 4)?,
            debounce_kills_min: parse_env("DEBOUNCE_KILLS_MIN", 10)?,
            recheck_done_battle_hours: parse_env("RECHECK_DONE_BATTLE_HOURS", 6)?,

            mmr_worker_concurrency: parse_env("MMR_WORKER_CONCURRENCY", 5)?,

            queue_cleanup_interval_min: parse_env("QUEUE_CLEANUP_INTERVAL_MIN", 30)?,
            queue_high_freq_cleanup_interval_min: parse_env(
                "QUEUE_HIGH_FREQ_CLEANUP_INTERVAL_MIN",
                5,
            )?,
            queue_worker_cleanup_interval_min: parse_env("QUEUE_WORKER_CLEANUP_INTERVAL_MIN", 60)?,

            pool_min: parse_env("POOL_MIN", 2)?,
            pool_max: parse_env("POOL_MAX", 10)?,
            connection_timeout_sec: parse_env("CONNECTION_TIMEOUT", 10)?,
            idle_timeout_sec: parse_env("IDLE_TIMEOUT", 600)?,

            rate_limit_threshold: parse_env("RATE_LIMIT_THRESHOLD", 0.1)?,
            rate_limit_window: parse_env("RATE_LIMIT_WINDOW", 100)?,

            mmr_min_players: parse_env("MMR_MIN_PLAYERS", 25)?,
            mmr_min_fame: parse_env("MMR_MIN_FAME", 100_000)?,
        })
    }

    /// Effective DB pool ceiling: the configured max, but never smaller than
    /// twice the combined worker concurrency.
    pub fn effective_pool_max(&self) -> u32 {
        let worker_floor = ((self.kills_worker_concurrency + self.mmr_worker_concurrency) * 2) as u32;
        self.pool_max.max(worker_floor)
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("{} is invalid: {}", key, e)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_env_falls_back_to_default() {
        let value: u64 = parse_env("BATTLEWATCH_TEST_UNSET_VAR", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn effective_pool_max_respects_worker_concurrency() {
        let mut config = sample_config();
        config.pool_max = 4;
        config.kills_worker_concurrency = 8;
        config.mmr_worker_concurrency = 5;
        assert_eq!(config.effective_pool_max(), 26);

        config.pool_max = 40;
        assert_eq!(config.effective_pool_max(), 40);
    }

    fn sample_config() -> Config {
        Config {
            database_url: "postgres://localhost/test".to_string(),
            api_base_url: "http://localhost".to_string(),
            crawl_interval_sec: 30,
            max_pages_per_crawl: 10,
            soft_lookback_min: 15,
            gap_recovery_interval_sec: 300,
            gap_recovery_pages: 5,
            nightly_sweep_pages: 200,
            nightly_sweep_lookback_h: 48,
            nightly_sweep_sleep_ms: 500,
            deep_sweep_hour_utc: 3,
            kills_worker_concurrency: 4,
            debounce_kills_min: 10,
            recheck_done_battle_hours: 6,
            mmr_worker_concurrency: 5,
            queue_cleanup_interval_min: 30,
            queue_high_freq_cleanup_interval_min: 5,
            queue_worker_cleanup_interval_min: 60,
            pool_min: 2,
            pool_max: 10,
            connection_timeout_sec: 10,
            idle_timeout_sec: 600,
            rate_limit_threshold: 0.1,
            rate_limit_window: 100,
            mmr_min_players: 25,
            mmr_min_fame: 100_000,
        }
    }
}
