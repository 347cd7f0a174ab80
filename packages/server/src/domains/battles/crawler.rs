//! Sliding-window battle crawler.
//!
//! Each pass walks the paginated battle listing newest-first, upserts what it
//! sees, decides per battle whether a kills fetch is due, and advances the
//! ingestion watermark. The pass stops early on an empty page or once a whole
//! page is older than the soft cutoff - older pages only get older.
//!
//! A cooperative slowdown wraps the pass: when the rate-limit observer trips,
//! the crawler blocks for a fixed period before touching the upstream again.
//! Workers are unaffected.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::domains::battles::jobs::{FetchKillsJob, NotifyBattleJob};
use crate::domains::battles::models::{advance_watermark, Battle};
use crate::kernel::albion_client::{ApiError, BattleSummary};
use crate::kernel::traits::BattleApi;
use crate::kernel::ServerKernel;

/// Minimum participant count requested from the listing endpoint.
pub const LIST_MIN_PLAYERS: u32 = 10;

/// Fixed length of a rate-limit slowdown period.
pub const SLOWDOWN_SECS: i64 = 120;

/// Outcome of the per-battle kills-enqueue policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillsFetchDecision {
    /// Kills were never fetched, or the fight may still be ongoing
    Enqueue,
    /// Battle is old enough to be considered complete
    SkipDone,
    /// Fetched recently, debounce window still open
    SkipDebounced,
}

/// Decide whether a battle needs a kills fetch.
pub fn kills_fetch_decision(
    now: DateTime<Utc>,
    started_at: DateTime<Utc>,
    kills_fetched_at: Option<DateTime<Utc>>,
    debounce_kills_min: i64,
    recheck_done_battle_hours: i64,
) -> KillsFetchDecision {
    let fetched_at = match kills_fetched_at {
        None => return KillsFetchDecision::Enqueue,
        Some(fetched_at) => fetched_at,
    };

    if now - started_at >= Duration::hours(recheck_done_battle_hours) {
        return KillsFetchDecision::SkipDone;
    }

    if now - fetched_at >= Duration::minutes(debounce_kills_min) {
        return KillsFetchDecision::Enqueue;
    }

    KillsFetchDecision::SkipDebounced
}

/// What one crawl pass did.
#[derive(Debug, Default, Clone, Copy)]
pub struct CrawlOutcome {
    pub pages_scanned: u32,
    pub battles_seen: usize,
    pub battles_created: usize,
    pub kills_enqueued: usize,
    pub notifications_enqueued: usize,
}

/// Listing pages gathered by one sliding-window walk.
#[derive(Debug, Clone)]
pub struct CrawlWindow {
    pub pages: Vec<Vec<BattleSummary>>,
    pub pages_scanned: u32,
    /// True when the walk stopped because the window was covered (empty page
    /// or a page entirely older than the cutoff), false on the page ceiling.
    pub window_completed: bool,
    pub max_started_at_seen: Option<DateTime<Utc>>,
}

/// Walk the paginated listing newest-first until the window is covered.
///
/// Stops on an empty page, on a page whose battles are all older than
/// `soft_cutoff`, or on the page ceiling. No persistence happens here.
pub async fn fetch_window(
    api: &dyn BattleApi,
    max_pages: u32,
    soft_cutoff: DateTime<Utc>,
) -> Result<CrawlWindow, ApiError> {
    let mut window = CrawlWindow {
        pages: Vec::new(),
        pages_scanned: 0,
        window_completed: false,
        max_started_at_seen: None,
    };

    for page in 0..max_pages {
        let battles = api.list_battles(page, LIST_MIN_PLAYERS).await?;
        window.pages_scanned += 1;

        if battles.is_empty() {
            debug!(page, "empty listing page, stopping crawl");
            window.window_completed = true;
            break;
        }

        let mut page_entirely_older = true;
        for summary in &battles {
            window.max_started_at_seen = Some(match window.max_started_at_seen {
                None => summary.start_time,
                Some(seen) => seen.max(summary.start_time),
            });
            if summary.start_time >= soft_cutoff {
                page_entirely_older = false;
            }
        }
        window.pages.push(battles);

        if page_entirely_older {
            debug!(page, "page entirely older than soft cutoff, stopping crawl");
            window.window_completed = true;
            break;
        }
    }

    Ok(window)
}

/// Horizon the watermark may advance to after a pass.
///
/// A completed window means everything newer than the soft cutoff has been
/// seen, so coverage extends to `now`. An aborted pass only covers up to the
/// newest battle actually observed.
pub fn watermark_candidate(window: &CrawlWindow, now: DateTime<Utc>) -> DateTime<Utc> {
    if window.window_completed {
        now
    } else {
        window.max_started_at_seen.unwrap_or(now)
    }
}

pub struct Crawler {
    kernel: Arc<ServerKernel>,
    slowdown_until: Mutex<Option<DateTime<Utc>>>,
}

impl Crawler {
    pub fn new(kernel: Arc<ServerKernel>) -> Self {
        Self {
            kernel,
            slowdown_until: Mutex::new(None),
        }
    }

    /// Run one sliding-window crawl pass.
    pub async fn run_crawl_pass(&self) -> Result<CrawlOutcome> {
        self.apply_slowdown().await;

        let config = &self.kernel.config;
        let pool = &self.kernel.db_pool;
        let soft_lookback = Duration::minutes(config.soft_lookback_min);
        let now = Utc::now();
        let soft_cutoff = now - soft_lookback;

        let window = fetch_window(
            self.kernel.api.as_ref(),
            config.max_pages_per_crawl,
            soft_cutoff,
        )
        .await?;

        let mut outcome = CrawlOutcome {
            pages_scanned: window.pages_scanned,
            ..Default::default()
        };

        for battles in &window.pages {
            for summary in battles {
                let (battle, created) = Battle::upsert(summary, pool).await?;
                outcome.battles_seen += 1;
                if created {
                    outcome.battles_created += 1;
                }

                let decision = kills_fetch_decision(
                    now,
                    battle.started_at,
                    battle.kills_fetched_at,
                    config.debounce_kills_min,
                    config.recheck_done_battle_hours,
                );
                if decision == KillsFetchDecision::Enqueue {
                    let result = self
                        .kernel
                        .job_queue
                        .enqueue(FetchKillsJob::new(battle.albion_id))
                        .await?;
                    if result.is_created() {
                        outcome.kills_enqueued += 1;
                    }
                }

                if created {
                    let result = self
                        .kernel
                        .job_queue
                        .enqueue(NotifyBattleJob::new(battle.albion_id))
                        .await?;
                    if result.is_created() {
                        outcome.notifications_enqueued += 1;
                    }
                }
            }
        }

        let candidate = watermark_candidate(&window, now);
        let stored = advance_watermark(candidate, soft_lookback, pool).await?;
        debug!(watermark = %stored, "watermark advanced");

        info!(
            pages = outcome.pages_scanned,
            battles = outcome.battles_seen,
            created = outcome.battles_created,
            kills_enqueued = outcome.kills_enqueued,
            "crawl pass complete"
        );

        Ok(outcome)
    }

    /// Rate-limit slowdown state machine.
    ///
    /// Entering SLOWDOWN arms a fixed timer; while the timer runs, every
    /// crawl pass first blocks for the slowdown period. The state exits by
    /// itself once the timer lapses.
    async fn apply_slowdown(&self) {
        let now = Utc::now();
        let mut wait = false;

        {
            let mut until = self.slowdown_until.lock().unwrap();
            match *until {
                Some(t) if now < t => wait = true,
                Some(_) => {
                    info!("rate-limit slowdown expired, resuming normal crawl pace");
                    *until = None;
                }
                None => {}
            }

            if until.is_none() && self.kernel.rate_limit.should_slow_down() {
                let stats = self.kernel.rate_limit.stats();
                warn!(
                    ratio = stats.ratio,
                    rate_limited = stats.rate_limited,
                    total = stats.total,
                    "upstream rate limiting detected, entering slowdown"
                );
                *until = Some(now + Duration::seconds(SLOWDOWN_SECS));
                wait = true;
            }
        }

        if wait {
            tokio::time::sleep(std::time::Duration::from_secs(SLOWDOWN_SECS as u64)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 1, hour, minute, 0).unwrap()
    }

    #[test]
    fn never_fetched_battles_are_enqueued() {
        let now = at(12, 0);
        assert_eq!(
            kills_fetch_decision(now, at(11, 0), None, 10, 6),
            KillsFetchDecision::Enqueue
        );
    }

    #[test]
    fn old_fetched_battles_are_done() {
        let now = at(12, 0);
        // Started 7 hours ago, recheck ceiling is 6 hours
        let started = Utc.with_ymd_and_hms(2026, 7, 1, 5, 0, 0).unwrap();
        assert_eq!(
            kills_fetch_decision(now, started, Some(at(6, 0)), 10, 6),
            KillsFetchDecision::SkipDone
        );
    }

    #[test]
    fn recent_fights_get_rechecked_after_debounce() {
        let now = at(12, 0);
        let started = at(11, 30);

        // Last fetch 15 minutes ago, debounce is 10 minutes
        assert_eq!(
            kills_fetch_decision(now, started, Some(at(11, 45)), 10, 6),
            KillsFetchDecision::Enqueue
        );

        // Last fetch 5 minutes ago, still debounced
        assert_eq!(
            kills_fetch_decision(now, started, Some(at(11, 55)), 10, 6),
            KillsFetchDecision::SkipDebounced
        );
    }

    #[test]
    fn done_check_takes_precedence_over_debounce() {
        let now = at(12, 0);
        let started = Utc.with_ymd_and_hms(2026, 6, 30, 12, 0, 0).unwrap();
        // A day old battle with a stale fetch stamp stays done
        assert_eq!(
            kills_fetch_decision(now, started, Some(at(1, 0)), 10, 6),
            KillsFetchDecision::SkipDone
        );
    }
}
