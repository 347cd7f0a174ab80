// TestDependencies - mock implementations for testing
//
// Provides mock services that can be injected into ServerKernel for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use crate::domains::battles::models::Battle;
use crate::kernel::albion_client::{ApiError, BattleSummary, GuildSearchResult, KillEventRecord};
use crate::kernel::traits::{BattleApi, BattleNotifier};

// =============================================================================
// Mock upstream API
// =============================================================================

/// Scripted upstream API for tests.
///
/// Pages, kill streams and guild directories are installed up front; every
/// call is counted so tests can assert on crawl behaviour.
pub struct MockBattleApi {
    pages: Mutex<HashMap<u32, Vec<BattleSummary>>>,
    details: Mutex<HashMap<i64, BattleSummary>>,
    kills: Mutex<HashMap<i64, Vec<KillEventRecord>>>,
    guilds: Mutex<Vec<GuildSearchResult>>,
    pub list_calls: AtomicUsize,
    pub kills_calls: AtomicUsize,
}

impl MockBattleApi {
    pub fn new() -> Self {
        Self {
            pages: Mutex::new(HashMap::new()),
            details: Mutex::new(HashMap::new()),
            kills: Mutex::new(HashMap::new()),
            guilds: Mutex::new(Vec::new()),
            list_calls: AtomicUsize::new(0),
            kills_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_page(self, page: u32, battles: Vec<BattleSummary>) -> Self {
        self.pages.lock().unwrap().insert(page, battles);
        self
    }

    pub fn with_kills(self, albion_id: i64, events: Vec<KillEventRecord>) -> Self {
        self.kills.lock().unwrap().insert(albion_id, events);
        self
    }

    pub fn with_detail(self, battle: BattleSummary) -> Self {
        self.details.lock().unwrap().insert(battle.id, battle);
        self
    }

    pub fn with_guild(self, id: &str, name: &str) -> Self {
        self.guilds.lock().unwrap().push(GuildSearchResult {
            id: id.to_string(),
            name: name.to_string(),
        });
        self
    }
}

impl Default for MockBattleApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BattleApi for MockBattleApi {
    async fn list_battles(
        &self,
        page: u32,
        _min_players: u32,
    ) -> Result<Vec<BattleSummary>, ApiError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .pages
            .lock()
            .unwrap()
            .get(&page)
            .cloned()
            .unwrap_or_default())
    }

    async fn battle_detail(&self, albion_id: i64) -> Result<BattleSummary, ApiError> {
        self.details
            .lock()
            .unwrap()
            .get(&albion_id)
            .cloned()
            .ok_or(ApiError::NotFound)
    }

    async fn battle_kills(&self, albion_id: i64) -> Result<Vec<KillEventRecord>, ApiError> {
        self.kills_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .kills
            .lock()
            .unwrap()
            .get(&albion_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn search_guilds(&self, name: &str) -> Result<Vec<GuildSearchResult>, ApiError> {
        let lowered = name.to_lowercase();
        Ok(self
            .guilds
            .lock()
            .unwrap()
            .iter()
            .filter(|guild| guild.name.to_lowercase() == lowered)
            .cloned()
            .collect())
    }
}

// =============================================================================
// Recording notifier
// =============================================================================

/// Notifier that records every announced battle id.
pub struct RecordingNotifier {
    notified: Mutex<Vec<i64>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self {
            notified: Mutex::new(Vec::new()),
        }
    }

    pub fn notified(&self) -> Vec<i64> {
        self.notified.lock().unwrap().clone()
    }
}

impl Default for RecordingNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BattleNotifier for RecordingNotifier {
    async fn notify_battle(&self, battle: &Battle) -> Result<()> {
        self.notified.lock().unwrap().push(battle.albion_id);
        Ok(())
    }
}
