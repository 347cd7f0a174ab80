//! HTTP client for the upstream game-data API.
//!
//! Wraps the four read endpoints the ingestion pipeline consumes:
//! battle listing, battle detail, kill events, and guild search.
//!
//! Every response observation feeds the shared [`RateLimitObserver`] so the
//! crawler can back off when the upstream starts throttling. Idempotent GETs
//! are retried on network and 5xx failures with exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::common::de_u64_as_i64;
use crate::kernel::rate_limit::RateLimitObserver;
use crate::kernel::traits::BattleApi;

/// Typed failure modes of the upstream API.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("rate limited by upstream")]
    RateLimited,
    #[error("network error: {0}")]
    Network(String),
    #[error("upstream returned status {0}")]
    Upstream(u16),
    #[error("resource not found")]
    NotFound,
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Whether another attempt of the same GET may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::RateLimited | ApiError::Network(_) | ApiError::Upstream(_)
        )
    }
}

// ============================================================================
// Wire records
// ============================================================================

/// Battle summary as returned by the list and detail endpoints.
///
/// The `guilds`/`alliances` payloads are kept opaque: they are a snapshot of
/// the upstream view and are stored as-is.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BattleSummary {
    #[serde(deserialize_with = "de_u64_as_i64")]
    pub id: i64,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub total_fame: i64,
    #[serde(default)]
    pub total_kills: i32,
    #[serde(default)]
    pub total_players: i32,
    #[serde(default)]
    pub guilds: serde_json::Value,
    #[serde(default)]
    pub alliances: serde_json::Value,
}

/// One side of a kill event.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KillParticipant {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub guild_name: Option<String>,
    #[serde(default)]
    pub alliance_name: Option<String>,
    #[serde(default)]
    pub average_item_power: f64,
    #[serde(default)]
    pub equipment: Option<serde_json::Value>,
}

/// Kill event as returned by the kills endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KillEventRecord {
    #[serde(deserialize_with = "de_u64_as_i64")]
    pub event_id: i64,
    pub time_stamp: DateTime<Utc>,
    #[serde(default)]
    pub total_victim_kill_fame: i64,
    pub killer: KillParticipant,
    pub victim: KillParticipant,
}

/// Guild search hit.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GuildSearchResult {
    pub id: String,
    pub name: String,
}

// ============================================================================
// Client
// ============================================================================

pub struct AlbionApiClient {
    base_url: String,
    client: reqwest::Client,
    observer: Arc<RateLimitObserver>,
    max_attempts: u32,
    backoff_base: Duration,
}

impl AlbionApiClient {
    pub fn new(base_url: String, observer: Arc<RateLimitObserver>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            observer,
            max_attempts: 4,
            backoff_base: Duration::from_millis(500),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path_and_query: &str) -> Result<T, ApiError> {
        let url = format!("{}/{}", self.base_url, path_and_query);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.try_get(&url).await {
                Ok(body) => {
                    return serde_json::from_str(&body).map_err(|e| ApiError::Decode(e.to_string()));
                }
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.backoff_base * 2u32.pow(attempt - 1);
                    warn!(
                        url = %url,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "upstream request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_get(&self, url: &str) -> Result<String, ApiError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            self.observer.record(true);
            return Err(ApiError::RateLimited);
        }
        self.observer.record(false);

        if status == StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound);
        }
        if !status.is_success() {
            return Err(ApiError::Upstream(status.as_u16()));
        }

        response
            .text()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))
    }

    /// Parse a list of raw records, skipping malformed entries.
    ///
    /// A single bad record must not poison the page.
    fn parse_records<T: DeserializeOwned>(raw: Vec<serde_json::Value>, what: &str) -> Vec<T> {
        let total = raw.len();
        let parsed: Vec<T> = raw
            .into_iter()
            .filter_map(|value| match serde_json::from_value(value) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(what, error = %e, "skipping malformed record");
                    None
                }
            })
            .collect();

        if parsed.len() < total {
            debug!(what, kept = parsed.len(), total, "dropped malformed records");
        }
        parsed
    }
}

#[async_trait]
impl BattleApi for AlbionApiClient {
    async fn list_battles(
        &self,
        page: u32,
        min_players: u32,
    ) -> Result<Vec<BattleSummary>, ApiError> {
        let raw: Vec<serde_json::Value> = self
            .get_json(&format!(
                "battles?page={}&minPlayers={}&sort=recent",
                page, min_players
            ))
            .await?;
        Ok(Self::parse_records(raw, "battle"))
    }

    async fn battle_detail(&self, albion_id: i64) -> Result<BattleSummary, ApiError> {
        self.get_json(&format!("battles/{}", crate::common::id_to_u64(albion_id)))
            .await
    }

    async fn battle_kills(&self, albion_id: i64) -> Result<Vec<KillEventRecord>, ApiError> {
        let raw: Vec<serde_json::Value> = self
            .get_json(&format!(
                "battles/kills?ids={}",
                crate::common::id_to_u64(albion_id)
            ))
            .await?;
        Ok(Self::parse_records(raw, "kill event"))
    }

    async fn search_guilds(&self, name: &str) -> Result<Vec<GuildSearchResult>, ApiError> {
        let query: String = url_encode(name);
        let raw: Vec<serde_json::Value> = self.get_json(&format!("search/guilds?name={}", query)).await?;
        Ok(Self::parse_records(raw, "guild"))
    }
}

/// Minimal percent-encoding for query values.
fn url_encode(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}
