// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no business logic.
// Implementations live in the kernel; domains depend on the traits so tests
// can substitute mocks.

use async_trait::async_trait;

use crate::domains::battles::models::Battle;
use crate::kernel::albion_client::{ApiError, BattleSummary, GuildSearchResult, KillEventRecord};

/// Read access to the upstream game-data API.
#[async_trait]
pub trait BattleApi: Send + Sync {
    /// One page of recent battles with at least `min_players` participants.
    async fn list_battles(
        &self,
        page: u32,
        min_players: u32,
    ) -> Result<Vec<BattleSummary>, ApiError>;

    /// Full battle summary including guild/alliance detail.
    async fn battle_detail(&self, albion_id: i64) -> Result<BattleSummary, ApiError>;

    /// All kill events belonging to one battle.
    async fn battle_kills(&self, albion_id: i64) -> Result<Vec<KillEventRecord>, ApiError>;

    /// Guild directory lookup by name.
    async fn search_guilds(&self, name: &str) -> Result<Vec<GuildSearchResult>, ApiError>;
}

/// Outbound battle announcements.
///
/// Delivery (webhooks etc.) is an external collaborator; the pipeline only
/// guarantees that each newly ingested battle is offered to the notifier once
/// per notification job.
#[async_trait]
pub trait BattleNotifier: Send + Sync {
    async fn notify_battle(&self, battle: &Battle) -> anyhow::Result<()>;
}
