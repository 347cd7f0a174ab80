//! Battle notification seam.
//!
//! Actual delivery (Discord webhooks and friends) lives outside this service;
//! the default implementation only logs that a battle was offered.

use async_trait::async_trait;
use tracing::debug;

use crate::domains::battles::models::Battle;
use crate::kernel::traits::BattleNotifier;

/// No-op notifier for deployments without a delivery collaborator configured.
pub struct NoopNotifier;

#[async_trait]
impl BattleNotifier for NoopNotifier {
    async fn notify_battle(&self, battle: &Battle) -> anyhow::Result<()> {
        debug!(
            battle_id = battle.albion_id,
            players = battle.total_players,
            "no notifier configured, dropping battle announcement"
        );
        Ok(())
    }
}
