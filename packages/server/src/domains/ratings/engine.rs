//! Pure MMR engine.
//!
//! Takes a fully assembled [`BattleAnalysis`] and produces per-guild rating
//! deltas, prime-time mass updates, and audit material. No IO happens here;
//! the worker owns loading inputs and persisting outputs.
//!
//! Processing order per retained guild: Elo base delta, then prime-time
//! factor, kill-clustering loss damping, anti-farming factor, fame-imbalance
//! damping, and a final clip.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;

/// Calibration points of the rating formula.
///
/// Defaults carry the production calibration; admission thresholds come from
/// configuration.
#[derive(Debug, Clone)]
pub struct EngineTuning {
    /// Admission: minimum battle size
    pub min_players: i32,
    /// Admission: minimum total fame
    pub min_fame: i64,

    /// Participation filter
    pub fame_share_min: f64,
    pub fame_abs_min: i64,
    pub combat_share_min: f64,
    pub combat_abs_min: i32,
    pub player_share_min: f64,
    pub player_abs_min: i32,
    pub solo_min_combat: i32,
    pub solo_min_fame: i64,

    /// Elo core
    pub base_k: f64,
    pub reference_battle_size: f64,

    /// Modifiers
    pub fame_ratio_win_threshold: f64,
    pub prime_time_factor: f64,
    pub clustering_loss_factor: f64,
    pub anti_farming_grace: u32,
    pub anti_farming_step: f64,
    pub anti_farming_floor: f64,
    pub fame_imbalance_high: f64,
    pub fame_imbalance_low: f64,
    pub imbalance_damping: f64,
    pub max_delta: f64,
}

impl Default for EngineTuning {
    fn default() -> Self {
        Self {
            min_players: 25,
            min_fame: 100_000,

            fame_share_min: 0.10,
            fame_abs_min: 500_000,
            combat_share_min: 0.10,
            combat_abs_min: 5,
            player_share_min: 0.10,
            player_abs_min: 3,
            solo_min_combat: 8,
            solo_min_fame: 1_000_000,

            base_k: 32.0,
            reference_battle_size: 50.0,

            fame_ratio_win_threshold: 1.25,
            prime_time_factor: 1.15,
            clustering_loss_factor: 0.7,
            anti_farming_grace: 2,
            anti_farming_step: 0.15,
            anti_farming_floor: 0.2,
            fame_imbalance_high: 5.0,
            fame_imbalance_low: 0.2,
            imbalance_damping: 0.5,
            max_delta: 40.0,
        }
    }
}

impl EngineTuning {
    pub fn from_config(config: &Config) -> Self {
        Self {
            min_players: config.mmr_min_players as i32,
            min_fame: config.mmr_min_fame,
            ..Default::default()
        }
    }
}

/// One guild's aggregated performance inside a battle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildBattleStats {
    pub guild_id: String,
    pub guild_name: String,
    pub kills: i32,
    pub deaths: i32,
    pub fame_gained: i64,
    pub fame_lost: i64,
    pub players: i32,
    pub avg_ip: f64,
    pub current_mmr: f64,
    /// Wins against the same opponent set in the anti-farming window,
    /// resolved from the calculation log before the engine runs.
    pub recent_wins_vs_opponents: u32,
}

/// Everything the engine needs to know about one battle.
#[derive(Debug, Clone)]
pub struct BattleAnalysis {
    pub battle_id: i64,
    pub season_id: Uuid,
    pub total_players: i32,
    pub total_fame: i64,
    pub total_kills: i32,
    pub battle_duration_sec: i64,
    pub is_prime_time: bool,
    pub kill_clustering: u32,
    /// Guilds grouped by shared alliance, as observed in the kill stream
    pub friend_groups: Vec<Vec<String>>,
    pub guild_stats: Vec<GuildBattleStats>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BattleOutcome {
    Win,
    Loss,
}

/// One guild's rating change plus the audit fields that go to the log.
#[derive(Debug, Clone, Serialize)]
pub struct GuildRatingChange {
    pub guild_id: String,
    pub guild_name: String,
    pub outcome: BattleOutcome,
    pub delta: f64,
    pub kills: i32,
    pub deaths: i32,
    pub players: i32,
    pub opponents: Vec<String>,
}

/// Prime-time mass contribution of one retained guild.
#[derive(Debug, Clone, Serialize)]
pub struct MassUpdate {
    pub guild_id: String,
    pub players: i32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineOutcome {
    pub changes: Vec<GuildRatingChange>,
    pub mass_updates: Vec<MassUpdate>,
}

// ============================================================================
// Admission & participation
// ============================================================================

/// Admission gate: battles below these floors never update MMR.
pub fn should_calculate_mmr(total_players: i32, total_fame: i64, tuning: &EngineTuning) -> bool {
    total_players >= tuning.min_players && total_fame >= tuning.min_fame
}

fn share(part: f64, whole: f64) -> f64 {
    if whole <= 0.0 {
        0.0
    } else {
        part / whole
    }
}

/// Participation filter: a guild is retained when it carried a meaningful
/// share of the battle's fame, combat, or players.
pub fn is_retained(
    stats: &GuildBattleStats,
    total_fame: i64,
    total_kills: i32,
    total_players: i32,
    tuning: &EngineTuning,
) -> bool {
    let fame_participation = stats.fame_gained + stats.fame_lost;
    let combat_participation = stats.kills + stats.deaths;

    let by_fame = share(fame_participation as f64, total_fame as f64) >= tuning.fame_share_min
        && fame_participation >= tuning.fame_abs_min;
    let by_combat = share(combat_participation as f64, total_kills as f64)
        >= tuning.combat_share_min
        && combat_participation >= tuning.combat_abs_min;
    let by_players = share(stats.players as f64, total_players as f64) >= tuning.player_share_min
        && stats.players >= tuning.player_abs_min;

    if !(by_fame || by_combat || by_players) {
        return false;
    }

    // Lone players piggy-backing on big fights need real involvement
    if stats.players <= 1 {
        return combat_participation >= tuning.solo_min_combat
            && fame_participation >= tuning.solo_min_fame;
    }

    true
}

/// Retained guilds of an analysis, in input order.
pub fn retained_stats<'a>(
    analysis: &'a BattleAnalysis,
    tuning: &EngineTuning,
) -> Vec<&'a GuildBattleStats> {
    analysis
        .guild_stats
        .iter()
        .filter(|stats| {
            is_retained(
                stats,
                analysis.total_fame,
                analysis.total_kills,
                analysis.total_players,
                tuning,
            )
        })
        .collect()
}

// ============================================================================
// Classification & Elo core
// ============================================================================

fn fame_ratio(stats: &GuildBattleStats) -> f64 {
    if stats.fame_lost > 0 {
        stats.fame_gained as f64 / stats.fame_lost as f64
    } else if stats.fame_gained > 0 {
        f64::INFINITY
    } else {
        1.0
    }
}

/// Win/loss by kill score, with a fame-ratio tiebreak on even scores.
pub fn classify_outcome(stats: &GuildBattleStats, tuning: &EngineTuning) -> BattleOutcome {
    let score = stats.kills - stats.deaths;
    if score > 0 {
        return BattleOutcome::Win;
    }
    if score == 0 && stats.fame_gained as f64 > stats.fame_lost as f64 * tuning.fame_ratio_win_threshold
    {
        return BattleOutcome::Win;
    }
    BattleOutcome::Loss
}

/// Elo expectation of `own` against `opponent`.
pub fn expected_score(own: f64, opponent: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf((opponent - own) / 400.0))
}

/// Player-count scaling of K: small rosters move slowly.
pub fn player_count_factor(players: i32) -> f64 {
    (players.max(0) as f64 / 8.0).powf(0.8).clamp(0.1, 1.0)
}

/// Battle-size scaling of K: skirmishes move ratings less than brawls.
pub fn battle_size_factor(total_players: i32, tuning: &EngineTuning) -> f64 {
    (total_players as f64 / tuning.reference_battle_size).min(1.0)
}

/// Anti-farming factor for a win: `max(floor, 1 - step * wins_over_grace)`.
pub fn anti_farming_factor(recent_wins: u32, tuning: &EngineTuning) -> f64 {
    let over_grace = recent_wins.saturating_sub(tuning.anti_farming_grace) as f64;
    (1.0 - tuning.anti_farming_step * over_grace).max(tuning.anti_farming_floor)
}

// ============================================================================
// Engine
// ============================================================================

/// Run the full rating computation for one battle.
pub fn calculate(analysis: &BattleAnalysis, tuning: &EngineTuning) -> EngineOutcome {
    let retained = retained_stats(analysis, tuning);
    let mut outcome = EngineOutcome::default();

    if analysis.is_prime_time {
        outcome.mass_updates = retained
            .iter()
            .map(|stats| MassUpdate {
                guild_id: stats.guild_id.clone(),
                players: stats.players,
            })
            .collect();
    }

    // An Elo delta needs at least one opponent
    if retained.len() < 2 {
        return outcome;
    }

    let clustering_penalty =
        analysis.kill_clustering as f64 > retained.len() as f64 / 2.0;

    for stats in &retained {
        let opponents: Vec<&&GuildBattleStats> = retained
            .iter()
            .filter(|other| other.guild_id != stats.guild_id)
            .collect();
        let opponent_mean = opponents
            .iter()
            .map(|other| other.current_mmr)
            .sum::<f64>()
            / opponents.len() as f64;

        let battle_outcome = classify_outcome(stats, tuning);
        let actual = match battle_outcome {
            BattleOutcome::Win => 1.0,
            BattleOutcome::Loss => 0.0,
        };
        let expected = expected_score(stats.current_mmr, opponent_mean);

        let k = tuning.base_k
            * player_count_factor(stats.players)
            * battle_size_factor(analysis.total_players, tuning);
        let mut delta = k * (actual - expected);

        if analysis.is_prime_time {
            delta *= tuning.prime_time_factor;
        }
        if clustering_penalty && battle_outcome == BattleOutcome::Loss {
            delta *= tuning.clustering_loss_factor;
        }
        if battle_outcome == BattleOutcome::Win {
            delta *= anti_farming_factor(stats.recent_wins_vs_opponents, tuning);
        }

        let ratio = fame_ratio(stats);
        if ratio > tuning.fame_imbalance_high || ratio < tuning.fame_imbalance_low {
            delta *= tuning.imbalance_damping;
        }

        delta = delta.clamp(-tuning.max_delta, tuning.max_delta);

        outcome.changes.push(GuildRatingChange {
            guild_id: stats.guild_id.clone(),
            guild_name: stats.guild_name.clone(),
            outcome: battle_outcome,
            delta,
            kills: stats.kills,
            deaths: stats.deaths,
            players: stats.players,
            opponents: opponents
                .iter()
                .map(|other| other.guild_name.clone())
                .collect(),
        });
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(name: &str, kills: i32, deaths: i32, fame_gained: i64, fame_lost: i64, players: i32) -> GuildBattleStats {
        GuildBattleStats {
            guild_id: format!("id-{name}"),
            guild_name: name.to_string(),
            kills,
            deaths,
            fame_gained,
            fame_lost,
            players,
            avg_ip: 1200.0,
            current_mmr: 1000.0,
            recent_wins_vs_opponents: 0,
        }
    }

    fn analysis(guild_stats: Vec<GuildBattleStats>) -> BattleAnalysis {
        BattleAnalysis {
            battle_id: 1,
            season_id: Uuid::new_v4(),
            total_players: 60,
            total_fame: 2_000_000,
            total_kills: 20,
            battle_duration_sec: 1_800,
            is_prime_time: false,
            kill_clustering: 0,
            friend_groups: vec![],
            guild_stats,
        }
    }

    #[test]
    fn admission_gate_thresholds() {
        let tuning = EngineTuning::default();
        assert!(should_calculate_mmr(25, 100_000, &tuning));
        assert!(!should_calculate_mmr(24, 2_000_000, &tuning));
        assert!(!should_calculate_mmr(100, 99_999, &tuning));
    }

    #[test]
    fn participation_boundary_at_exactly_ten_percent() {
        let tuning = EngineTuning::default();

        // Exactly 10% player share with the absolute floor met -> retained
        let boundary = stats("Edge", 0, 0, 0, 0, 6);
        assert!(is_retained(&boundary, 2_000_000, 20, 60, &tuning));

        // Strictly below 10% -> excluded
        let below = stats("Below", 0, 0, 0, 0, 5);
        assert!(!is_retained(&below, 2_000_000, 20, 60, &tuning));
    }

    #[test]
    fn participation_absolute_floors_apply() {
        let tuning = EngineTuning::default();

        // 50% fame share but under the 500k absolute floor
        let small = stats("Small", 0, 0, 200_000, 100_000, 2);
        assert!(!is_retained(&small, 600_000, 50, 100, &tuning));

        // Combat path: 3 kills + 2 deaths = 5 events, 25% share
        let combat = stats("Combat", 3, 2, 0, 0, 2);
        assert!(is_retained(&combat, 10_000_000, 20, 100, &tuning));
    }

    #[test]
    fn solo_guilds_need_real_involvement() {
        let tuning = EngineTuning::default();

        // Passes player share alone but is a single player without combat
        let tourist = stats("Tourist", 2, 1, 600_000, 100_000, 1);
        assert!(!is_retained(&tourist, 2_000_000, 10, 8, &tuning));

        // Heavy solo: 9 combat events and 1.2M fame participation
        let carry = stats("Carry", 7, 2, 1_000_000, 200_000, 1);
        assert!(is_retained(&carry, 2_000_000, 10, 8, &tuning));
    }

    #[test]
    fn outcome_classification() {
        let tuning = EngineTuning::default();

        assert_eq!(
            classify_outcome(&stats("W", 8, 3, 0, 0, 10), &tuning),
            BattleOutcome::Win
        );
        assert_eq!(
            classify_outcome(&stats("L", 3, 5, 0, 0, 10), &tuning),
            BattleOutcome::Loss
        );

        // Even score, fame ratio above 1.25 -> win
        assert_eq!(
            classify_outcome(&stats("T", 4, 4, 500_000, 300_000, 10), &tuning),
            BattleOutcome::Win
        );
        // Even score, fame ratio below threshold -> loss
        assert_eq!(
            classify_outcome(&stats("T", 4, 4, 300_000, 300_000, 10), &tuning),
            BattleOutcome::Loss
        );
        // Zero combat, no fame edge -> loss
        assert_eq!(
            classify_outcome(&stats("Z", 0, 0, 100_000, 100_000, 10), &tuning),
            BattleOutcome::Loss
        );
    }

    #[test]
    fn equal_rating_pair_is_zero_sum_before_modifiers() {
        let tuning = EngineTuning::default();
        let a = analysis(vec![
            stats("Winner", 8, 3, 1_100_000, 390_000, 12),
            stats("Loser", 3, 5, 280_000, 850_000, 10),
        ]);

        let outcome = calculate(&a, &tuning);
        assert_eq!(outcome.changes.len(), 2);

        let winner = outcome.changes.iter().find(|c| c.guild_name == "Winner").unwrap();
        let loser = outcome.changes.iter().find(|c| c.guild_name == "Loser").unwrap();

        assert_eq!(winner.outcome, BattleOutcome::Win);
        assert_eq!(loser.outcome, BattleOutcome::Loss);
        // K * (1 - 0.5) = 32 * 0.5 = 16 for both sides at equal rating
        assert!((winner.delta - 16.0).abs() < 1.0, "delta was {}", winner.delta);
        assert!((loser.delta + 16.0).abs() < 1.0, "delta was {}", loser.delta);
        assert!((winner.delta + loser.delta).abs() < 1e-9);
    }

    #[test]
    fn anti_farming_factor_shape() {
        let tuning = EngineTuning::default();

        // Within grace: no reduction
        assert_eq!(anti_farming_factor(0, &tuning), 1.0);
        assert_eq!(anti_farming_factor(2, &tuning), 1.0);
        // Four prior wins -> 1 - 0.15 * 2 = 0.70
        assert!((anti_farming_factor(4, &tuning) - 0.70).abs() < 1e-9);
        // Monotone decrease with a floor
        let mut last = 1.0;
        for wins in 0..30 {
            let factor = anti_farming_factor(wins, &tuning);
            assert!(factor <= last);
            assert!(factor >= tuning.anti_farming_floor);
            last = factor;
        }
        assert_eq!(anti_farming_factor(25, &tuning), 0.2);
    }

    #[test]
    fn anti_farming_applies_to_wins_only() {
        let tuning = EngineTuning::default();

        let mut farmer = stats("Farmer", 8, 3, 1_100_000, 390_000, 12);
        farmer.recent_wins_vs_opponents = 4;
        let mut victim = stats("Victim", 3, 5, 280_000, 850_000, 10);
        victim.recent_wins_vs_opponents = 4;

        let outcome = calculate(&analysis(vec![farmer, victim]), &tuning);
        let farmer_change = outcome.changes.iter().find(|c| c.guild_name == "Farmer").unwrap();
        let victim_change = outcome.changes.iter().find(|c| c.guild_name == "Victim").unwrap();

        // Winner damped to 0.70 of base, loser untouched
        assert!((farmer_change.delta - 16.0 * 0.70).abs() < 1.0);
        assert!((victim_change.delta + 16.0).abs() < 1.0);
    }

    #[test]
    fn prime_time_amplifies_deltas() {
        let tuning = EngineTuning::default();
        let mut a = analysis(vec![
            stats("Winner", 8, 3, 1_100_000, 390_000, 12),
            stats("Loser", 3, 5, 280_000, 850_000, 10),
        ]);
        a.is_prime_time = true;

        let outcome = calculate(&a, &tuning);
        let winner = outcome.changes.iter().find(|c| c.guild_name == "Winner").unwrap();
        assert!((winner.delta - 16.0 * 1.15).abs() < 1.0);

        // Retained guilds contribute mass updates during prime time
        assert_eq!(outcome.mass_updates.len(), 2);
    }

    #[test]
    fn clustering_penalty_hits_losses_only() {
        let tuning = EngineTuning::default();
        let mut a = analysis(vec![
            stats("Winner", 8, 3, 1_100_000, 390_000, 12),
            stats("Loser", 3, 5, 280_000, 850_000, 10),
        ]);
        // 2 retained guilds, clustering 2 > 1 -> penalty active
        a.kill_clustering = 2;

        let outcome = calculate(&a, &tuning);
        let winner = outcome.changes.iter().find(|c| c.guild_name == "Winner").unwrap();
        let loser = outcome.changes.iter().find(|c| c.guild_name == "Loser").unwrap();

        assert!((winner.delta - 16.0).abs() < 1.0);
        assert!((loser.delta + 16.0 * 0.7).abs() < 1.0);
    }

    #[test]
    fn fame_imbalance_halves_extreme_deltas() {
        let tuning = EngineTuning::default();
        // Winner gains 6x the fame it lost -> ratio above 5
        let a = analysis(vec![
            stats("Stomp", 10, 1, 1_200_000, 150_000, 12),
            stats("Stomped", 1, 10, 150_000, 1_200_000, 12),
        ]);

        let outcome = calculate(&a, &tuning);
        let winner = outcome.changes.iter().find(|c| c.guild_name == "Stomp").unwrap();
        let loser = outcome.changes.iter().find(|c| c.guild_name == "Stomped").unwrap();

        assert!((winner.delta - 8.0).abs() < 1.0, "delta was {}", winner.delta);
        assert!((loser.delta + 8.0).abs() < 1.0, "delta was {}", loser.delta);
    }

    #[test]
    fn deltas_are_clipped() {
        let mut tuning = EngineTuning::default();
        tuning.base_k = 500.0;

        let a = analysis(vec![
            stats("Winner", 8, 3, 1_100_000, 390_000, 12),
            stats("Loser", 3, 5, 280_000, 850_000, 10),
        ]);

        let outcome = calculate(&a, &tuning);
        for change in &outcome.changes {
            assert!(change.delta.abs() <= tuning.max_delta);
        }
    }

    #[test]
    fn underdog_wins_move_more_than_favorite_wins() {
        let tuning = EngineTuning::default();

        let mut underdog = stats("Underdog", 8, 3, 1_100_000, 390_000, 12);
        underdog.current_mmr = 900.0;
        let mut favorite = stats("Favorite", 3, 5, 280_000, 850_000, 12);
        favorite.current_mmr = 1100.0;

        let outcome = calculate(&analysis(vec![underdog, favorite]), &tuning);
        let underdog_delta = outcome
            .changes
            .iter()
            .find(|c| c.guild_name == "Underdog")
            .unwrap()
            .delta;

        // Beating a stronger opponent pays more than an even win
        assert!(underdog_delta > 16.0);
    }

    #[test]
    fn fewer_than_two_retained_guilds_produces_no_deltas() {
        let tuning = EngineTuning::default();
        let mut a = analysis(vec![stats("Alone", 8, 3, 1_100_000, 390_000, 12)]);
        a.is_prime_time = true;

        let outcome = calculate(&a, &tuning);
        assert!(outcome.changes.is_empty());
        // Mass still accrues for the retained guild
        assert_eq!(outcome.mass_updates.len(), 1);
    }

    #[test]
    fn opponents_list_excludes_self(){
        let tuning = EngineTuning::default();
        let a = analysis(vec![
            stats("A", 8, 3, 1_100_000, 390_000, 12),
            stats("B", 3, 5, 280_000, 850_000, 10),
            stats("C", 5, 5, 600_000, 600_000, 8),
        ]);

        let outcome = calculate(&a, &tuning);
        let a_change = outcome.changes.iter().find(|c| c.guild_name == "A").unwrap();
        assert_eq!(a_change.opponents.len(), 2);
        assert!(!a_change.opponents.contains(&"A".to_string()));
    }
}
