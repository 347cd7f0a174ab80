//! End-to-end tests of the rating computation over assembled analyses.

use battlewatch_core::domains::ratings::engine::{
    anti_farming_factor, calculate, should_calculate_mmr, BattleAnalysis, BattleOutcome,
    EngineTuning, GuildBattleStats,
};
use battlewatch_core::domains::ratings::models::next_mass;
use battlewatch_core::domains::seasons::service::carryover_mmr;
use uuid::Uuid;

fn guild(
    name: &str,
    kills: i32,
    deaths: i32,
    fame_gained: i64,
    fame_lost: i64,
    players: i32,
    mmr: f64,
) -> GuildBattleStats {
    GuildBattleStats {
        guild_id: format!("id-{name}"),
        guild_name: name.to_string(),
        kills,
        deaths,
        fame_gained,
        fame_lost,
        players,
        avg_ip: 1250.0,
        current_mmr: mmr,
        recent_wins_vs_opponents: 0,
    }
}

fn two_guild_battle(winner: GuildBattleStats, loser: GuildBattleStats) -> BattleAnalysis {
    BattleAnalysis {
        battle_id: 4242,
        season_id: Uuid::new_v4(),
        total_players: 60,
        total_fame: 2_600_000,
        total_kills: 19,
        battle_duration_sec: 1_500,
        is_prime_time: false,
        kill_clustering: 0,
        friend_groups: vec![],
        guild_stats: vec![winner, loser],
    }
}

#[test]
fn small_battles_never_update_mmr() {
    // 20 players and 2M fame is below the 25-player floor
    let tuning = EngineTuning::default();
    assert!(!should_calculate_mmr(20, 2_000_000, &tuning));
    assert!(should_calculate_mmr(25, 2_000_000, &tuning));
}

#[test]
fn evenly_matched_win_and_loss_land_near_sixteen() {
    let tuning = EngineTuning::default();
    let analysis = two_guild_battle(
        guild("Winner", 8, 3, 1_100_000, 390_000, 12, 1000.0),
        guild("Loser", 3, 5, 280_000, 850_000, 10, 1000.0),
    );

    let outcome = calculate(&analysis, &tuning);
    let winner = outcome
        .changes
        .iter()
        .find(|c| c.guild_name == "Winner")
        .expect("winner retained");
    let loser = outcome
        .changes
        .iter()
        .find(|c| c.guild_name == "Loser")
        .expect("loser retained");

    assert_eq!(winner.outcome, BattleOutcome::Win);
    assert_eq!(loser.outcome, BattleOutcome::Loss);
    assert!((winner.delta - 16.0).abs() <= 1.0, "Δ_W = {}", winner.delta);
    assert!((loser.delta + 16.0).abs() <= 1.0, "Δ_L = {}", loser.delta);

    // First encounter: no anti-farming reduction
    assert!((winner.delta.abs() - loser.delta.abs()).abs() < 1e-9);
}

#[test]
fn repeat_wins_against_the_same_opponents_pay_seventy_percent() {
    let tuning = EngineTuning::default();

    let mut farmer = guild("Farmer", 8, 3, 1_100_000, 390_000, 12, 1000.0);
    farmer.recent_wins_vs_opponents = 4;
    let prey = guild("Prey", 3, 5, 280_000, 850_000, 10, 1000.0);

    let baseline = {
        let mut fresh = farmer.clone();
        fresh.recent_wins_vs_opponents = 0;
        let outcome = calculate(&two_guild_battle(fresh, prey.clone()), &tuning);
        outcome
            .changes
            .iter()
            .find(|c| c.guild_name == "Farmer")
            .unwrap()
            .delta
    };

    let outcome = calculate(&two_guild_battle(farmer, prey), &tuning);
    let farmed = outcome
        .changes
        .iter()
        .find(|c| c.guild_name == "Farmer")
        .unwrap()
        .delta;

    // factor = max(0.2, 1 - 0.15 * (4 - 2)) = 0.70
    assert!((anti_farming_factor(4, &tuning) - 0.70).abs() < 1e-9);
    assert!((farmed - baseline * 0.70).abs() < 1e-9);
}

#[test]
fn anti_farming_decreases_monotonically_with_history() {
    let tuning = EngineTuning::default();
    let mut previous = f64::INFINITY;
    for wins in 0..20 {
        let factor = anti_farming_factor(wins, &tuning);
        assert!(factor <= previous);
        assert!(factor >= 0.2);
        previous = factor;
    }
}

#[test]
fn prime_time_mass_is_an_exact_running_mean() {
    // Window [20,22), battle at 20:30 with 34 players on prior state (30.0, 2)
    let updated = next_mass(30.0, 2, 34);
    assert!((updated - 94.0 / 3.0).abs() < 1e-9);

    // After N battles the stored value equals the exact mean
    let sizes = [34, 28, 41, 30, 22, 37];
    let mut avg = 0.0;
    for (n, players) in sizes.iter().enumerate() {
        avg = next_mass(avg, n as i32, *players);
    }
    let exact = sizes.iter().sum::<i32>() as f64 / sizes.len() as f64;
    assert!((avg - exact).abs() < 1e-9);
}

#[test]
fn carryover_band_holds_for_every_prior_rating() {
    for previous in (-1000..5000).step_by(37) {
        let seeded = carryover_mmr(previous as f64);
        assert!((800.0..=1500.0).contains(&seeded), "seeded {seeded} from {previous}");
    }
    // Shape: half regression toward 1000
    assert_eq!(carryover_mmr(1400.0), 1200.0);
    assert_eq!(carryover_mmr(600.0), 800.0);
}

#[test]
fn deltas_never_exceed_the_clip_band() {
    let mut tuning = EngineTuning::default();
    tuning.base_k = 1_000.0;

    let mut underdog = guild("Underdog", 9, 2, 1_500_000, 300_000, 14, 600.0);
    underdog.recent_wins_vs_opponents = 0;
    let favorite = guild("Favorite", 2, 9, 300_000, 1_500_000, 14, 1900.0);

    let outcome = calculate(&two_guild_battle(underdog, favorite), &tuning);
    for change in &outcome.changes {
        assert!(change.delta.abs() <= 40.0, "Δ = {}", change.delta);
    }
}

#[test]
fn non_participating_guilds_receive_no_delta() {
    let tuning = EngineTuning::default();
    let mut analysis = two_guild_battle(
        guild("Winner", 8, 3, 1_100_000, 390_000, 12, 1000.0),
        guild("Loser", 3, 5, 280_000, 850_000, 10, 1000.0),
    );
    // A bystander below every participation share
    analysis
        .guild_stats
        .push(guild("Bystander", 0, 1, 10_000, 30_000, 1, 1000.0));

    let outcome = calculate(&analysis, &tuning);
    assert_eq!(outcome.changes.len(), 2);
    assert!(outcome
        .changes
        .iter()
        .all(|change| change.guild_name != "Bystander"));
}

#[test]
fn opponent_lists_feed_the_audit_log() {
    let tuning = EngineTuning::default();
    let analysis = two_guild_battle(
        guild("Winner", 8, 3, 1_100_000, 390_000, 12, 1000.0),
        guild("Loser", 3, 5, 280_000, 850_000, 10, 1000.0),
    );

    let outcome = calculate(&analysis, &tuning);
    let winner = outcome
        .changes
        .iter()
        .find(|c| c.guild_name == "Winner")
        .unwrap();
    assert_eq!(winner.opponents, vec!["Loser".to_string()]);
}
