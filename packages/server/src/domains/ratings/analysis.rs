//! Battle analysis assembly.
//!
//! Folds a battle's kill stream and its stored participant snapshot into
//! per-guild aggregates. The MMR worker turns these drafts into full
//! [`GuildBattleStats`](crate::domains::ratings::engine::GuildBattleStats)
//! once guild ids, ratings, and anti-farming counts are resolved.

use std::collections::{BTreeMap, HashSet};

use crate::domains::battles::models::KillEvent;

/// Per-guild player counts from the battle's `guilds_json` snapshot.
///
/// The blob is stored opaque and only parsed here. Both the map and the
/// array form of the upstream payload are accepted; entries without a name
/// or player count are skipped, unknown fields ignored.
fn roster_player_counts(guilds_json: &serde_json::Value) -> BTreeMap<String, i32> {
    let entries: Vec<&serde_json::Value> = match guilds_json {
        serde_json::Value::Object(map) => map.values().collect(),
        serde_json::Value::Array(items) => items.iter().collect(),
        _ => Vec::new(),
    };

    let mut counts = BTreeMap::new();
    for entry in entries {
        let name = entry
            .get("name")
            .or_else(|| entry.get("Name"))
            .and_then(|value| value.as_str());
        let Some(name) = name else { continue };

        let players = entry
            .get("players")
            .or_else(|| entry.get("Players"))
            .map(|value| match value {
                serde_json::Value::Number(count) => count.as_i64().unwrap_or(0) as i32,
                serde_json::Value::Array(members) => members.len() as i32,
                serde_json::Value::Object(members) => members.len() as i32,
                _ => 0,
            })
            .unwrap_or(0);

        if players > 0 {
            counts.insert(name.to_string(), players);
        }
    }
    counts
}

/// Per-guild aggregate before guild ids and ratings are attached.
#[derive(Debug, Clone, PartialEq)]
pub struct GuildStatsDraft {
    pub guild_name: String,
    pub kills: i32,
    pub deaths: i32,
    pub fame_gained: i64,
    pub fame_lost: i64,
    pub players: i32,
    pub avg_ip: f64,
}

#[derive(Default)]
struct Accumulator {
    kills: i32,
    deaths: i32,
    fame_gained: i64,
    fame_lost: i64,
    members: HashSet<String>,
    ip_sum: f64,
    ip_samples: u32,
}

/// Aggregate a battle into per-guild drafts.
///
/// Combat and fame come from the kill stream. Player counts take the larger
/// of the distinct ids seen fighting and the roster in `guilds_json`: members
/// who neither killed nor died never appear in the kill stream but still
/// count toward participation. Roster-only guilds get a zero-combat draft.
/// Guildless participants are ignored: they cannot carry a rating. Output is
/// ordered by guild name for deterministic processing.
pub fn aggregate_guild_stats(
    guilds_json: &serde_json::Value,
    kills: &[KillEvent],
) -> Vec<GuildStatsDraft> {
    let mut by_guild: BTreeMap<String, Accumulator> = BTreeMap::new();

    for event in kills {
        if let Some(guild) = &event.killer_guild {
            let acc = by_guild.entry(guild.clone()).or_default();
            acc.kills += 1;
            acc.fame_gained += event.total_victim_kill_fame;
            acc.members.insert(event.killer_id.clone());
            acc.ip_sum += event.killer_avg_ip;
            acc.ip_samples += 1;
        }
        if let Some(guild) = &event.victim_guild {
            let acc = by_guild.entry(guild.clone()).or_default();
            acc.deaths += 1;
            acc.fame_lost += event.total_victim_kill_fame;
            acc.members.insert(event.victim_id.clone());
            acc.ip_sum += event.victim_avg_ip;
            acc.ip_samples += 1;
        }
    }

    let roster = roster_player_counts(guilds_json);
    for name in roster.keys() {
        by_guild.entry(name.clone()).or_default();
    }

    by_guild
        .into_iter()
        .map(|(guild_name, acc)| {
            let observed = acc.members.len() as i32;
            let players = roster
                .get(&guild_name)
                .copied()
                .unwrap_or(0)
                .max(observed);
            GuildStatsDraft {
                guild_name,
                kills: acc.kills,
                deaths: acc.deaths,
                fame_gained: acc.fame_gained,
                fame_lost: acc.fame_lost,
                players,
                avg_ip: if acc.ip_samples == 0 {
                    0.0
                } else {
                    acc.ip_sum / acc.ip_samples as f64
                },
            }
        })
        .collect()
}

/// Guilds grouped by shared alliance, as observed in the kill stream.
///
/// Guilds without an alliance form no group.
pub fn friend_groups(kills: &[KillEvent]) -> Vec<Vec<String>> {
    let mut by_alliance: BTreeMap<String, HashSet<String>> = BTreeMap::new();

    let mut observe = |alliance: &Option<String>, guild: &Option<String>| {
        if let (Some(alliance), Some(guild)) = (alliance, guild) {
            by_alliance
                .entry(alliance.clone())
                .or_default()
                .insert(guild.clone());
        }
    };

    for event in kills {
        observe(&event.killer_alliance, &event.killer_guild);
        observe(&event.victim_alliance, &event.victim_guild);
    }

    by_alliance
        .into_values()
        .filter(|guilds| guilds.len() > 1)
        .map(|guilds| {
            let mut sorted: Vec<String> = guilds.into_iter().collect();
            sorted.sort();
            sorted
        })
        .collect()
}

/// Observed battle duration: the span of the kill stream in seconds.
pub fn battle_duration_sec(kills: &[KillEvent]) -> i64 {
    let first = kills.iter().map(|event| event.timestamp).min();
    let last = kills.iter().map(|event| event.timestamp).max();
    match (first, last) {
        (Some(first), Some(last)) => (last - first).num_seconds(),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn kill(
        id: i64,
        minute: i64,
        killer: (&str, Option<&str>, Option<&str>),
        victim: (&str, Option<&str>, Option<&str>),
        fame: i64,
    ) -> KillEvent {
        KillEvent {
            event_id: id,
            timestamp: Utc.timestamp_opt(minute * 60, 0).unwrap(),
            total_victim_kill_fame: fame,
            battle_albion_id: Some(1),
            killer_id: killer.0.to_string(),
            killer_name: killer.0.to_string(),
            killer_guild: killer.1.map(str::to_string),
            killer_alliance: killer.2.map(str::to_string),
            killer_avg_ip: 1300.0,
            killer_equipment_json: None,
            victim_id: victim.0.to_string(),
            victim_name: victim.0.to_string(),
            victim_guild: victim.1.map(str::to_string),
            victim_alliance: victim.2.map(str::to_string),
            victim_avg_ip: 1100.0,
            victim_equipment_json: None,
        }
    }

    fn no_roster() -> serde_json::Value {
        serde_json::json!({})
    }

    #[test]
    fn aggregation_splits_kills_and_deaths() {
        let kills = vec![
            kill(1, 0, ("a1", Some("Alpha"), None), ("b1", Some("Beta"), None), 50_000),
            kill(2, 1, ("a2", Some("Alpha"), None), ("b1", Some("Beta"), None), 60_000),
            kill(3, 2, ("b2", Some("Beta"), None), ("a1", Some("Alpha"), None), 40_000),
        ];

        let drafts = aggregate_guild_stats(&no_roster(), &kills);
        assert_eq!(drafts.len(), 2);

        let alpha = drafts.iter().find(|d| d.guild_name == "Alpha").unwrap();
        assert_eq!(alpha.kills, 2);
        assert_eq!(alpha.deaths, 1);
        assert_eq!(alpha.fame_gained, 110_000);
        assert_eq!(alpha.fame_lost, 40_000);
        assert_eq!(alpha.players, 2); // a1, a2

        let beta = drafts.iter().find(|d| d.guild_name == "Beta").unwrap();
        assert_eq!(beta.kills, 1);
        assert_eq!(beta.deaths, 2);
        assert_eq!(beta.players, 2); // b1, b2
    }

    #[test]
    fn guildless_participants_are_dropped() {
        let kills = vec![kill(1, 0, ("x", None, None), ("y", None, None), 10_000)];
        assert!(aggregate_guild_stats(&no_roster(), &kills).is_empty());
    }

    #[test]
    fn distinct_players_counted_once() {
        let kills = vec![
            kill(1, 0, ("a1", Some("Alpha"), None), ("b1", Some("Beta"), None), 1),
            kill(2, 1, ("a1", Some("Alpha"), None), ("b2", Some("Beta"), None), 1),
            kill(3, 2, ("a1", Some("Alpha"), None), ("b3", Some("Beta"), None), 1),
        ];

        let drafts = aggregate_guild_stats(&no_roster(), &kills);
        let alpha = drafts.iter().find(|d| d.guild_name == "Alpha").unwrap();
        assert_eq!(alpha.players, 1);
    }

    #[test]
    fn roster_counts_players_the_kill_stream_misses() {
        // One Alpha fighter shows up in kills, but the snapshot says 14 came
        let kills = vec![kill(1, 0, ("a1", Some("Alpha"), None), ("b1", Some("Beta"), None), 1)];
        let roster = serde_json::json!({
            "g1": {"name": "Alpha", "players": 14, "killFame": 50_000},
            "g2": {"name": "Beta", "players": 9}
        });

        let drafts = aggregate_guild_stats(&roster, &kills);
        let alpha = drafts.iter().find(|d| d.guild_name == "Alpha").unwrap();
        assert_eq!(alpha.players, 14);
        assert_eq!(alpha.kills, 1);

        let beta = drafts.iter().find(|d| d.guild_name == "Beta").unwrap();
        assert_eq!(beta.players, 9);
    }

    #[test]
    fn kill_stream_wins_when_it_observed_more_players() {
        let kills = vec![
            kill(1, 0, ("a1", Some("Alpha"), None), ("b1", Some("Beta"), None), 1),
            kill(2, 1, ("a2", Some("Alpha"), None), ("b1", Some("Beta"), None), 1),
            kill(3, 2, ("a3", Some("Alpha"), None), ("b1", Some("Beta"), None), 1),
        ];
        let roster = serde_json::json!({"g1": {"name": "Alpha", "players": 2}});

        let drafts = aggregate_guild_stats(&roster, &kills);
        let alpha = drafts.iter().find(|d| d.guild_name == "Alpha").unwrap();
        assert_eq!(alpha.players, 3);
    }

    #[test]
    fn roster_only_guilds_get_a_zero_combat_draft() {
        let kills = vec![kill(1, 0, ("a1", Some("Alpha"), None), ("b1", Some("Beta"), None), 1)];
        let roster = serde_json::json!({"g3": {"name": "Logistics", "players": 6}});

        let drafts = aggregate_guild_stats(&roster, &kills);
        let support = drafts.iter().find(|d| d.guild_name == "Logistics").unwrap();
        assert_eq!(support.players, 6);
        assert_eq!(support.kills, 0);
        assert_eq!(support.deaths, 0);
        assert_eq!(support.fame_gained, 0);
    }

    #[test]
    fn roster_accepts_array_form_and_pascal_case() {
        let roster = serde_json::json!([
            {"Name": "Alpha", "Players": 12},
            {"Name": "Beta", "players": ["p1", "p2", "p3"]},
            {"noName": true},
            {"Name": "Empty"}
        ]);

        let drafts = aggregate_guild_stats(&roster, &[]);
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].guild_name, "Alpha");
        assert_eq!(drafts[0].players, 12);
        assert_eq!(drafts[1].guild_name, "Beta");
        assert_eq!(drafts[1].players, 3);
    }

    #[test]
    fn friend_groups_follow_alliances() {
        let kills = vec![
            kill(
                1,
                0,
                ("a1", Some("Alpha"), Some("NORTH")),
                ("b1", Some("Beta"), Some("SOUTH")),
                1,
            ),
            kill(
                2,
                1,
                ("g1", Some("Gamma"), Some("NORTH")),
                ("b2", Some("Beta"), Some("SOUTH")),
                1,
            ),
        ];

        let groups = friend_groups(&kills);
        // SOUTH has one guild only, so just NORTH groups
        assert_eq!(groups, vec![vec!["Alpha".to_string(), "Gamma".to_string()]]);
    }

    #[test]
    fn duration_spans_the_kill_stream() {
        let kills = vec![
            kill(1, 10, ("a", Some("A"), None), ("b", Some("B"), None), 1),
            kill(2, 25, ("a", Some("A"), None), ("b", Some("B"), None), 1),
        ];
        assert_eq!(battle_duration_sec(&kills), 15 * 60);
        assert_eq!(battle_duration_sec(&[]), 0);
    }
}
