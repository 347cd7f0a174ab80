use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

/// Running mean of the player count a guild fields inside one prime-time
/// window ("mass").
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct GuildPrimeTimeMass {
    pub id: Uuid,
    pub guild_season_id: Uuid,
    pub prime_time_window_id: Uuid,
    pub avg_mass: f64,
    pub battle_count: i32,
    pub last_battle_at: Option<DateTime<Utc>>,
}

/// Incremental mean: the stored average after one more battle of `players`.
pub fn next_mass(avg_mass: f64, battle_count: i32, players: i32) -> f64 {
    (avg_mass * battle_count as f64 + players as f64) / (battle_count as f64 + 1.0)
}

// =============================================================================
// SQL Queries - ALL queries must be in models/
// =============================================================================

impl GuildPrimeTimeMass {
    pub async fn find(
        guild_season_id: Uuid,
        prime_time_window_id: Uuid,
        pool: &PgPool,
    ) -> Result<Option<Self>> {
        let row = sqlx::query_as::<_, GuildPrimeTimeMass>(
            r#"
            SELECT * FROM guild_prime_time_masses
            WHERE guild_season_id = $1 AND prime_time_window_id = $2
            "#,
        )
        .bind(guild_season_id)
        .bind(prime_time_window_id)
        .fetch_optional(pool)
        .await?;
        Ok(row)
    }

    /// Fold one battle into the running mean, inside the caller's transaction.
    pub async fn record_battle(
        tx: &mut Transaction<'_, Postgres>,
        guild_season_id: Uuid,
        prime_time_window_id: Uuid,
        players: i32,
        started_at: DateTime<Utc>,
    ) -> Result<Self> {
        let row = sqlx::query_as::<_, GuildPrimeTimeMass>(
            r#"
            INSERT INTO guild_prime_time_masses (
                id, guild_season_id, prime_time_window_id, avg_mass, battle_count, last_battle_at
            )
            VALUES ($1, $2, $3, $4, 1, $5)
            ON CONFLICT (guild_season_id, prime_time_window_id) DO UPDATE SET
                avg_mass = (guild_prime_time_masses.avg_mass * guild_prime_time_masses.battle_count + EXCLUDED.avg_mass)
                           / (guild_prime_time_masses.battle_count + 1),
                battle_count = guild_prime_time_masses.battle_count + 1,
                last_battle_at = EXCLUDED.last_battle_at
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(guild_season_id)
        .bind(prime_time_window_id)
        .bind(players as f64)
        .bind(started_at)
        .fetch_one(&mut **tx)
        .await?;

        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_mean_matches_definition() {
        // avg 30 over 2 battles, then a 34-player battle
        let next = next_mass(30.0, 2, 34);
        assert!((next - (94.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn running_mean_equals_exact_mean() {
        // Folding p_1..p_n one by one yields exactly sum/n
        let players = [12, 30, 7, 55, 21];
        let mut avg = 0.0;
        let mut count = 0;
        for p in players {
            avg = next_mass(avg, count, p);
            count += 1;
        }

        let exact = players.iter().sum::<i32>() as f64 / players.len() as f64;
        assert!((avg - exact).abs() < 1e-9);
    }
}
