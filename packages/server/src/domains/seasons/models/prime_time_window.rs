use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

/// Recurring UTC hour window used to weight and account participation.
///
/// Windows are half-open `[start, end)` and may wrap midnight, in which case
/// they cover `[start, 24) ∪ [0, end)`.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PrimeTimeWindow {
    pub id: Uuid,
    pub start_hour: i32,
    pub end_hour: i32,
    pub timezone: String,
    pub created_at: DateTime<Utc>,
}

impl PrimeTimeWindow {
    /// Wrap-aware hour membership.
    pub fn matches_hour(&self, hour: u32) -> bool {
        let hour = hour as i32;
        if self.start_hour <= self.end_hour {
            self.start_hour <= hour && hour < self.end_hour
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

// =============================================================================
// SQL Queries - ALL queries must be in models/
// =============================================================================

impl PrimeTimeWindow {
    pub async fn all(pool: &PgPool) -> Result<Vec<Self>> {
        let windows = sqlx::query_as::<_, PrimeTimeWindow>(
            "SELECT * FROM prime_time_windows ORDER BY start_hour",
        )
        .fetch_all(pool)
        .await?;
        Ok(windows)
    }

    pub async fn create(start_hour: i32, end_hour: i32, pool: &PgPool) -> Result<Self> {
        let window = sqlx::query_as::<_, PrimeTimeWindow>(
            r#"
            INSERT INTO prime_time_windows (id, start_hour, end_hour, timezone)
            VALUES ($1, $2, $3, 'UTC')
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(start_hour)
        .bind(end_hour)
        .fetch_one(pool)
        .await?;
        Ok(window)
    }

    pub async fn remove(id: Uuid, pool: &PgPool) -> Result<bool> {
        let result = sqlx::query("DELETE FROM prime_time_windows WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(start: i32, end: i32) -> PrimeTimeWindow {
        PrimeTimeWindow {
            id: Uuid::new_v4(),
            start_hour: start,
            end_hour: end,
            timezone: "UTC".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn plain_window_is_half_open() {
        let w = window(20, 22);
        assert!(!w.matches_hour(19));
        assert!(w.matches_hour(20));
        assert!(w.matches_hour(21));
        assert!(!w.matches_hour(22));
    }

    #[test]
    fn wrapping_window_covers_both_sides_of_midnight() {
        let w = window(22, 2);
        assert!(w.matches_hour(22));
        assert!(w.matches_hour(23));
        assert!(w.matches_hour(0));
        assert!(w.matches_hour(1));
        assert!(!w.matches_hour(2));
        assert!(!w.matches_hour(12));
    }

    #[test]
    fn window_law_holds_for_every_hour() {
        // h matches [s,e) iff (s<=e ∧ s<=h<e) ∨ (s>e ∧ (h>=s ∨ h<e))
        for start in 0..24 {
            for end in 0..24 {
                let w = window(start, end);
                for hour in 0u32..24 {
                    let h = hour as i32;
                    let expected = if start <= end {
                        start <= h && h < end
                    } else {
                        h >= start || h < end
                    };
                    assert_eq!(w.matches_hour(hour), expected, "s={start} e={end} h={hour}");
                }
            }
        }
    }
}
