//! Typed key/value rows for small pieces of process state.
//!
//! The crawler watermark lives here: an ISO-8601 timestamp bounding the
//! horizon beyond which listing coverage is assumed. It only ever advances,
//! and never past `now - soft_lookback`.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

/// Key under which the crawler watermark is stored.
pub const WATERMARK_KEY: &str = "battle_ingestion_watermark";

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ServiceState {
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// SQL Queries - ALL queries must be in models/
// =============================================================================

impl ServiceState {
    pub async fn get(key: &str, pool: &PgPool) -> Result<Option<Self>> {
        let state =
            sqlx::query_as::<_, ServiceState>("SELECT * FROM service_state WHERE key = $1")
                .bind(key)
                .fetch_optional(pool)
                .await?;
        Ok(state)
    }

    pub async fn set(key: &str, value: &str, pool: &PgPool) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO service_state (key, value, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (key) DO UPDATE SET
                value = EXCLUDED.value,
                updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(pool)
        .await?;
        Ok(())
    }
}

/// Clamp a watermark candidate so it never exceeds `now - soft_lookback`.
pub fn clamp_watermark(
    candidate: DateTime<Utc>,
    now: DateTime<Utc>,
    soft_lookback: Duration,
) -> DateTime<Utc> {
    candidate.min(now - soft_lookback)
}

/// Current crawler watermark, if one has been recorded.
pub async fn watermark(pool: &PgPool) -> Result<Option<DateTime<Utc>>> {
    let state = ServiceState::get(WATERMARK_KEY, pool).await?;
    match state {
        None => Ok(None),
        Some(state) => {
            let parsed = state
                .value
                .parse::<DateTime<Utc>>()
                .with_context(|| format!("invalid watermark value: {}", state.value))?;
            Ok(Some(parsed))
        }
    }
}

/// Advance the watermark monotonically, clamped to `now - soft_lookback`.
///
/// Returns the value actually stored (the previous one if the candidate would
/// have moved it backwards).
pub async fn advance_watermark(
    candidate: DateTime<Utc>,
    soft_lookback: Duration,
    pool: &PgPool,
) -> Result<DateTime<Utc>> {
    let clamped = clamp_watermark(candidate, Utc::now(), soft_lookback);

    let current = watermark(pool).await?;
    let next = match current {
        Some(current) if current >= clamped => current,
        _ => clamped,
    };

    if Some(next) != current {
        ServiceState::set(WATERMARK_KEY, &next.to_rfc3339(), pool).await?;
    }

    Ok(next)
}
