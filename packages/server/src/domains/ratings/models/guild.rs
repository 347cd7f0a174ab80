use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::kernel::traits::BattleApi;

/// Prefix of locally generated guild ids used until the external id is known.
pub const PLACEHOLDER_PREFIX: &str = "placeholder-";

/// Guild directory entry, lazily created from battle and kill data.
///
/// The id is the upstream opaque id when the lookup succeeded, otherwise a
/// placeholder that can later be promoted via [`Guild::update_guild_id`].
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Guild {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Guild {
    pub fn is_placeholder(&self) -> bool {
        self.id.starts_with(PLACEHOLDER_PREFIX)
    }
}

// =============================================================================
// SQL Queries - ALL queries must be in models/
// =============================================================================

impl Guild {
    pub async fn find_by_name(name: &str, pool: &PgPool) -> Result<Option<Self>> {
        let guild = sqlx::query_as::<_, Guild>("SELECT * FROM guilds WHERE name = $1")
            .bind(name)
            .fetch_optional(pool)
            .await?;
        Ok(guild)
    }

    pub async fn find_by_id(id: &str, pool: &PgPool) -> Result<Option<Self>> {
        let guild = sqlx::query_as::<_, Guild>("SELECT * FROM guilds WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(guild)
    }

    /// Find or create a guild by name.
    ///
    /// The upstream directory is consulted for the real id; on lookup failure
    /// a placeholder id is generated so ingestion can proceed. A placeholder
    /// row found later is promoted once the directory answers. A create race
    /// is resolved by re-reading by name, then by id.
    pub async fn get_or_create(name: &str, api: &dyn BattleApi, pool: &PgPool) -> Result<Self> {
        if let Some(guild) = Self::find_by_name(name, pool).await? {
            if guild.is_placeholder() {
                if let Some(real_id) = Self::lookup_external_id(name, api).await {
                    if Self::update_guild_id(name, &real_id, pool).await? {
                        debug!(guild = name, id = %real_id, "promoted placeholder guild id");
                    }
                    return Self::find_by_name(name, pool)
                        .await?
                        .ok_or_else(|| anyhow!("guild {} vanished during promotion", name));
                }
            }
            return Ok(guild);
        }

        let id = Self::lookup_external_id(name, api)
            .await
            .unwrap_or_else(|| format!("{}{}", PLACEHOLDER_PREFIX, Uuid::new_v4()));

        let inserted = sqlx::query_as::<_, Guild>(
            r#"
            INSERT INTO guilds (id, name)
            VALUES ($1, $2)
            ON CONFLICT (name) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(name)
        .fetch_optional(pool)
        .await?;

        if let Some(guild) = inserted {
            debug!(guild = name, id = %guild.id, "guild created");
            return Ok(guild);
        }

        // Another writer created the row first; prefer the row found by name.
        if let Some(guild) = Self::find_by_name(name, pool).await? {
            return Ok(guild);
        }
        Self::find_by_id(&id, pool)
            .await?
            .ok_or_else(|| anyhow!("guild {} vanished after create race", name))
    }

    async fn lookup_external_id(name: &str, api: &dyn BattleApi) -> Option<String> {
        match api.search_guilds(name).await {
            Ok(hits) => hits
                .into_iter()
                .find(|hit| hit.name.eq_ignore_ascii_case(name))
                .map(|hit| hit.id),
            Err(e) => {
                warn!(guild = name, error = %e, "guild directory lookup failed");
                None
            }
        }
    }

    /// Promote a placeholder row to the real external id.
    ///
    /// No-op when the row already carries an external id.
    pub async fn update_guild_id(name: &str, real_id: &str, pool: &PgPool) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE guilds
            SET id = $2, updated_at = NOW()
            WHERE name = $1 AND id LIKE $3
            "#,
        )
        .bind(name)
        .bind(real_id)
        .bind(format!("{}%", PLACEHOLDER_PREFIX))
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_detection() {
        let guild = Guild {
            id: format!("{}{}", PLACEHOLDER_PREFIX, Uuid::new_v4()),
            name: "Iron Pact".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(guild.is_placeholder());

        let external = Guild {
            id: "gUKxxB09TEuSp_bOOV3gpw".to_string(),
            ..guild
        };
        assert!(!external.is_placeholder());
    }
}
