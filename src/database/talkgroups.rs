//! `talk_groups` table access. Loaded at startup and treated as effectively
//! immutable at runtime (spec §3).

use serde::Serialize;
use sqlx::SqlitePool;

use crate::error::Result;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Talkgroup {
    pub id: String,
    pub alpha_tag: String,
    pub tag: String,
    pub county: String,
    pub category: String,
}

/// Insert-or-ignore a talkgroup observed on an upload. This is how the
/// `talk_groups` table gets populated the first time a given talkgroup is
/// seen, matching the "created on demand and memoised" rule the Discord
/// fan-out uses for category/channel resolution (spec §4.4).
pub async fn upsert_seen(
    pool: &SqlitePool,
    id: &str,
    alpha_tag: &str,
    tag: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO talk_groups (id, alpha_tag, tag, county, category)
        VALUES (?, ?, ?, '', '')
        ON CONFLICT(id) DO UPDATE SET alpha_tag = excluded.alpha_tag
        "#,
    )
    .bind(id)
    .bind(alpha_tag)
    .bind(tag)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get(pool: &SqlitePool, id: &str) -> Result<Option<Talkgroup>> {
    let tg = sqlx::query_as::<_, Talkgroup>("SELECT * FROM talk_groups WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(tg)
}

/// `GET /api/talkgroups`
pub async fn list_all(pool: &SqlitePool) -> Result<Vec<Talkgroup>> {
    let rows = sqlx::query_as::<_, Talkgroup>("SELECT * FROM talk_groups ORDER BY id")
        .fetch_all(pool)
        .await?;
    Ok(rows)
}
