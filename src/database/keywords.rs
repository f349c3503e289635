//! `global_keywords` table access — alert keyword subscriptions.
//!
//! CRUD for these is a slash-command surface explicitly out of core scope
//! (spec §1); only the read path used by the fan-out's alert matching lives
//! here.

use serde::Serialize;
use sqlx::SqlitePool;

use crate::error::Result;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AlertKeyword {
    pub id: i64,
    pub keyword: String,
    pub talk_group_id: Option<String>,
}

/// Keywords that apply to `talk_group_id` (global keywords, `talk_group_id
/// IS NULL`, plus any scoped to this specific talkgroup).
pub async fn for_talkgroup(pool: &SqlitePool, talk_group_id: &str) -> Result<Vec<AlertKeyword>> {
    let rows = sqlx::query_as::<_, AlertKeyword>(
        "SELECT * FROM global_keywords WHERE talk_group_id IS NULL OR talk_group_id = ?",
    )
    .bind(talk_group_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Exact (case-insensitive) keyword matches against the final stored
/// transcription (spec §7: "alerts fire only for exact keyword matches").
pub fn matches<'a>(keywords: &'a [AlertKeyword], transcription: &str) -> Vec<&'a AlertKeyword> {
    let lower = transcription.to_lowercase();
    keywords
        .iter()
        .filter(|kw| lower.contains(&kw.keyword.to_lowercase()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_is_case_insensitive_substring() {
        let keywords = vec![
            AlertKeyword { id: 1, keyword: "structure fire".into(), talk_group_id: None },
            AlertKeyword { id: 2, keyword: "officer down".into(), talk_group_id: None },
        ];
        let hits = matches(&keywords, "Reports of a STRUCTURE FIRE at 123 Main St");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 1);
    }
}
