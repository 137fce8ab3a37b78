//! Recently used tracks, excluded from new playlists

use chrono::{TimeDelta, Utc};
use rusqlite::params;
use std::collections::HashSet;

use super::Store;
use crate::error::StoreError;

const EXCLUSION_HEADER: &str =
    "The following songs have already been used in previous playlists, please don't include them:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub provider_uri: String,
    pub artist: String,
    pub title: String,
}

impl Store {
    /// Resolved tracks of the user's playlists created within `window`
    ///
    /// Most recent first, one entry per provider URI.
    pub fn recent_tracks(&self, user_id: i64, window: TimeDelta) -> Result<Vec<HistoryEntry>, StoreError> {
        self.history(user_id, None, window)
    }

    /// URIs used by the user's other playlists within `window`
    pub fn excluded_uris(
        &self,
        user_id: i64,
        exclude_playlist: i64,
        window: TimeDelta,
    ) -> Result<HashSet<String>, StoreError> {
        Ok(self
            .history(user_id, Some(exclude_playlist), window)?
            .into_iter()
            .map(|entry| entry.provider_uri)
            .collect())
    }

    fn history(
        &self,
        user_id: i64,
        exclude_playlist: Option<i64>,
        window: TimeDelta,
    ) -> Result<Vec<HistoryEntry>, StoreError> {
        let since = Utc::now() - window;
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT t.provider_uri, t.artist, t.title
                 FROM tracks t
                 JOIN playlists p ON p.id = t.playlist_id
                 WHERE p.user_id = ?1
                   AND p.created_at >= ?2
                   AND (?3 IS NULL OR p.id != ?3)
                   AND t.staged = 0
                   AND t.provider_uri IS NOT NULL
                 ORDER BY p.created_at DESC, t.position",
            )?;
            let rows = stmt
                .query_map(params![user_id, since, exclude_playlist], |row| {
                    Ok(HistoryEntry {
                        provider_uri: row.get(0)?,
                        artist: row.get(1)?,
                        title: row.get(2)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            let mut seen = HashSet::new();
            Ok(rows
                .into_iter()
                .filter(|entry| seen.insert(entry.provider_uri.clone()))
                .collect())
        })
    }
}

/// Format history for the generation prompt, or nothing when there is none
pub fn exclusion_prompt(entries: &[HistoryEntry]) -> String {
    if entries.is_empty() {
        return String::new();
    }

    let mut prompt = String::from(EXCLUSION_HEADER);
    for entry in entries {
        prompt.push_str(&format!("\n- {} - {}", entry.artist, entry.title));
    }
    prompt
}
