use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{not_found, NewDraft, Playlist, PlaylistDraft, Store};
use crate::error::StoreError;

const PLAYLIST_COLUMNS: &str = "id, user_id, activity_id, music_request_id, name, description,
     cover_prompt, external_id, locked, processing, generating_cover_image, following,
     cover_image_url, cover_image_updated_at, created_at, updated_at";

fn row_to_playlist(row: &Row) -> Result<Playlist, rusqlite::Error> {
    Ok(Playlist {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        activity_id: row.get("activity_id")?,
        music_request_id: row.get("music_request_id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        cover_prompt: row.get("cover_prompt")?,
        external_id: row.get("external_id")?,
        locked: row.get("locked")?,
        processing: row.get("processing")?,
        generating_cover_image: row.get("generating_cover_image")?,
        following: row.get("following")?,
        cover_image_url: row.get("cover_image_url")?,
        cover_image_updated_at: row.get("cover_image_updated_at")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn row_to_draft(row: &Row) -> Result<PlaylistDraft, rusqlite::Error> {
    Ok(PlaylistDraft {
        playlist_id: row.get("playlist_id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        cover_prompt: row.get("cover_prompt")?,
        extension_rounds: row.get("extension_rounds")?,
        created_at: row.get("created_at")?,
    })
}

pub(super) fn load_playlist(conn: &Connection, id: i64) -> Result<Playlist, StoreError> {
    let sql = format!("SELECT {PLAYLIST_COLUMNS} FROM playlists WHERE id = ?1");
    conn.query_row(&sql, [id], row_to_playlist)
        .map_err(not_found("playlist", id))
}

/// Replace any existing draft for the playlist
pub(super) fn put_draft(conn: &Connection, playlist_id: i64, draft: &NewDraft) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO playlist_drafts (playlist_id, name, description, cover_prompt, extension_rounds, created_at)
         VALUES (?1, ?2, ?3, ?4, 0, ?5)
         ON CONFLICT(playlist_id) DO UPDATE SET
             name = excluded.name,
             description = excluded.description,
             cover_prompt = excluded.cover_prompt,
             extension_rounds = 0,
             created_at = excluded.created_at",
        params![playlist_id, draft.name, draft.description, draft.cover_prompt, Utc::now()],
    )?;
    Ok(())
}

impl Store {
    pub fn get_playlist(&self, id: i64) -> Result<Playlist, StoreError> {
        self.with_conn(|conn| load_playlist(conn, id))
    }

    pub fn playlist_for_activity(&self, activity_id: i64) -> Result<Playlist, StoreError> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {PLAYLIST_COLUMNS} FROM playlists WHERE activity_id = ?1");
            conn.query_row(&sql, [activity_id], row_to_playlist)
                .map_err(not_found("activity playlist", activity_id))
        })
    }

    pub fn find_playlist_for_activity(&self, activity_id: i64) -> Result<Option<Playlist>, StoreError> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {PLAYLIST_COLUMNS} FROM playlists WHERE activity_id = ?1");
            Ok(conn.query_row(&sql, [activity_id], row_to_playlist).optional()?)
        })
    }

    /// Playlists of a user created in `[start, end)`, oldest first
    pub fn playlists_created_between(
        &self,
        user_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Playlist>, StoreError> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {PLAYLIST_COLUMNS} FROM playlists
                 WHERE user_id = ?1 AND created_at >= ?2 AND created_at < ?3
                 ORDER BY created_at, id"
            );
            let mut stmt = conn.prepare(&sql)?;
            let playlists = stmt
                .query_map(params![user_id, start, end], row_to_playlist)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(playlists)
        })
    }

    /// Playlists of a user created strictly before `cutoff`, oldest first
    pub fn playlists_created_before(
        &self,
        user_id: i64,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Playlist>, StoreError> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {PLAYLIST_COLUMNS} FROM playlists
                 WHERE user_id = ?1 AND created_at < ?2
                 ORDER BY created_at, id"
            );
            let mut stmt = conn.prepare(&sql)?;
            let playlists = stmt
                .query_map(params![user_id, cutoff], row_to_playlist)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(playlists)
        })
    }

    /// Most recent playlists of a user
    pub fn recent_playlists(&self, user_id: i64, limit: usize) -> Result<Vec<Playlist>, StoreError> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {PLAYLIST_COLUMNS} FROM playlists
                 WHERE user_id = ?1
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?2"
            );
            let mut stmt = conn.prepare(&sql)?;
            let playlists = stmt
                .query_map(params![user_id, limit as i64], row_to_playlist)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(playlists)
        })
    }

    /// Remember the Spotify playlist id after the first sync
    pub fn set_external_id(&self, id: i64, external_id: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE playlists SET external_id = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, external_id, Utc::now()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound { entity: "playlist", id });
            }
            Ok(())
        })
    }

    /// Remember a generated cover, unless the cover prompt changed meanwhile
    pub fn set_cover_image_url(&self, id: i64, url: &str, prompt: &str) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE playlists SET cover_image_url = ?2, updated_at = ?4 WHERE id = ?1 AND cover_prompt = ?3",
                params![id, url, prompt, Utc::now()],
            )?;
            Ok(changed == 1)
        })
    }

    pub fn touch_cover_updated_at(&self, id: i64) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let now = Utc::now();
            conn.execute(
                "UPDATE playlists SET cover_image_updated_at = ?2, updated_at = ?2 WHERE id = ?1",
                params![id, now],
            )?;
            Ok(())
        })
    }

    pub fn delete_playlist_row(&self, id: i64) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM playlists WHERE id = ?1", [id])?;
            Ok(())
        })
    }

    pub fn get_draft(&self, playlist_id: i64) -> Result<Option<PlaylistDraft>, StoreError> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT playlist_id, name, description, cover_prompt, extension_rounds, created_at
                     FROM playlist_drafts WHERE playlist_id = ?1",
                    [playlist_id],
                    row_to_draft,
                )
                .optional()?)
        })
    }

    /// Drop a pending draft and its staged candidates
    pub fn discard_draft(&self, playlist_id: i64) -> Result<(), StoreError> {
        self.with_tx(|tx| {
            tx.execute(
                "DELETE FROM tracks WHERE playlist_id = ?1 AND staged = 1",
                [playlist_id],
            )?;
            tx.execute("DELETE FROM playlist_drafts WHERE playlist_id = ?1", [playlist_id])?;
            Ok(())
        })
    }
}
